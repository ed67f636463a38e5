// File: idlebot-core/src/worker/mod.rs
//
// One account's session holder. A worker reads its seed and commands from the
// master over a pipe, owns exactly one remote connection, and reports status
// back over the same pipe.

pub mod context;
pub mod farm;
pub mod machine;
pub mod runtime;
pub mod timers;

use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{info, info_span, warn, Instrument};

use idlebot_common::models::{MasterCommand, WorkerEvent};
use crate::ipc::{self, IpcReader};
use crate::platforms::ConnectorFactory;
use crate::Error;

pub use context::WorkerContext;
pub use machine::{Effect, WorkerCommand, WorkerInput, WorkerMachine};
pub use runtime::WorkerRuntime;

impl TryFrom<MasterCommand> for WorkerCommand {
    type Error = Error;

    fn try_from(cmd: MasterCommand) -> Result<Self, Error> {
        match cmd {
            MasterCommand::Start => Ok(WorkerCommand::Start),
            MasterCommand::Stop => Ok(WorkerCommand::Stop),
            MasterCommand::SupplyChallengeCode(c) => Ok(WorkerCommand::SupplyChallengeCode(c.code)),
            MasterCommand::Seed(_) => Err(Error::Ipc("worker was already seeded".into())),
        }
    }
}

/// Runs a worker over an arbitrary pipe until it stops, is disconnected, or
/// the master closes its end.
///
/// The first message must be the seed; the login starts on the first `start`.
pub async fn run_worker<R, W>(
    reader: R,
    writer: W,
    connector: Arc<dyn ConnectorFactory>,
) -> Result<(), Error>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut inbound = IpcReader::<MasterCommand, R>::new(reader);
    let seed = match inbound.next().await? {
        Some(MasterCommand::Seed(seed)) => seed,
        Some(other) => {
            return Err(Error::Ipc(format!("expected seed, got '{}'", other.type_name())));
        }
        None => return Err(Error::Ipc("master closed the pipe before seeding".into())),
    };

    let ctx = WorkerContext::from(seed);
    let span = info_span!("worker", account = %ctx.username);

    async move {
        info!("[Worker] seeded: {} game entries", ctx.game_list.len());
        let connection = connector.connect(&ctx.username);

        let (events_tx, events_rx) = mpsc::unbounded_channel::<WorkerEvent>();
        let writer_task = tokio::spawn(
            ipc::pump(writer, events_rx, "master".to_string()).in_current_span(),
        );

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(
            async move {
                loop {
                    match inbound.next().await {
                        Ok(Some(cmd)) => {
                            let name = cmd.type_name();
                            match WorkerCommand::try_from(cmd) {
                                Ok(cmd) => {
                                    if commands_tx.send(cmd).is_err() {
                                        break;
                                    }
                                }
                                Err(e) => warn!("[Worker] ignoring '{}': {}", name, e),
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("[Worker] command pipe failed: {}", e);
                            break;
                        }
                    }
                }
            }
            .in_current_span(),
        );

        let result = WorkerRuntime::new(ctx, connection, events_tx)
            .run(commands_rx)
            .await;

        reader_task.abort();
        // The runtime dropped its sender, so the writer drains and finishes.
        if let Ok(Err(e)) = writer_task.await {
            warn!("[Worker] final events were not delivered: {}", e);
        }
        result
    }
    .instrument(span)
    .await
}
