// tests/common/mod.rs

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

use idlebot_common::models::{
    AccountSnapshot, GameEntry, MasterCommand, Settings, StatusUpdate, WorkerEvent, WorkerSeed,
    WorkerStatus, WorkerTuning,
};
use idlebot_core::ipc::{IpcReader, IpcWriter};
use idlebot_core::orchestrator::OrchestratorHandle;
use idlebot_core::test_utils::FakeConnector;
use idlebot_core::worker::run_worker;
use idlebot_core::Error;

/// Long enough to cover any reconnect under paused time.
const EVENT_WAIT: Duration = Duration::from_secs(3 * 60 * 60);

/// The master's side of a single in-process worker.
pub struct WorkerHarness {
    pub fake: FakeConnector,
    commands: IpcWriter<MasterCommand, WriteHalf<DuplexStream>>,
    events: IpcReader<WorkerEvent, ReadHalf<DuplexStream>>,
    pub task: JoinHandle<Result<(), Error>>,
}

impl WorkerHarness {
    /// Spawns the worker, seeds it and sends `start`.
    pub async fn start(fake: FakeConnector, settings: Settings, game_list: Vec<GameEntry>) -> anyhow::Result<Self> {
        let (master_end, worker_end) = tokio::io::duplex(64 * 1024);
        let (from_worker, to_worker) = tokio::io::split(master_end);
        let (worker_in, worker_out) = tokio::io::split(worker_end);

        let task = tokio::spawn(run_worker(worker_in, worker_out, Arc::new(fake.clone())));
        let mut harness = Self {
            fake,
            commands: IpcWriter::new(to_worker),
            events: IpcReader::new(from_worker),
            task,
        };

        harness
            .send(MasterCommand::Seed(WorkerSeed {
                username: "alice".into(),
                password: "correct horse".into(),
                game_list,
                settings,
                tuning: WorkerTuning::default(),
            }))
            .await?;
        harness.send(MasterCommand::Start).await?;
        Ok(harness)
    }

    pub async fn send(&mut self, cmd: MasterCommand) -> anyhow::Result<()> {
        self.commands.send(&cmd).await?;
        Ok(())
    }

    /// Next event, or `None` if the pipe closed or nothing came in time.
    pub async fn next_event(&mut self) -> Option<WorkerEvent> {
        match tokio::time::timeout(EVENT_WAIT, self.events.next()).await {
            Ok(Ok(event)) => event,
            _ => None,
        }
    }

    pub async fn next_status(&mut self) -> Option<StatusUpdate> {
        loop {
            match self.next_event().await? {
                WorkerEvent::StatusUpdate(update) => return Some(update),
                _ => continue,
            }
        }
    }

    /// Reads status updates until one matches; returns all of them, match last.
    pub async fn statuses_until(&mut self, pred: impl Fn(&WorkerStatus) -> bool) -> Vec<StatusUpdate> {
        let mut seen = Vec::new();
        while let Some(update) = self.next_status().await {
            let done = pred(&update.status);
            seen.push(update);
            if done {
                break;
            }
        }
        seen
    }

    pub async fn until_running(&mut self) -> Vec<StatusUpdate> {
        self.statuses_until(WorkerStatus::is_running).await
    }
}

/// Lets spawned tasks catch up without moving the clock.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

/// Polls the orchestrator until `username` satisfies `pred`.
pub async fn wait_for_account(
    handle: &OrchestratorHandle,
    username: &str,
    pred: impl Fn(&AccountSnapshot) -> bool,
) -> anyhow::Result<AccountSnapshot> {
    for _ in 0..250 {
        let accounts = handle.list_accounts().await?;
        if let Some(snapshot) = accounts.into_iter().find(|a| a.username == username) {
            if pred(&snapshot) {
                return Ok(snapshot);
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    anyhow::bail!("account '{}' never reached the expected state", username)
}
