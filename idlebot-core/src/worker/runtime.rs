// File: idlebot-core/src/worker/runtime.rs

use std::sync::Arc;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use idlebot_common::models::{OwnedGame, OwnedGamesUpdate, SentryUpdate, WorkerEvent};
use crate::platforms::{ConnectionEvent, EventSink, RemoteConnection, SessionEvent};
use crate::worker::farm;
use crate::worker::machine::{Effect, WorkerCommand, WorkerInput, WorkerMachine};
use crate::worker::timers::{reconnect_delay, TimerSlot};
use crate::worker::WorkerContext;
use crate::Error;

/// Messages the runtime posts to itself from timers and background fetches.
#[derive(Debug)]
enum Internal {
    HeartbeatTick { generation: u64 },
    ReconnectDue { generation: u64 },
    OwnedGames { session: u64, games: Vec<OwnedGame> },
}

enum Next {
    Command(Option<WorkerCommand>),
    Session(SessionEvent),
    Internal(Internal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

/// Drives a `WorkerMachine`: feeds it commands, connection events and timer
/// ticks, and carries out the effects it returns.
pub struct WorkerRuntime {
    machine: WorkerMachine,
    connection: Arc<dyn RemoteConnection>,
    events_out: mpsc::UnboundedSender<WorkerEvent>,
    session_tx: mpsc::UnboundedSender<SessionEvent>,
    session_rx: mpsc::UnboundedReceiver<SessionEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    /// Token of the login attempt whose events are live.
    session: u64,
    heartbeat: TimerSlot,
    reconnect: TimerSlot,
}

impl WorkerRuntime {
    pub fn new(
        ctx: WorkerContext,
        connection: Arc<dyn RemoteConnection>,
        events_out: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        Self {
            machine: WorkerMachine::new(ctx),
            connection,
            events_out,
            session_tx,
            session_rx,
            internal_tx,
            internal_rx,
            session: 0,
            heartbeat: TimerSlot::new(),
            reconnect: TimerSlot::new(),
        }
    }

    /// Runs until the machine exits. A closed command channel counts as `Stop`.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<WorkerCommand>) -> Result<(), Error> {
        loop {
            let next = tokio::select! {
                cmd = commands.recv() => Next::Command(cmd),
                Some(ev) = self.session_rx.recv() => Next::Session(ev),
                Some(msg) = self.internal_rx.recv() => Next::Internal(msg),
            };

            let input = match next {
                Next::Command(Some(cmd)) => WorkerInput::Command(cmd),
                Next::Command(None) => {
                    info!("[Worker] master went away; stopping");
                    WorkerInput::Command(WorkerCommand::Stop)
                }
                Next::Session(ev) if ev.session == self.session => WorkerInput::Connection(ev.event),
                Next::Session(ev) => {
                    debug!("[Worker] stale event from session {}: {:?}", ev.session, ev.event);
                    continue;
                }
                Next::Internal(Internal::HeartbeatTick { generation }) => {
                    if !self.heartbeat.is_current(generation) {
                        continue;
                    }
                    WorkerInput::HeartbeatTick
                }
                Next::Internal(Internal::ReconnectDue { generation }) => {
                    if !self.reconnect.is_current(generation) {
                        continue;
                    }
                    self.reconnect.disarm();
                    WorkerInput::ReconnectDue
                }
                Next::Internal(Internal::OwnedGames { session, games }) => {
                    if session != self.session {
                        continue;
                    }
                    WorkerInput::OwnedGamesFetched(games)
                }
            };

            if self.step(input).await == Flow::Exit {
                break;
            }
        }

        self.heartbeat.cancel();
        self.reconnect.cancel();
        info!("[Worker] exiting");
        Ok(())
    }

    async fn step(&mut self, input: WorkerInput) -> Flow {
        let effects = match self.machine.handle(input, Utc::now()) {
            Ok(effects) => effects,
            Err(e) => {
                warn!("[Worker] command rejected: {}", e);
                return Flow::Continue;
            }
        };

        let mut flow = Flow::Continue;
        for effect in effects {
            if self.apply(effect).await == Flow::Exit {
                flow = Flow::Exit;
            }
        }
        flow
    }

    async fn apply(&mut self, effect: Effect) -> Flow {
        match effect {
            Effect::Emit(update) => {
                info!("[Worker] status -> {}", update.status);
                self.send(WorkerEvent::StatusUpdate(update));
            }
            Effect::EmitOwnedGames(games) => {
                self.send(WorkerEvent::OwnedGamesUpdate(OwnedGamesUpdate { games }));
            }
            Effect::ForwardSentry(sentry) => {
                self.send(WorkerEvent::SentryUpdate(SentryUpdate { sentry }));
            }
            Effect::LogOn => self.log_on().await,
            Effect::LogOff => {
                // Nothing from the old session is relevant after this point.
                self.session += 1;
                if let Err(e) = self.connection.log_off().await {
                    debug!("[Worker] log off: {}", e);
                }
            }
            Effect::Farm => farm::farm(self.connection.as_ref(), self.machine.context()).await,
            Effect::FetchOwnedGames => self.fetch_owned_games(),
            Effect::ArmHeartbeat => {
                let period = self.machine.context().heartbeat_interval();
                self.heartbeat.arm_interval(period, self.internal_tx.clone(), |generation| {
                    Internal::HeartbeatTick { generation }
                });
            }
            Effect::CancelHeartbeat => self.heartbeat.cancel(),
            Effect::ScheduleReconnect { attempt } => {
                let delay = reconnect_delay(&self.machine.context().tuning.reconnect, attempt);
                info!("[Worker] reconnecting in {:?}", delay);
                self.reconnect.arm_once(delay, self.internal_tx.clone(), |generation| {
                    Internal::ReconnectDue { generation }
                });
            }
            Effect::CancelReconnect => self.reconnect.cancel(),
            Effect::AnswerChallenge { responder, code } => {
                if let Err(e) = responder.respond(code) {
                    warn!("[Worker] could not answer challenge: {}", e);
                }
            }
            Effect::AcceptRelationship { peer_id } => {
                match self.connection.accept_relationship(&peer_id).await {
                    Ok(()) => info!("[Worker] accepted relationship request from {}", peer_id),
                    Err(e) => warn!("[Worker] accepting {} failed: {}", peer_id, e),
                }
            }
            Effect::Exit => return Flow::Exit,
        }
        Flow::Continue
    }

    async fn log_on(&mut self) {
        self.session += 1;
        let sink = EventSink::new(self.session, self.session_tx.clone());
        let details = self.machine.context().log_on_details();
        if let Err(e) = self.connection.log_on(&details, sink.clone()).await {
            // Treated like any asynchronous login failure.
            sink.emit(ConnectionEvent::Error { message: e.to_string() });
        }
    }

    fn fetch_owned_games(&self) {
        let connection = Arc::clone(&self.connection);
        let tx = self.internal_tx.clone();
        let session = self.session;
        tokio::spawn(async move {
            match connection.owned_games().await {
                Ok(library) => {
                    let games = library.iter().map(|entry| entry.to_owned_game()).collect();
                    let _ = tx.send(Internal::OwnedGames { session, games });
                }
                Err(e) => debug!("[Worker] owned games unavailable: {}", e),
            }
        });
    }

    fn send(&self, event: WorkerEvent) {
        if self.events_out.send(event).is_err() {
            error!("[Worker] event channel to master is closed");
        }
    }

    #[cfg(test)]
    fn heartbeat_armed(&self) -> bool {
        self.heartbeat.is_armed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeConnector;
    use crate::platforms::ConnectorFactory;
    use idlebot_common::models::{WorkerSeed, WorkerStatus};

    fn runtime(fake: &FakeConnector) -> (WorkerRuntime, mpsc::UnboundedReceiver<WorkerEvent>) {
        let ctx = WorkerContext::from(WorkerSeed {
            username: "alice".into(),
            password: "pw".into(),
            game_list: vec![],
            settings: Default::default(),
            tuning: Default::default(),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        (WorkerRuntime::new(ctx, fake.connect("alice"), tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn failed_log_on_call_becomes_an_error_event() {
        let fake = FakeConnector::default();
        fake.fail_next_log_on("socket closed");
        let (mut rt, mut events) = runtime(&fake);

        rt.step(WorkerInput::Command(WorkerCommand::Start)).await;
        let ev = rt.session_rx.recv().await.unwrap();
        assert_eq!(ev.session, rt.session);
        assert!(matches!(ev.event, ConnectionEvent::Error { .. }));

        rt.step(WorkerInput::Connection(ev.event)).await;
        let mut last = None;
        while let Ok(WorkerEvent::StatusUpdate(update)) = events.try_recv() {
            last = Some(update.status);
        }
        let expected = Error::Platform("socket closed".into()).to_string();
        assert_eq!(last, Some(WorkerStatus::Error(expected)));
        assert!(!rt.heartbeat_armed());
    }
}
