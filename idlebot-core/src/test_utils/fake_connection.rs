// File: idlebot-core/src/test_utils/fake_connection.rs
//
// A scriptable `RemoteConnection` that records every call and lets a test
// push protocol events into the current login session.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use async_trait::async_trait;

use crate::platforms::{
    Activity, ChallengeKind, ChallengeResponder, ConnectionEvent, ConnectorFactory, EventSink,
    LibraryEntry, LogOnDetails, PresenceState, RemoteConnection,
};
use crate::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeCall {
    LogOn { username: String },
    LogOff,
    SetPresence(PresenceState),
    SetActivities(Vec<Activity>),
    OwnedGames,
    AcceptRelationship(String),
}

/// How the fake reacts to `log_on`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOnScript {
    /// Report `LoggedOn` straight away.
    Succeed,
    /// Ask for a challenge code, then report `LoggedOn` once it is answered.
    Challenge(ChallengeKind),
    /// Stay silent; the test drives the session by hand.
    Silent,
}

#[derive(Default)]
struct FakeState {
    calls: Vec<FakeCall>,
    sinks: Vec<EventSink>,
    answered_codes: Vec<String>,
    log_on_failures: VecDeque<String>,
    library: Vec<LibraryEntry>,
    fail_activities: bool,
}

struct Shared {
    script: LogOnScript,
    state: Mutex<FakeState>,
}

/// Factory and connection in one; clones share the same recorded state.
#[derive(Clone)]
pub struct FakeConnector {
    shared: Arc<Shared>,
}

impl Default for FakeConnector {
    fn default() -> Self {
        Self::new(LogOnScript::Succeed)
    }
}

impl FakeConnector {
    pub fn new(script: LogOnScript) -> Self {
        Self {
            shared: Arc::new(Shared {
                script,
                state: Mutex::new(FakeState::default()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with_library(self, library: Vec<LibraryEntry>) -> Self {
        self.state().library = library;
        self
    }

    pub fn fail_next_log_on(&self, message: &str) {
        self.state().log_on_failures.push_back(message.to_string());
    }

    pub fn set_fail_activities(&self, fail: bool) {
        self.state().fail_activities = fail;
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.state().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&FakeCall) -> bool) -> usize {
        self.state().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn log_on_count(&self) -> usize {
        self.count(|c| matches!(c, FakeCall::LogOn { .. }))
    }

    pub fn activity_pushes(&self) -> usize {
        self.count(|c| matches!(c, FakeCall::SetActivities(_)))
    }

    pub fn answered_codes(&self) -> Vec<String> {
        self.state().answered_codes.clone()
    }

    /// Sessions handed to `log_on`, oldest first.
    pub fn sessions(&self) -> Vec<u64> {
        self.state().sinks.iter().map(EventSink::session).collect()
    }

    /// Emits into the most recent login session.
    pub fn emit(&self, event: ConnectionEvent) -> bool {
        let sink = self.state().sinks.last().cloned();
        sink.is_some_and(|s| s.emit(event))
    }

    /// Emits into a specific (possibly stale) session.
    pub fn emit_to(&self, session: u64, event: ConnectionEvent) -> bool {
        let sink = self.state().sinks.iter().find(|s| s.session() == session).cloned();
        sink.is_some_and(|s| s.emit(event))
    }

    /// Raises a challenge on the current session and returns the receiving end
    /// of its answer.
    pub fn raise_challenge(&self, kind: ChallengeKind) -> Option<tokio::sync::oneshot::Receiver<String>> {
        let (responder, rx) = ChallengeResponder::pair();
        let raised = self.emit(ConnectionEvent::ChallengeRequired {
            kind,
            last_code_wrong: false,
            responder,
        });
        raised.then_some(rx)
    }

    fn record(&self, call: FakeCall) {
        self.state().calls.push(call);
    }
}

impl ConnectorFactory for FakeConnector {
    fn connect(&self, _username: &str) -> Arc<dyn RemoteConnection> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl RemoteConnection for FakeConnector {
    async fn log_on(&self, details: &LogOnDetails, sink: EventSink) -> Result<(), Error> {
        let failure = {
            let mut state = self.state();
            state.calls.push(FakeCall::LogOn { username: details.username.clone() });
            state.sinks.push(sink.clone());
            state.log_on_failures.pop_front()
        };
        if let Some(message) = failure {
            return Err(Error::Platform(message));
        }

        match &self.shared.script {
            LogOnScript::Succeed => {
                sink.emit(ConnectionEvent::LoggedOn);
            }
            LogOnScript::Challenge(kind) => {
                let (responder, rx) = ChallengeResponder::pair();
                sink.emit(ConnectionEvent::ChallengeRequired {
                    kind: kind.clone(),
                    last_code_wrong: false,
                    responder,
                });
                let shared = Arc::clone(&self.shared);
                tokio::spawn(async move {
                    if let Ok(code) = rx.await {
                        shared
                            .state
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                            .answered_codes
                            .push(code);
                        sink.emit(ConnectionEvent::LoggedOn);
                    }
                });
            }
            LogOnScript::Silent => {}
        }
        Ok(())
    }

    async fn log_off(&self) -> Result<(), Error> {
        self.record(FakeCall::LogOff);
        Ok(())
    }

    async fn set_presence(&self, presence: PresenceState) -> Result<(), Error> {
        self.record(FakeCall::SetPresence(presence));
        Ok(())
    }

    async fn set_activities(&self, activities: &[Activity]) -> Result<(), Error> {
        let mut state = self.state();
        state.calls.push(FakeCall::SetActivities(activities.to_vec()));
        if state.fail_activities {
            return Err(Error::Platform("activities rejected".into()));
        }
        Ok(())
    }

    async fn owned_games(&self) -> Result<Vec<LibraryEntry>, Error> {
        let mut state = self.state();
        state.calls.push(FakeCall::OwnedGames);
        Ok(state.library.clone())
    }

    async fn accept_relationship(&self, peer_id: &str) -> Result<(), Error> {
        self.record(FakeCall::AcceptRelationship(peer_id.to_string()));
        Ok(())
    }
}
