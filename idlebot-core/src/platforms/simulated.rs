// File: src/platforms/simulated.rs
//
// Stand-in remote service for local runs: accepts every login, can demand a
// challenge code first, and reports a small fixed library.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::Error;
use crate::platforms::{
    Activity, ChallengeKind, ChallengeResponder, ConnectionEvent, ConnectorFactory, EventSink,
    LibraryEntry, LogOnDetails, PresenceState, RemoteConnection,
};

#[derive(Debug, Clone)]
pub struct SimulatedOptions {
    pub require_challenge: bool,
    /// When set, any other code is answered with a fresh "wrong code" challenge.
    pub accepted_code: Option<String>,
    pub login_delay: Duration,
}

impl Default for SimulatedOptions {
    fn default() -> Self {
        Self {
            require_challenge: false,
            accepted_code: None,
            login_delay: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedConnector {
    options: SimulatedOptions,
}

impl SimulatedConnector {
    pub fn new(options: SimulatedOptions) -> Self {
        Self { options }
    }
}

impl ConnectorFactory for SimulatedConnector {
    fn connect(&self, username: &str) -> Arc<dyn RemoteConnection> {
        Arc::new(SimulatedConnection::new(username, self.options.clone()))
    }
}

pub struct SimulatedConnection {
    username: String,
    options: SimulatedOptions,
    login_task: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedConnection {
    pub fn new(username: &str, options: SimulatedOptions) -> Self {
        Self {
            username: username.to_string(),
            options,
            login_task: Mutex::new(None),
        }
    }

    fn replace_login_task(&self, task: Option<JoinHandle<()>>) {
        let mut guard = match self.login_task.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(old) = std::mem::replace(&mut *guard, task) {
            old.abort();
        }
    }
}

async fn simulate_login(options: SimulatedOptions, sink: EventSink) {
    tokio::time::sleep(options.login_delay).await;

    if options.require_challenge {
        let mut last_code_wrong = false;
        loop {
            let (responder, rx) = ChallengeResponder::pair();
            let asked = sink.emit(ConnectionEvent::ChallengeRequired {
                kind: ChallengeKind::Email { domain: "example.com".into() },
                last_code_wrong,
                responder,
            });
            if !asked {
                return;
            }
            let Ok(code) = rx.await else {
                debug!("[Simulated] challenge abandoned");
                return;
            };
            match &options.accepted_code {
                Some(expected) if *expected != code => last_code_wrong = true,
                _ => break,
            }
        }
    }

    sink.emit(ConnectionEvent::LoggedOn);
}

#[async_trait]
impl RemoteConnection for SimulatedConnection {
    async fn log_on(&self, details: &LogOnDetails, sink: EventSink) -> Result<(), Error> {
        info!("[Simulated] log on '{}' (session {})", details.username, sink.session());
        let task = tokio::spawn(simulate_login(self.options.clone(), sink));
        self.replace_login_task(Some(task));
        Ok(())
    }

    async fn log_off(&self) -> Result<(), Error> {
        info!("[Simulated] log off '{}'", self.username);
        self.replace_login_task(None);
        Ok(())
    }

    async fn set_presence(&self, presence: PresenceState) -> Result<(), Error> {
        debug!("[Simulated] '{}' presence => {:?}", self.username, presence);
        Ok(())
    }

    async fn set_activities(&self, activities: &[Activity]) -> Result<(), Error> {
        debug!("[Simulated] '{}' activities => {:?}", self.username, activities);
        Ok(())
    }

    async fn owned_games(&self) -> Result<Vec<LibraryEntry>, Error> {
        let entry = |app_id: u32, name: &str, playtime_minutes: u64| LibraryEntry {
            app_id,
            name: name.to_string(),
            playtime_minutes,
            icon_url: None,
            logo_url: None,
        };
        Ok(vec![
            entry(440, "Team Fortress 2", 1_250),
            entry(570, "Dota 2", 40),
            entry(730, "Counter-Strike 2", 9_800),
        ])
    }

    async fn accept_relationship(&self, peer_id: &str) -> Result<(), Error> {
        info!("[Simulated] '{}' accepted relationship from {}", self.username, peer_id);
        Ok(())
    }
}
