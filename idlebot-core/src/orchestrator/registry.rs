// File: idlebot-core/src/orchestrator/registry.rs
//
// The master's view of every account. Owned by the orchestrator task alone;
// status here is whatever the worker last reported, never a guess.

use std::collections::HashMap;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use sha1::{Digest, Sha1};
use tokio::sync::mpsc;
use tracing::{debug, info};

use idlebot_common::models::{AccountSnapshot, MasterCommand, OwnedGame, WorkerEvent, WorkerStatus};
use crate::Error;

/// The master's end of one live worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    id: u64,
    commands: mpsc::UnboundedSender<MasterCommand>,
}

impl WorkerHandle {
    pub fn new(id: u64, commands: mpsc::UnboundedSender<MasterCommand>) -> Self {
        Self { id, commands }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn send(&self, cmd: MasterCommand) -> Result<(), Error> {
        let name = cmd.type_name();
        self.commands
            .send(cmd)
            .map_err(|_| Error::WorkerUnavailable(format!("worker {} is gone ('{}' not sent)", self.id, name)))
    }
}

#[derive(Debug)]
pub struct LiveAccountState {
    pub username: String,
    pub status: WorkerStatus,
    pub session_start_time: Option<DateTime<Utc>>,
    pub sentry_hash: Option<String>,
    pub owned_games: Option<Vec<OwnedGame>>,
    worker: Option<WorkerHandle>,
    /// `stop` went to the live worker; it is on its way out.
    stop_sent: bool,
    /// A `start` arrived while stopping; launch again once the worker is gone.
    restart_pending: bool,
}

impl LiveAccountState {
    fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            status: WorkerStatus::Stopped,
            session_start_time: None,
            sentry_hash: None,
            owned_games: None,
            worker: None,
            stop_sent: false,
            restart_pending: false,
        }
    }

    pub fn worker(&self) -> Option<&WorkerHandle> {
        self.worker.as_ref()
    }

    pub fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            username: self.username.clone(),
            status: self.status.clone(),
            session_start_time: self.session_start_time,
            sentry_hash: self.sentry_hash.clone(),
            owned_games: self.owned_games.clone(),
            worker_id: self.worker.as_ref().map(WorkerHandle::id),
        }
    }
}

/// Hex SHA-1 of the decoded artifact (or of the raw text if it is not base64).
pub fn sentry_hash(sentry_b64: &str) -> String {
    let digest = match BASE64.decode(sentry_b64.trim()) {
        Ok(bytes) => Sha1::digest(&bytes),
        Err(_) => Sha1::digest(sentry_b64.as_bytes()),
    };
    hex::encode(digest)
}

#[derive(Debug, Default)]
pub struct AccountRegistry {
    accounts: HashMap<String, LiveAccountState>,
}

impl AccountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a `Stopped` entry unless one exists already.
    pub fn register(&mut self, username: &str) {
        self.accounts
            .entry(username.to_string())
            .or_insert_with(|| LiveAccountState::new(username));
    }

    pub fn contains(&self, username: &str) -> bool {
        self.accounts.contains_key(username)
    }

    pub fn get(&self, username: &str) -> Option<&LiveAccountState> {
        self.accounts.get(username)
    }

    pub fn worker(&self, username: &str) -> Option<&WorkerHandle> {
        self.accounts.get(username).and_then(LiveAccountState::worker)
    }

    /// Records a freshly spawned worker. At most one may be live per account.
    pub fn attach_worker(&mut self, username: &str, handle: WorkerHandle) -> Result<(), Error> {
        let state = self
            .accounts
            .get_mut(username)
            .ok_or_else(|| Error::NotFound(format!("account '{}'", username)))?;
        if let Some(existing) = &state.worker {
            return Err(Error::AlreadyExists(format!(
                "worker {} is already live for '{}'",
                existing.id, username
            )));
        }
        state.worker = Some(handle);
        state.stop_sent = false;
        state.restart_pending = false;
        Ok(())
    }

    /// Notes that the live worker was told to stop. Cancels a deferred restart.
    pub fn mark_stop_sent(&mut self, username: &str) {
        if let Some(state) = self.accounts.get_mut(username) {
            if state.worker.is_some() {
                state.stop_sent = true;
            }
            state.restart_pending = false;
        }
    }

    /// True while the live worker has been told to stop but has not closed.
    pub fn is_stopping(&self, username: &str) -> bool {
        self.accounts
            .get(username)
            .is_some_and(|s| s.worker.is_some() && s.stop_sent)
    }

    /// Asks for a fresh worker once the stopping one closes.
    pub fn defer_restart(&mut self, username: &str) {
        if let Some(state) = self.accounts.get_mut(username) {
            state.restart_pending = true;
        }
    }

    /// Returns and clears the deferred restart flag.
    pub fn take_restart(&mut self, username: &str) -> bool {
        self.accounts
            .get_mut(username)
            .is_some_and(|s| std::mem::take(&mut s.restart_pending))
    }

    /// Applies an event from worker `worker_id`. Events from any worker other
    /// than the live one are dropped; returns whether it was applied.
    pub fn apply_event(&mut self, username: &str, worker_id: u64, event: &WorkerEvent) -> bool {
        let Some(state) = self.accounts.get_mut(username) else {
            debug!("[Registry] event for unknown account '{}'", username);
            return false;
        };
        if state.worker.as_ref().map(WorkerHandle::id) != Some(worker_id) {
            debug!("[Registry] dropping '{}' from superseded worker {}", event.type_name(), worker_id);
            return false;
        }

        match event {
            WorkerEvent::StatusUpdate(update) => {
                state.status = update.status.clone();
                state.session_start_time = if update.status.is_running() {
                    update.session_start_time
                } else {
                    None
                };
                info!("[Registry] '{}' is now {}", username, state.status);
            }
            WorkerEvent::OwnedGamesUpdate(update) => {
                state.owned_games = Some(update.games.clone());
            }
            WorkerEvent::SentryUpdate(update) => {
                state.sentry_hash = Some(sentry_hash(&update.sentry));
            }
        }
        true
    }

    /// Clears the live worker after its pipe closed. Only the live worker's
    /// closure counts.
    pub fn worker_closed(&mut self, username: &str, worker_id: u64) -> bool {
        let Some(state) = self.accounts.get_mut(username) else {
            return false;
        };
        if state.worker.as_ref().map(WorkerHandle::id) != Some(worker_id) {
            return false;
        }
        state.worker = None;
        state.stop_sent = false;
        state.status = WorkerStatus::Stopped;
        state.session_start_time = None;
        true
    }

    pub fn live_workers(&self) -> impl Iterator<Item = &WorkerHandle> {
        self.accounts.values().filter_map(LiveAccountState::worker)
    }

    pub fn live_count(&self) -> usize {
        self.live_workers().count()
    }

    /// All accounts, ordered by username.
    pub fn snapshots(&self) -> Vec<AccountSnapshot> {
        let mut all: Vec<_> = self.accounts.values().map(LiveAccountState::snapshot).collect();
        all.sort_by(|a, b| a.username.cmp(&b.username));
        all
    }
}
