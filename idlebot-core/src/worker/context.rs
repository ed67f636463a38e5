// File: idlebot-core/src/worker/context.rs

use std::fmt;
use std::time::Duration;

use idlebot_common::models::{GameEntry, Settings, WorkerSeed, WorkerTuning};
use crate::platforms::LogOnDetails;

/// Per-account configuration, fixed for the lifetime of one worker.
///
/// Built from the seed the master sends right after spawning; changing
/// settings means starting a new worker.
#[derive(Clone)]
pub struct WorkerContext {
    pub username: String,
    password: String,
    pub game_list: Vec<GameEntry>,
    pub settings: Settings,
    pub tuning: WorkerTuning,
}

impl WorkerContext {
    pub fn log_on_details(&self) -> LogOnDetails {
        LogOnDetails {
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.tuning.heartbeat_interval_secs.max(1))
    }

    pub fn shared_secret(&self) -> Option<&str> {
        self.settings
            .shared_secret
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

impl From<WorkerSeed> for WorkerContext {
    fn from(seed: WorkerSeed) -> Self {
        Self {
            username: seed.username,
            password: seed.password,
            game_list: seed.game_list,
            settings: seed.settings,
            tuning: seed.tuning,
        }
    }
}

impl fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("username", &self.username)
            .field("game_list", &self.game_list)
            .field("appear_offline", &self.settings.appear_offline)
            .field("tuning", &self.tuning)
            .finish_non_exhaustive()
    }
}
