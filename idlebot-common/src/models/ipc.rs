// File: idlebot-common/src/models/ipc.rs
//
// Message schema spoken between the master and one worker. Every message is a
// tagged union `{ "type": ..., "payload": ... }`; commands flow master → worker,
// events flow worker → master.

use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::account::{GameEntry, Settings};
use crate::models::status::{OwnedGame, WorkerStatus};

/// How long a worker waits before retrying a failed login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum ReconnectPolicy {
    #[serde(rename_all = "camelCase")]
    Fixed { delay_secs: u64 },
    /// Doubling delay from `base_secs` up to `max_secs`, jittered.
    #[serde(rename_all = "camelCase")]
    Backoff { base_secs: u64, max_secs: u64 },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Fixed { delay_secs: 60 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerTuning {
    pub heartbeat_interval_secs: u64,
    pub reconnect: ReconnectPolicy,
}

impl Default for WorkerTuning {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 10 * 60,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Everything a worker needs to run one account. Sent once, right after spawn.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSeed {
    pub username: String,
    pub password: String,
    pub game_list: Vec<GameEntry>,
    pub settings: Settings,
    #[serde(default)]
    pub tuning: WorkerTuning,
}

impl fmt::Debug for WorkerSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerSeed")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("game_list", &self.game_list)
            .field("tuning", &self.tuning)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeCode {
    pub code: String,
}

impl fmt::Debug for ChallengeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChallengeCode(<redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum MasterCommand {
    Seed(WorkerSeed),
    Start,
    Stop,
    SupplyChallengeCode(ChallengeCode),
}

impl MasterCommand {
    pub fn type_name(&self) -> &'static str {
        match self {
            MasterCommand::Seed(_) => "seed",
            MasterCommand::Start => "start",
            MasterCommand::Stop => "stop",
            MasterCommand::SupplyChallengeCode(_) => "supplyChallengeCode",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub status: WorkerStatus,
    pub session_start_time: Option<DateTime<Utc>>,
}

impl StatusUpdate {
    /// Builds an update whose session start is present only while running.
    pub fn new(status: WorkerStatus, session_start_time: Option<DateTime<Utc>>) -> Self {
        let session_start_time = if status.is_running() { session_start_time } else { None };
        Self { status, session_start_time }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnedGamesUpdate {
    pub games: Vec<OwnedGame>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentryUpdate {
    /// Base64 of the opaque artifact, forwarded verbatim.
    pub sentry: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum WorkerEvent {
    StatusUpdate(StatusUpdate),
    OwnedGamesUpdate(OwnedGamesUpdate),
    SentryUpdate(SentryUpdate),
}

impl WorkerEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            WorkerEvent::StatusUpdate(_) => "statusUpdate",
            WorkerEvent::OwnedGamesUpdate(_) => "ownedGamesUpdate",
            WorkerEvent::SentryUpdate(_) => "sentryUpdate",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn commands_are_type_payload_unions() {
        let cmd = MasterCommand::SupplyChallengeCode(ChallengeCode { code: "ABCDE".into() });
        assert_eq!(
            serde_json::to_value(&cmd).unwrap(),
            json!({"type": "supplyChallengeCode", "payload": {"code": "ABCDE"}})
        );
        assert_eq!(serde_json::to_value(MasterCommand::Stop).unwrap(), json!({"type": "stop"}));

        let parsed: MasterCommand = serde_json::from_value(json!({"type": "start"})).unwrap();
        assert_eq!(parsed, MasterCommand::Start);
    }

    #[test]
    fn status_update_drops_session_start_unless_running() {
        let now = Utc::now();
        let update = StatusUpdate::new(WorkerStatus::Error("x".into()), Some(now));
        assert!(update.session_start_time.is_none());

        let update = StatusUpdate::new(WorkerStatus::Running, Some(now));
        assert_eq!(update.session_start_time, Some(now));
    }

    #[test]
    fn seed_debug_hides_password() {
        let seed = WorkerSeed {
            username: "alice".into(),
            password: "hunter2".into(),
            game_list: vec![],
            settings: Settings::default(),
            tuning: WorkerTuning::default(),
        };
        let rendered = format!("{:?}", seed);
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn event_wire_shape() {
        let ev = WorkerEvent::SentryUpdate(SentryUpdate { sentry: "AAEC".into() });
        assert_eq!(
            serde_json::to_value(&ev).unwrap(),
            json!({"type": "sentryUpdate", "payload": {"sentry": "AAEC"}})
        );
    }
}
