// File: idlebot-common/src/models/status.rs

use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of one account's worker, as last reported over IPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "camelCase")]
pub enum WorkerStatus {
    Stopped,
    Connecting,
    AwaitingChallenge,
    Running,
    Error(String),
}

impl WorkerStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, WorkerStatus::Running)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, WorkerStatus::Stopped)
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerStatus::Stopped => write!(f, "stopped"),
            WorkerStatus::Connecting => write!(f, "connecting"),
            WorkerStatus::AwaitingChallenge => write!(f, "awaiting-challenge"),
            WorkerStatus::Running => write!(f, "running"),
            WorkerStatus::Error(reason) => write!(f, "error ({})", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedGame {
    pub id: u32,
    pub name: String,
}

/// Read-only projection of the master's live state for one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    pub username: String,
    pub status: WorkerStatus,
    pub session_start_time: Option<DateTime<Utc>>,
    pub sentry_hash: Option<String>,
    pub owned_games: Option<Vec<OwnedGame>>,
    pub worker_id: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_shape() {
        let json = serde_json::to_value(WorkerStatus::Error("boom".into())).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "error", "reason": "boom"}));

        let json = serde_json::to_value(WorkerStatus::AwaitingChallenge).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "awaitingChallenge"}));
    }
}
