// File: idlebot-common/src/models/account.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of an account's game list, exactly as it was submitted.
///
/// Entries may arrive as JSON numbers or as strings; only the ones that parse
/// as strictly positive app ids are ever pushed as activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GameEntry {
    Id(i64),
    Raw(String),
}

impl GameEntry {
    /// The app id this entry names, if it is a strictly positive integer.
    pub fn app_id(&self) -> Option<u32> {
        match self {
            GameEntry::Id(n) => u32::try_from(*n).ok().filter(|id| *id > 0),
            GameEntry::Raw(s) => s.trim().parse::<u32>().ok().filter(|id| *id > 0),
        }
    }
}

impl From<&str> for GameEntry {
    fn from(s: &str) -> Self {
        GameEntry::Raw(s.to_string())
    }
}

impl From<i64> for GameEntry {
    fn from(n: i64) -> Self {
        GameEntry::Id(n)
    }
}

/// Splits operator input such as `"730, 440 570"` into raw entries.
pub fn parse_game_list(input: &str) -> Vec<GameEntry> {
    input
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(GameEntry::from)
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub shared_secret: Option<String>,
    pub custom_activity_title: Option<String>,
    pub appear_offline: bool,
    pub auto_accept_relations: bool,
}

/// Durable account row. `secret` is always the vault-encrypted blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    pub username: String,
    pub secret: String,
    pub game_list: Vec<GameEntry>,
    pub settings: Settings,
    /// Last credential-renewal artifact reported by the worker (base64).
    pub sentry: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccountRecord {
    pub fn new(username: &str, encrypted_secret: String, game_list: Vec<GameEntry>) -> Self {
        let now = Utc::now();
        Self {
            username: username.to_string(),
            secret: encrypted_secret,
            game_list,
            settings: Settings::default(),
            sentry: None,
            created_at: now,
            updated_at: now,
        }
    }
}
