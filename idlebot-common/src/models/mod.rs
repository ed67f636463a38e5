// File: idlebot-common/src/models/mod.rs
pub mod account;
pub mod ipc;
pub mod status;

pub use account::{AccountRecord, GameEntry, Settings, parse_game_list};
pub use ipc::{
    ChallengeCode, MasterCommand, OwnedGamesUpdate, ReconnectPolicy, SentryUpdate, StatusUpdate,
    WorkerEvent, WorkerSeed, WorkerTuning,
};
pub use status::{AccountSnapshot, OwnedGame, WorkerStatus};
