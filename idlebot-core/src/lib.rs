// src/lib.rs

pub mod db;
pub mod repositories;
pub mod platforms;
pub mod crypto;
pub mod totp;
pub mod ipc;
pub mod worker;
pub mod orchestrator;
pub mod tasks;
pub mod test_utils;

pub use db::Database;
pub use idlebot_common::error::Error;
