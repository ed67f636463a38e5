// src/repositories/mod.rs

pub mod sqlite;

pub use idlebot_common::traits::repository_traits::AccountRepository;
pub use sqlite::SqliteAccountRepository;
