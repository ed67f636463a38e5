use async_trait::async_trait;
use crate::error::Error;
use crate::models::account::{AccountRecord, GameEntry, Settings};

/// Durable account catalog. Only the master talks to it; workers never do.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Fails with `Error::AlreadyExists` when the username is taken.
    async fn create(&self, record: &AccountRecord) -> Result<(), Error>;
    async fn get(&self, username: &str) -> Result<Option<AccountRecord>, Error>;
    async fn list(&self) -> Result<Vec<AccountRecord>, Error>;
    async fn update_settings(
        &self,
        username: &str,
        settings: &Settings,
        game_list: &[GameEntry],
    ) -> Result<(), Error>;
    async fn update_sentry(&self, username: &str, sentry: &str) -> Result<(), Error>;
    async fn delete(&self, username: &str) -> Result<(), Error>;
}
