// File: idlebot-core/src/test_utils/helpers.rs

use std::sync::Arc;

use crate::crypto::Encryptor;
use crate::db::Database;
use crate::repositories::SqliteAccountRepository;
use crate::Error;

/// Fixed vault key for tests.
pub const TEST_KEY: [u8; 32] = [7u8; 32];

/// Returns a migrated, empty in-memory database.
pub async fn setup_test_database() -> Result<Database, Error> {
    let db = Database::new(":memory:").await?;
    db.migrate().await?;
    Ok(db)
}

pub async fn setup_test_repository() -> Result<Arc<SqliteAccountRepository>, Error> {
    let db = setup_test_database().await?;
    Ok(Arc::new(SqliteAccountRepository::new(db.pool().clone())))
}

pub fn test_encryptor() -> Encryptor {
    // The key length is fixed, so this cannot fail.
    Encryptor::new(&TEST_KEY).unwrap_or_else(|e| panic!("test key rejected: {e}"))
}
