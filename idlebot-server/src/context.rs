//! idlebot-server/src/context.rs
//!
//! Defines the main context (ServerContext) for the master process.

use std::sync::Arc;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use keyring::Entry;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use idlebot_core::crypto::{Encryptor, KEY_LEN};
use idlebot_core::db::Database;
use idlebot_core::orchestrator::{InProcessSpawner, Orchestrator, OrchestratorHandle, ProcessSpawner, WorkerSpawner};
use idlebot_core::repositories::{AccountRepository, SqliteAccountRepository};
use idlebot_core::Error;

use crate::ServeArgs;

const MASTER_KEY_ENV: &str = "IDLEBOT_MASTER_KEY";
const KEYRING_SERVICE: &str = "idlebot";
const KEYRING_USER: &str = "master-key";

/// Everything the master needs, built once at startup.
pub struct ServerContext {
    pub db: Database,
    pub repo: Arc<dyn AccountRepository>,
    pub orchestrator: OrchestratorHandle,
    pub orchestrator_task: JoinHandle<()>,
}

impl ServerContext {
    pub async fn new(args: &ServeArgs) -> Result<Self, Error> {
        let db = Database::new(&args.db_path).await?;
        db.migrate().await?;

        let vault = Encryptor::new(&get_master_key()?)?;
        let repo: Arc<dyn AccountRepository> = Arc::new(SqliteAccountRepository::new(db.pool().clone()));
        let spawner = build_spawner(args)?;

        let (orchestrator, handle) = Orchestrator::new(
            repo.clone(),
            vault,
            spawner,
            args.reconnect.tuning(),
        );
        let orchestrator_task = orchestrator.spawn();

        Ok(Self {
            db,
            repo,
            orchestrator: handle,
            orchestrator_task,
        })
    }
}

fn build_spawner(args: &ServeArgs) -> Result<Arc<dyn WorkerSpawner>, Error> {
    if args.in_process {
        info!("Workers will run in-process.");
        return Ok(Arc::new(InProcessSpawner::new(args.connector.build(args.simulate_challenge))));
    }

    let program = std::env::current_exe()?;
    let mut worker_args = vec![
        "worker".to_string(),
        "--connector".to_string(),
        args.connector.as_arg().to_string(),
    ];
    if args.simulate_challenge {
        worker_args.push("--simulate-challenge".to_string());
    }
    Ok(Arc::new(ProcessSpawner::new(program, worker_args)))
}

/// The vault key: `IDLEBOT_MASTER_KEY` if set, otherwise the OS keyring,
/// generating and storing a new key on first run.
fn get_master_key() -> Result<[u8; KEY_LEN], Error> {
    if let Ok(encoded) = std::env::var(MASTER_KEY_ENV) {
        info!("Using master key from {}.", MASTER_KEY_ENV);
        return decode_key(&encoded);
    }

    let entry = Entry::new(KEYRING_SERVICE, KEYRING_USER)
        .map_err(|e| Error::KeyDerivation(format!("keyring unavailable: {e}")))?;

    match entry.get_password() {
        Ok(base64_key) => {
            info!("Retrieved existing master key from keyring.");
            decode_key(&base64_key)
        }
        Err(e) => {
            info!("No existing key found ({}). Generating a new 32-byte key...", e);
            let new_key = Encryptor::generate_key()?;
            if let Err(err) = entry.set_password(&BASE64.encode(new_key)) {
                warn!(
                    "Failed to store key in keyring: {}. Accounts added this run will not decrypt after a restart.",
                    err
                );
            } else {
                info!("Stored new master key in keyring.");
            }
            Ok(new_key)
        }
    }
}

fn decode_key(encoded: &str) -> Result<[u8; KEY_LEN], Error> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| Error::KeyDerivation(format!("failed to decode key: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| Error::KeyDerivation(format!("stored key was not {} bytes", KEY_LEN)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_key_checks_length() {
        let good = BASE64.encode([1u8; KEY_LEN]);
        assert_eq!(decode_key(&good).unwrap(), [1u8; KEY_LEN]);
        assert!(matches!(decode_key("AAEC"), Err(Error::KeyDerivation(_))));
        assert!(matches!(decode_key("%%%"), Err(Error::KeyDerivation(_))));
    }
}
