use tracing::{error, info};

use crate::orchestrator::OrchestratorHandle;
use crate::repositories::AccountRepository;
use crate::Error;

/// Called at startup to spawn one worker per stored account. A failure for
/// one account is logged and does not stop the others.
///
/// Returns how many workers were started.
pub async fn run_autostart(
    repo: &dyn AccountRepository,
    orchestrator: &OrchestratorHandle,
) -> Result<usize, Error> {
    let records = repo.list().await?;

    if records.is_empty() {
        info!("No stored accounts found. Skipping autostart.");
        return Ok(0);
    }

    info!("Found {} stored accounts to start", records.len());

    let mut started = 0;
    for record in records {
        info!("Autostart: starting account='{}'", record.username);
        match orchestrator.start(&record.username).await {
            Ok(()) => started += 1,
            Err(e) => error!("Autostart failed for account='{}': {}", record.username, e),
        }
    }

    Ok(started)
}
