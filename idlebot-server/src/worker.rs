//! Worker process entry point: the IPC pipe is this process's stdin/stdout.

use tracing::{debug, info};

use idlebot_core::worker::run_worker;
use idlebot_core::Error;

use crate::WorkerArgs;

pub async fn run_worker_process(args: WorkerArgs) -> Result<(), Error> {
    info!("[Worker] process {} starting for '{}'", std::process::id(), args.username);

    // Ctrl-C in the terminal reaches the whole process group. The master
    // stops its workers itself, so a worker only logs the signal.
    tokio::spawn(async {
        while tokio::signal::ctrl_c().await.is_ok() {
            debug!("[Worker] interrupt received; waiting for the master's stop");
        }
    });

    let connector = args.connector.build(args.simulate_challenge);
    run_worker(tokio::io::stdin(), tokio::io::stdout(), connector).await
}
