//! Master process: context, autostart, console, and orderly shutdown.

use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use idlebot_core::tasks::run_autostart;
use idlebot_core::Error;

use crate::console::run_console;
use crate::context::ServerContext;
use crate::ServeArgs;

/// How long workers get to log off before the master gives up on them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub async fn run_server(args: ServeArgs) -> Result<(), Error> {
    let ctx = ServerContext::new(&args).await?;

    if args.no_autostart {
        info!("Autostart disabled.");
    } else {
        match run_autostart(ctx.repo.as_ref(), &ctx.orchestrator).await {
            Ok(n) => info!("Autostart launched {} workers.", n),
            Err(e) => error!("Autostart error: {}", e),
        }
    }

    let (quit_tx, mut quit_rx) = watch::channel(false);
    let console_task = tokio::spawn(run_console(ctx.orchestrator.clone(), ctx.repo.clone(), quit_tx.clone()));

    let ctrl_c_tx = quit_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {:?}", e);
            return;
        }
        info!("Ctrl-C received; shutting down.");
        let _ = ctrl_c_tx.send(true);
    });

    while !*quit_rx.borrow() {
        if quit_rx.changed().await.is_err() {
            break;
        }
    }

    console_task.abort();
    match tokio::time::timeout(SHUTDOWN_GRACE, ctx.orchestrator.shutdown()).await {
        Ok(Ok(())) => info!("All workers stopped."),
        Ok(Err(e)) => warn!("Shutdown error: {}", e),
        Err(_) => warn!("Workers did not stop within {:?}; exiting anyway.", SHUTDOWN_GRACE),
    }
    ctx.orchestrator_task.abort();
    ctx.db.pool().close().await;
    Ok(())
}
