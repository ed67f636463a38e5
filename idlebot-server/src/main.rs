use std::sync::Arc;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use idlebot_common::models::{ReconnectPolicy, WorkerTuning};
use idlebot_core::platforms::simulated::{SimulatedConnector, SimulatedOptions};
use idlebot_core::platforms::ConnectorFactory;

mod console;
mod context;
mod server;
mod worker;

#[derive(Parser, Debug, Clone)]
#[command(name = "idlebot")]
#[command(author, version, about = "idlebot - keeps many accounts signed in and idling, one worker process each")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the master: account store, orchestrator and operator console.
    Serve(ServeArgs),
    /// Run a single account worker over stdin/stdout. Spawned by `serve`.
    Worker(WorkerArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    /// SQLite database file (":memory:" for a throwaway store).
    #[arg(long, default_value = "data/idlebot.db")]
    pub db_path: String,

    #[arg(long, value_enum, default_value_t = ConnectorKind::Simulated)]
    pub connector: ConnectorKind,

    /// Make the simulated service ask for a challenge code on every login.
    #[arg(long, default_value = "false")]
    pub simulate_challenge: bool,

    #[arg(long, value_enum, default_value_t = ReconnectMode::Fixed)]
    pub reconnect: ReconnectMode,

    /// Do not start stored accounts on boot.
    #[arg(long, default_value = "false")]
    pub no_autostart: bool,

    /// Run workers as tasks inside this process instead of child processes.
    #[arg(long, default_value = "false")]
    pub in_process: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct WorkerArgs {
    #[arg(long)]
    pub username: String,

    #[arg(long, value_enum, default_value_t = ConnectorKind::Simulated)]
    pub connector: ConnectorKind,

    #[arg(long, default_value = "false")]
    pub simulate_challenge: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorKind {
    Simulated,
}

impl ConnectorKind {
    pub fn build(self, simulate_challenge: bool) -> Arc<dyn ConnectorFactory> {
        match self {
            ConnectorKind::Simulated => Arc::new(SimulatedConnector::new(SimulatedOptions {
                require_challenge: simulate_challenge,
                ..Default::default()
            })),
        }
    }

    pub fn as_arg(self) -> &'static str {
        match self {
            ConnectorKind::Simulated => "simulated",
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectMode {
    /// Retry every 60 seconds.
    Fixed,
    /// Jittered exponential backoff from 60 seconds up to 30 minutes.
    Backoff,
}

impl ReconnectMode {
    pub fn tuning(self) -> WorkerTuning {
        let reconnect = match self {
            ReconnectMode::Fixed => ReconnectPolicy::default(),
            ReconnectMode::Backoff => ReconnectPolicy::Backoff { base_secs: 60, max_secs: 30 * 60 },
        };
        WorkerTuning { reconnect, ..WorkerTuning::default() }
    }
}

/// Workers log to stderr: their stdout is the IPC pipe.
fn init_tracing(to_stderr: bool) {
    let filter = EnvFilter::from_default_env()
        .add_directive("idlebot=info".parse().unwrap_or_default());
    let result = if to_stderr {
        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
    } else {
        fmt().with_env_filter(filter).try_init()
    };
    if let Err(e) = result {
        eprintln!("tracing already initialised: {e}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let result = match args.command {
        Command::Serve(serve_args) => {
            init_tracing(false);
            info!("idlebot starting. db={}, connector={:?}", serve_args.db_path, serve_args.connector);
            server::run_server(serve_args).await
        }
        Command::Worker(worker_args) => {
            init_tracing(true);
            worker::run_worker_process(worker_args).await
        }
    };

    // A pending blocking read on stdin would keep the runtime from shutting
    // down, so leave explicitly.
    match result {
        Ok(()) => {
            info!("Main finished. Goodbye!");
            std::process::exit(0);
        }
        Err(e) => {
            error!("Fatal: {:?}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_subcommand_parses() {
        let args = Args::try_parse_from(["idlebot", "worker", "--username", "alice", "--simulate-challenge"])
            .unwrap();
        match args.command {
            Command::Worker(w) => {
                assert_eq!(w.username, "alice");
                assert!(w.simulate_challenge);
                assert_eq!(w.connector, ConnectorKind::Simulated);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn serve_defaults() {
        let args = Args::try_parse_from(["idlebot", "serve"]).unwrap();
        let Command::Serve(s) = args.command else { panic!("expected serve") };
        assert_eq!(s.db_path, "data/idlebot.db");
        assert_eq!(s.reconnect, ReconnectMode::Fixed);
        assert!(!s.no_autostart);
    }

    #[test]
    fn backoff_mode_maps_to_policy() {
        let tuning = ReconnectMode::Backoff.tuning();
        assert_eq!(tuning.reconnect, ReconnectPolicy::Backoff { base_secs: 60, max_secs: 1800 });
        assert_eq!(tuning.heartbeat_interval_secs, 600);
    }
}
