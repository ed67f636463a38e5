// File: idlebot-core/src/orchestrator/spawner.rs
//
// How the master gets a worker: a child process speaking over stdio, or (for
// tests and single-process runs) a task speaking over an in-memory pipe.

use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::platforms::ConnectorFactory;
use crate::worker::run_worker;
use crate::Error;

pub type WorkerReader = Pin<Box<dyn AsyncRead + Send>>;
pub type WorkerWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Buffer size of the in-memory pipe.
const DUPLEX_CAPACITY: usize = 64 * 1024;

pub enum WorkerProcess {
    Child(Child),
    Task(JoinHandle<Result<(), Error>>),
}

impl WorkerProcess {
    /// Waits for the worker to finish and describes how it ended.
    pub async fn wait(self) -> String {
        match self {
            WorkerProcess::Child(mut child) => match child.wait().await {
                Ok(status) => status.to_string(),
                Err(e) => format!("wait failed: {}", e),
            },
            WorkerProcess::Task(handle) => match handle.await {
                Ok(Ok(())) => "exited".to_string(),
                Ok(Err(e)) => format!("failed: {}", e),
                Err(e) => format!("task aborted: {}", e),
            },
        }
    }
}

pub struct SpawnedWorker {
    pub to_worker: WorkerWriter,
    pub from_worker: WorkerReader,
    pub process: WorkerProcess,
}

#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    async fn spawn(&self, username: &str) -> Result<SpawnedWorker, Error>;
}

/// Launches `program args... --username <name>` with piped stdin/stdout.
/// The worker's stderr is inherited so its logs land next to the master's.
pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessSpawner {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }
}

#[async_trait]
impl WorkerSpawner for ProcessSpawner {
    async fn spawn(&self, username: &str) -> Result<SpawnedWorker, Error> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg("--username")
            .arg(username)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::WorkerUnavailable("child has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::WorkerUnavailable("child has no stdout".into()))?;

        info!("[Spawner] worker process {:?} started for '{}'", child.id(), username);
        Ok(SpawnedWorker {
            to_worker: Box::pin(stdin),
            from_worker: Box::pin(stdout),
            process: WorkerProcess::Child(child),
        })
    }
}

/// Runs workers as tasks in this process, connected by `tokio::io::duplex`.
pub struct InProcessSpawner {
    connector: Arc<dyn ConnectorFactory>,
}

impl InProcessSpawner {
    pub fn new(connector: Arc<dyn ConnectorFactory>) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl WorkerSpawner for InProcessSpawner {
    async fn spawn(&self, username: &str) -> Result<SpawnedWorker, Error> {
        let (master_end, worker_end) = tokio::io::duplex(DUPLEX_CAPACITY);
        let (from_worker, to_worker) = tokio::io::split(master_end);
        let (worker_in, worker_out) = tokio::io::split(worker_end);

        let connector = Arc::clone(&self.connector);
        let task = tokio::spawn(run_worker(worker_in, worker_out, connector));
        debug!("[Spawner] in-process worker started for '{}'", username);

        Ok(SpawnedWorker {
            to_worker: Box::pin(to_worker),
            from_worker: Box::pin(from_worker),
            process: WorkerProcess::Task(task),
        })
    }
}
