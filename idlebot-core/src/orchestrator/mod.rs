// File: idlebot-core/src/orchestrator/mod.rs
//
// Master side of the system: the account registry, the actor that owns it,
// and the ways of spawning workers.

pub mod master;
pub mod registry;
pub mod spawner;

pub use master::{Orchestrator, OrchestratorHandle};
pub use registry::{AccountRegistry, LiveAccountState, WorkerHandle};
pub use spawner::{InProcessSpawner, ProcessSpawner, SpawnedWorker, WorkerProcess, WorkerSpawner};
