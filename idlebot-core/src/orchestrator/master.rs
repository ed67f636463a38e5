// File: idlebot-core/src/orchestrator/master.rs
//
// The master: a single task that owns the registry, spawns workers, relays
// admin commands to them and folds their events back into the registry.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument, info_span};

use idlebot_common::models::{
    AccountRecord, AccountSnapshot, ChallengeCode, GameEntry, MasterCommand, Settings,
    WorkerEvent, WorkerSeed, WorkerStatus, WorkerTuning,
};
use crate::crypto::Encryptor;
use crate::ipc::{self, IpcReader};
use crate::orchestrator::registry::{AccountRegistry, WorkerHandle};
use crate::orchestrator::spawner::{SpawnedWorker, WorkerProcess, WorkerReader, WorkerSpawner};
use crate::repositories::AccountRepository;
use crate::Error;

/// Capacity of the admin request queue.
const REQUEST_QUEUE: usize = 64;

type Reply<T> = oneshot::Sender<Result<T, Error>>;

enum Request {
    AddAccount { username: String, password: String, game_list: Vec<GameEntry>, reply: Reply<()> },
    Start { username: String, reply: Reply<()> },
    Stop { username: String, reply: Reply<()> },
    SupplyChallengeCode { username: String, code: String, reply: Reply<()> },
    UpdateSettings { username: String, settings: Settings, game_list: Vec<GameEntry>, reply: Reply<()> },
    ListAccounts { reply: oneshot::Sender<Vec<AccountSnapshot>> },
    Shutdown { reply: oneshot::Sender<()> },
}

/// Traffic from the per-worker reader tasks.
enum Inbound {
    Event { username: String, worker_id: u64, event: WorkerEvent },
    Closed { username: String, worker_id: u64, exit: String },
}

/// Cloneable client for the orchestrator task.
#[derive(Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::Sender<Request>,
}

impl OrchestratorHandle {
    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Request) -> Result<T, Error> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| Error::WorkerUnavailable("orchestrator is not running".into()))?;
        rx.await
            .map_err(|_| Error::WorkerUnavailable("orchestrator dropped the request".into()))?
    }

    /// Stores a new account (password encrypted) and starts its worker.
    pub async fn add_account(&self, username: &str, password: &str, game_list: Vec<GameEntry>) -> Result<(), Error> {
        let (username, password) = (username.to_string(), password.to_string());
        self.call(|reply| Request::AddAccount { username, password, game_list, reply })
            .await
    }

    pub async fn start(&self, username: &str) -> Result<(), Error> {
        let username = username.to_string();
        self.call(|reply| Request::Start { username, reply }).await
    }

    pub async fn stop(&self, username: &str) -> Result<(), Error> {
        let username = username.to_string();
        self.call(|reply| Request::Stop { username, reply }).await
    }

    /// Forwards a second-factor code. Rejected unless the account is
    /// currently awaiting one.
    pub async fn supply_challenge_code(&self, username: &str, code: &str) -> Result<(), Error> {
        let (username, code) = (username.to_string(), code.trim().to_string());
        self.call(|reply| Request::SupplyChallengeCode { username, code, reply })
            .await
    }

    /// Persists new settings and game list; they apply when the account's
    /// worker is next started.
    pub async fn update_settings(&self, username: &str, settings: Settings, game_list: Vec<GameEntry>) -> Result<(), Error> {
        let username = username.to_string();
        self.call(|reply| Request::UpdateSettings { username, settings, game_list, reply })
            .await
    }

    pub async fn list_accounts(&self) -> Result<Vec<AccountSnapshot>, Error> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::ListAccounts { reply })
            .await
            .map_err(|_| Error::WorkerUnavailable("orchestrator is not running".into()))?;
        rx.await
            .map_err(|_| Error::WorkerUnavailable("orchestrator dropped the request".into()))
    }

    /// Stops every worker, waits for their pipes to close, then ends the task.
    pub async fn shutdown(&self) -> Result<(), Error> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Shutdown { reply })
            .await
            .map_err(|_| Error::WorkerUnavailable("orchestrator is not running".into()))?;
        rx.await
            .map_err(|_| Error::WorkerUnavailable("orchestrator stopped before confirming".into()))
    }
}

pub struct Orchestrator {
    registry: AccountRegistry,
    repo: Arc<dyn AccountRepository>,
    vault: Encryptor,
    spawner: Arc<dyn WorkerSpawner>,
    tuning: WorkerTuning,
    requests: mpsc::Receiver<Request>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    next_worker_id: u64,
    shutting_down: bool,
    shutdown_waiters: Vec<oneshot::Sender<()>>,
}

impl Orchestrator {
    pub fn new(
        repo: Arc<dyn AccountRepository>,
        vault: Encryptor,
        spawner: Arc<dyn WorkerSpawner>,
        tuning: WorkerTuning,
    ) -> (Self, OrchestratorHandle) {
        let (tx, requests) = mpsc::channel(REQUEST_QUEUE);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let orchestrator = Self {
            registry: AccountRegistry::new(),
            repo,
            vault,
            spawner,
            tuning,
            requests,
            inbound_tx,
            inbound_rx,
            next_worker_id: 0,
            shutting_down: false,
            shutdown_waiters: Vec::new(),
        };
        (orchestrator, OrchestratorHandle { tx })
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Loads every stored account into the registry as `Stopped`.
    pub async fn load_accounts(&mut self) -> Result<usize, Error> {
        let records = self.repo.list().await?;
        for record in &records {
            self.registry.register(&record.username);
        }
        Ok(records.len())
    }

    pub async fn run(mut self) {
        match self.load_accounts().await {
            Ok(n) => info!("[Orchestrator] {} stored accounts loaded", n),
            Err(e) => error!("[Orchestrator] could not load accounts: {}", e),
        }

        let mut accepting = true;
        loop {
            if (self.shutting_down || !accepting) && self.registry.live_count() == 0 {
                break;
            }

            tokio::select! {
                request = self.requests.recv(), if accepting => match request {
                    Some(request) => self.handle_request(request).await,
                    None => {
                        info!("[Orchestrator] all handles dropped; shutting down");
                        accepting = false;
                        self.begin_shutdown();
                    }
                },
                Some(inbound) = self.inbound_rx.recv() => self.handle_inbound(inbound).await,
            }
        }

        for waiter in self.shutdown_waiters.drain(..) {
            let _ = waiter.send(());
        }
        info!("[Orchestrator] stopped");
    }

    async fn handle_request(&mut self, request: Request) {
        if self.shutting_down {
            if let Some(rejected) = self.reject_while_shutting_down(request) {
                self.shutdown_waiters.push(rejected);
            }
            return;
        }
        match request {
            Request::AddAccount { username, password, game_list, reply } => {
                let result = self.add_account(&username, &password, game_list).await;
                let _ = reply.send(result);
            }
            Request::Start { username, reply } => {
                let _ = reply.send(self.start(&username).await);
            }
            Request::Stop { username, reply } => {
                let _ = reply.send(self.stop(&username).await);
            }
            Request::SupplyChallengeCode { username, code, reply } => {
                let _ = reply.send(self.supply_challenge_code(&username, code));
            }
            Request::UpdateSettings { username, settings, game_list, reply } => {
                let result = self.repo.update_settings(&username, &settings, &game_list).await;
                if result.is_ok() {
                    info!("[Orchestrator] settings for '{}' saved; they apply on next start", username);
                }
                let _ = reply.send(result);
            }
            Request::ListAccounts { reply } => {
                let _ = reply.send(self.registry.snapshots());
            }
            Request::Shutdown { reply } => {
                self.shutdown_waiters.push(reply);
                self.begin_shutdown();
            }
        }
    }

    async fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Event { username, worker_id, event } => {
                if !self.registry.apply_event(&username, worker_id, &event) {
                    return;
                }
                if let WorkerEvent::SentryUpdate(update) = &event {
                    match self.repo.update_sentry(&username, &update.sentry).await {
                        Ok(()) => debug!("[Orchestrator] sentry for '{}' persisted", username),
                        Err(e) => warn!("[Orchestrator] could not persist sentry for '{}': {}", username, e),
                    }
                }
            }
            Inbound::Closed { username, worker_id, exit } => {
                if self.registry.worker_closed(&username, worker_id) {
                    info!("[Orchestrator] worker {} for '{}' ended ({})", worker_id, username, exit);
                    if self.registry.take_restart(&username) && !self.shutting_down {
                        if let Err(e) = self.start(&username).await {
                            warn!("[Orchestrator] deferred start of '{}' failed: {}", username, e);
                        }
                    }
                } else {
                    debug!("[Orchestrator] superseded worker {} for '{}' ended", worker_id, username);
                }
            }
        }
    }

    async fn add_account(&mut self, username: &str, password: &str, game_list: Vec<GameEntry>) -> Result<(), Error> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(Error::Parse("username and password are required".into()));
        }
        if self.registry.contains(username) {
            return Err(Error::AlreadyExists(format!("account '{}'", username)));
        }

        let record = AccountRecord::new(username, self.vault.encrypt(password)?, game_list);
        self.repo.create(&record).await?;
        self.registry.register(username);
        info!("[Orchestrator] account '{}' added", username);

        self.launch(record).await
    }

    async fn start(&mut self, username: &str) -> Result<(), Error> {
        if self.registry.is_stopping(username) {
            // The live worker is exiting and would drop the command.
            info!("[Orchestrator] '{}' is stopping; it will be started again once its worker exits", username);
            self.registry.defer_restart(username);
            return Ok(());
        }
        if let Some(worker) = self.registry.worker(username) {
            // Already live; the worker ignores this unless it is in error.
            return worker.send(MasterCommand::Start);
        }
        let record = self
            .repo
            .get(username)
            .await?
            .ok_or_else(|| Error::NotFound(format!("account '{}'", username)))?;
        self.registry.register(username);
        self.launch(record).await
    }

    async fn stop(&mut self, username: &str) -> Result<(), Error> {
        if !self.registry.contains(username) {
            return Err(Error::NotFound(format!("account '{}'", username)));
        }
        match self.registry.worker(username) {
            Some(worker) => {
                worker.send(MasterCommand::Stop)?;
                self.registry.mark_stop_sent(username);
                Ok(())
            }
            None => {
                debug!("[Orchestrator] '{}' has no live worker", username);
                Ok(())
            }
        }
    }

    fn supply_challenge_code(&self, username: &str, code: String) -> Result<(), Error> {
        let state = self
            .registry
            .get(username)
            .ok_or_else(|| Error::NotFound(format!("account '{}'", username)))?;
        match (&state.status, state.worker()) {
            (WorkerStatus::AwaitingChallenge, Some(worker)) => {
                worker.send(MasterCommand::SupplyChallengeCode(ChallengeCode { code }))
            }
            _ => Err(Error::NoPendingChallenge(username.to_string())),
        }
    }

    /// Spawns, wires and seeds a worker for `record`, then tells it to start.
    async fn launch(&mut self, record: AccountRecord) -> Result<(), Error> {
        let password = self.vault.decrypt(&record.secret)?;
        let SpawnedWorker { to_worker, from_worker, process } =
            self.spawner.spawn(&record.username).await?;

        self.next_worker_id += 1;
        let worker_id = self.next_worker_id;
        let username = record.username.clone();

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let span = info_span!("worker_pipe", account = %username, worker_id);
        tokio::spawn(
            async move {
                if let Err(e) = ipc::pump(to_worker, cmd_rx, format!("worker {}", worker_id)).await {
                    debug!("[Orchestrator] command pipe closed: {}", e);
                }
            }
            .instrument(span.clone()),
        );
        tokio::spawn(
            read_worker_events(from_worker, process, username.clone(), worker_id, self.inbound_tx.clone())
                .instrument(span),
        );

        let handle = WorkerHandle::new(worker_id, cmd_tx);
        handle.send(MasterCommand::Seed(WorkerSeed {
            username: username.clone(),
            password,
            game_list: record.game_list,
            settings: record.settings,
            tuning: self.tuning,
        }))?;
        handle.send(MasterCommand::Start)?;
        self.registry.attach_worker(&username, handle)?;

        info!("[Orchestrator] worker {} launched for '{}'", worker_id, username);
        Ok(())
    }

    /// Answers requests that arrive during shutdown. Another shutdown request
    /// is handed back so it can wait with the first.
    fn reject_while_shutting_down(&self, request: Request) -> Option<oneshot::Sender<()>> {
        let closing = || Err(Error::WorkerUnavailable("orchestrator is shutting down".into()));
        match request {
            Request::AddAccount { reply, .. }
            | Request::Start { reply, .. }
            | Request::Stop { reply, .. }
            | Request::SupplyChallengeCode { reply, .. }
            | Request::UpdateSettings { reply, .. } => {
                let _ = reply.send(closing());
                None
            }
            Request::ListAccounts { reply } => {
                let _ = reply.send(self.registry.snapshots());
                None
            }
            Request::Shutdown { reply } => Some(reply),
        }
    }

    fn begin_shutdown(&mut self) {
        self.shutting_down = true;
        let mut stopped = 0;
        for worker in self.registry.live_workers() {
            if worker.send(MasterCommand::Stop).is_ok() {
                stopped += 1;
            }
        }
        info!("[Orchestrator] shutdown requested; stopping {} workers", stopped);
    }
}

async fn read_worker_events(
    from_worker: WorkerReader,
    process: WorkerProcess,
    username: String,
    worker_id: u64,
    inbound: mpsc::UnboundedSender<Inbound>,
) {
    let mut events = IpcReader::<WorkerEvent, _>::new(from_worker);
    loop {
        match events.next().await {
            Ok(Some(event)) => {
                let msg = Inbound::Event { username: username.clone(), worker_id, event };
                if inbound.send(msg).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("[Orchestrator] event pipe failed: {}", e);
                break;
            }
        }
    }
    let exit = process.wait().await;
    let _ = inbound.send(Inbound::Closed { username, worker_id, exit });
}
