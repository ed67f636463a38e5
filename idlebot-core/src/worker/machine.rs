// File: idlebot-core/src/worker/machine.rs
//
// The worker's lifecycle as a plain state machine: it consumes inputs and
// returns the effects to carry out, without performing any IO itself.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use idlebot_common::models::{OwnedGame, StatusUpdate, WorkerStatus};
use crate::platforms::{ChallengeResponder, ConnectionEvent};
use crate::totp;
use crate::worker::WorkerContext;
use crate::Error;

pub const INVALID_SHARED_SECRET: &str = "invalid shared secret";

/// Commands the master can give a running worker (the seed is consumed
/// before the machine exists).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerCommand {
    Start,
    Stop,
    SupplyChallengeCode(String),
}

#[derive(Debug)]
pub enum WorkerInput {
    Command(WorkerCommand),
    Connection(ConnectionEvent),
    HeartbeatTick,
    ReconnectDue,
    OwnedGamesFetched(Vec<OwnedGame>),
}

#[derive(Debug)]
pub enum Effect {
    Emit(StatusUpdate),
    EmitOwnedGames(Vec<OwnedGame>),
    ForwardSentry(String),
    /// Starts a fresh login attempt; events from older attempts go stale.
    LogOn,
    LogOff,
    Farm,
    FetchOwnedGames,
    ArmHeartbeat,
    CancelHeartbeat,
    ScheduleReconnect { attempt: u32 },
    CancelReconnect,
    AnswerChallenge { responder: ChallengeResponder, code: String },
    AcceptRelationship { peer_id: String },
    Exit,
}

pub struct WorkerMachine {
    ctx: WorkerContext,
    status: WorkerStatus,
    session_start: Option<DateTime<Utc>>,
    pending_challenge: Option<ChallengeResponder>,
    challenge_answered: bool,
    reconnect_attempt: u32,
    /// Set when retrying cannot help (bad shared secret); cleared by `Start`.
    halted: bool,
}

impl WorkerMachine {
    pub fn new(ctx: WorkerContext) -> Self {
        Self {
            ctx,
            status: WorkerStatus::Stopped,
            session_start: None,
            pending_challenge: None,
            challenge_answered: false,
            reconnect_attempt: 0,
            halted: false,
        }
    }

    pub fn context(&self) -> &WorkerContext {
        &self.ctx
    }

    pub fn status(&self) -> &WorkerStatus {
        &self.status
    }

    pub fn session_start(&self) -> Option<DateTime<Utc>> {
        self.session_start
    }

    pub fn handle(&mut self, input: WorkerInput, now: DateTime<Utc>) -> Result<Vec<Effect>, Error> {
        match input {
            WorkerInput::Command(cmd) => self.on_command(cmd, now),
            WorkerInput::Connection(event) => Ok(self.on_connection(event, now)),
            WorkerInput::HeartbeatTick => {
                if self.status.is_running() {
                    Ok(vec![Effect::Farm])
                } else {
                    Ok(Vec::new())
                }
            }
            WorkerInput::ReconnectDue => Ok(self.on_reconnect_due(now)),
            WorkerInput::OwnedGamesFetched(games) => {
                if self.status.is_stopped() {
                    Ok(Vec::new())
                } else {
                    Ok(vec![Effect::EmitOwnedGames(games)])
                }
            }
        }
    }

    fn on_command(&mut self, cmd: WorkerCommand, now: DateTime<Utc>) -> Result<Vec<Effect>, Error> {
        match cmd {
            WorkerCommand::Start => match self.status {
                WorkerStatus::Stopped | WorkerStatus::Error(_) => {
                    self.halted = false;
                    self.reconnect_attempt = 0;
                    Ok(vec![
                        Effect::CancelReconnect,
                        self.enter(WorkerStatus::Connecting, now),
                        Effect::LogOn,
                    ])
                }
                _ => {
                    debug!("start ignored while {}", self.status);
                    Ok(Vec::new())
                }
            },
            WorkerCommand::Stop => {
                self.pending_challenge = None;
                Ok(vec![
                    Effect::CancelHeartbeat,
                    Effect::CancelReconnect,
                    Effect::LogOff,
                    self.enter(WorkerStatus::Stopped, now),
                    Effect::Exit,
                ])
            }
            WorkerCommand::SupplyChallengeCode(code) => match self.pending_challenge.take() {
                Some(responder) => {
                    self.challenge_answered = true;
                    Ok(vec![
                        Effect::AnswerChallenge { responder, code },
                        self.enter(WorkerStatus::Connecting, now),
                    ])
                }
                None if self.challenge_answered => Err(Error::ChallengeAlreadyAnswered),
                None => Err(Error::NoPendingChallenge(self.ctx.username.clone())),
            },
        }
    }

    fn on_connection(&mut self, event: ConnectionEvent, now: DateTime<Utc>) -> Vec<Effect> {
        if self.status.is_stopped() {
            debug!("dropping connection event while stopped: {:?}", event);
            return Vec::new();
        }

        match event {
            ConnectionEvent::LoggedOn => {
                info!("logged on");
                self.pending_challenge = None;
                self.challenge_answered = false;
                self.reconnect_attempt = 0;
                vec![
                    Effect::CancelReconnect,
                    self.enter(WorkerStatus::Running, now),
                    Effect::Farm,
                    Effect::FetchOwnedGames,
                    Effect::ArmHeartbeat,
                ]
            }
            ConnectionEvent::ChallengeRequired { kind, last_code_wrong, responder } => {
                if last_code_wrong {
                    warn!("previous {:?} code was rejected", kind);
                }
                self.on_challenge(responder, now)
            }
            ConnectionEvent::Error { message } => {
                if self.halted {
                    debug!("ignoring error after halt: {}", message);
                    return Vec::new();
                }
                warn!("connection error: {}", message);
                self.pending_challenge = None;
                self.reconnect_attempt = self.reconnect_attempt.saturating_add(1);
                vec![
                    Effect::CancelHeartbeat,
                    self.enter(WorkerStatus::Error(message), now),
                    Effect::ScheduleReconnect { attempt: self.reconnect_attempt },
                ]
            }
            ConnectionEvent::Disconnected { reason } => {
                info!("disconnected: {}", reason);
                self.pending_challenge = None;
                vec![
                    Effect::CancelHeartbeat,
                    Effect::CancelReconnect,
                    self.enter(WorkerStatus::Stopped, now),
                    Effect::Exit,
                ]
            }
            ConnectionEvent::SentryRenewed(bytes) => {
                vec![Effect::ForwardSentry(BASE64.encode(bytes))]
            }
            ConnectionEvent::RelationshipChanged { peer_id, relationship } => {
                if self.ctx.settings.auto_accept_relations && relationship.is_pending_incoming() {
                    vec![Effect::AcceptRelationship { peer_id }]
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn on_challenge(&mut self, responder: ChallengeResponder, now: DateTime<Utc>) -> Vec<Effect> {
        let Some(secret) = self.ctx.shared_secret() else {
            if self.pending_challenge.replace(responder).is_some() {
                debug!("replaced an unanswered challenge");
            }
            self.challenge_answered = false;
            return vec![self.enter(WorkerStatus::AwaitingChallenge, now)];
        };

        match totp::generate_auth_code(secret, now.timestamp()) {
            Ok(code) => {
                debug!("answering challenge from shared secret");
                vec![Effect::AnswerChallenge { responder, code }]
            }
            Err(e) => {
                warn!("{}", e);
                drop(responder);
                self.halted = true;
                self.pending_challenge = None;
                vec![
                    Effect::CancelHeartbeat,
                    Effect::CancelReconnect,
                    Effect::LogOff,
                    self.enter(WorkerStatus::Error(INVALID_SHARED_SECRET.into()), now),
                ]
            }
        }
    }

    fn on_reconnect_due(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        match self.status {
            WorkerStatus::Error(_) if !self.halted => {
                info!("reconnecting (attempt {})", self.reconnect_attempt);
                vec![self.enter(WorkerStatus::Connecting, now), Effect::LogOn]
            }
            _ => {
                debug!("reconnect timer fired while {}; nothing to do", self.status);
                Vec::new()
            }
        }
    }

    /// Moves to `status` and reports it. The session start is set on entering
    /// `Running` and cleared on entering anything else.
    fn enter(&mut self, status: WorkerStatus, now: DateTime<Utc>) -> Effect {
        self.session_start = if status.is_running() { Some(now) } else { None };
        self.status = status;
        Effect::Emit(StatusUpdate::new(self.status.clone(), self.session_start))
    }
}
