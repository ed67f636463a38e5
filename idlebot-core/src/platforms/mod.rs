// File: src/platforms/mod.rs
//
// The remote service, seen only through the capability a worker needs from
// it. Protocol internals (handshake, presence semantics) live behind
// `RemoteConnection` implementations.

use std::fmt;
use std::sync::Arc;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::Error;
use idlebot_common::models::OwnedGame;

pub mod simulated;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceState {
    Online,
    Invisible,
}

/// One entry of the activity list pushed to the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activity {
    Game(u32),
    /// Synthetic entry that only carries a display title.
    Custom(String),
}

/// Relationship codes reported with relationship events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relationship {
    None,
    Blocked,
    /// Someone else sent us a request that we have not answered.
    RequestRecipient,
    Friend,
    RequestInitiator,
    Ignored,
    IgnoredFriend,
}

impl Relationship {
    pub fn is_pending_incoming(&self) -> bool {
        matches!(self, Relationship::RequestRecipient)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeKind {
    /// Code mailed to the given domain.
    Email { domain: String },
    /// Code from the mobile authenticator (derivable from the shared secret).
    MobileAuthenticator,
}

/// The parked half of a second-factor challenge. Answering consumes it, so a
/// challenge can be answered at most once.
pub struct ChallengeResponder {
    tx: oneshot::Sender<String>,
}

impl ChallengeResponder {
    pub fn pair() -> (Self, oneshot::Receiver<String>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Fails only if the connection gave up waiting for this challenge.
    pub fn respond(self, code: String) -> Result<(), Error> {
        self.tx
            .send(code)
            .map_err(|_| Error::Platform("challenge is no longer awaited".into()))
    }
}

impl fmt::Debug for ChallengeResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChallengeResponder")
    }
}

/// Asynchronous protocol milestones.
#[derive(Debug)]
pub enum ConnectionEvent {
    LoggedOn,
    ChallengeRequired {
        kind: ChallengeKind,
        last_code_wrong: bool,
        responder: ChallengeResponder,
    },
    /// Recoverable failure; the session is gone but the worker may retry.
    Error { message: String },
    /// Terminal; the worker ends its process lifetime.
    Disconnected { reason: String },
    /// Credential-renewal artifact ("sentry") to persist.
    SentryRenewed(Vec<u8>),
    RelationshipChanged { peer_id: String, relationship: Relationship },
}

/// A connection event stamped with the login attempt that produced it.
#[derive(Debug)]
pub struct SessionEvent {
    pub session: u64,
    pub event: ConnectionEvent,
}

/// Where a connection reports events for one login attempt.
#[derive(Debug, Clone)]
pub struct EventSink {
    session: u64,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    pub fn new(session: u64, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    /// Returns false once the worker is gone.
    pub fn emit(&self, event: ConnectionEvent) -> bool {
        self.tx
            .send(SessionEvent { session: self.session, event })
            .is_ok()
    }
}

/// One title in the account's library, as the remote service reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryEntry {
    pub app_id: u32,
    pub name: String,
    pub playtime_minutes: u64,
    pub icon_url: Option<String>,
    pub logo_url: Option<String>,
}

impl LibraryEntry {
    /// The `{id, name}` projection forwarded to the master.
    pub fn to_owned_game(&self) -> OwnedGame {
        OwnedGame { id: self.app_id, name: self.name.clone() }
    }
}

#[derive(Clone)]
pub struct LogOnDetails {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for LogOnDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogOnDetails")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteConnection: Send + Sync {
    /// Starts a login. Its outcome arrives later through `sink`.
    async fn log_on(&self, details: &LogOnDetails, sink: EventSink) -> Result<(), Error>;
    async fn log_off(&self) -> Result<(), Error>;
    async fn set_presence(&self, presence: PresenceState) -> Result<(), Error>;
    async fn set_activities(&self, activities: &[Activity]) -> Result<(), Error>;
    async fn owned_games(&self) -> Result<Vec<LibraryEntry>, Error>;
    async fn accept_relationship(&self, peer_id: &str) -> Result<(), Error>;
}

/// Builds the connection a worker will own for its whole lifetime.
pub trait ConnectorFactory: Send + Sync {
    fn connect(&self, username: &str) -> Arc<dyn RemoteConnection>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_incoming_is_only_request_recipient() {
        use Relationship::*;
        for rel in [None, Blocked, Friend, RequestInitiator, Ignored, IgnoredFriend] {
            assert!(!rel.is_pending_incoming(), "{:?}", rel);
        }
        assert!(RequestRecipient.is_pending_incoming());
    }

    #[tokio::test]
    async fn responder_delivers_one_code() {
        let (responder, rx) = ChallengeResponder::pair();
        responder.respond("ABCDE".into()).unwrap();
        assert_eq!(rx.await.unwrap(), "ABCDE");
    }

    #[test]
    fn sink_stamps_session() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(7, tx);
        assert!(sink.emit(ConnectionEvent::LoggedOn));
        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.session, 7);
        assert!(matches!(ev.event, ConnectionEvent::LoggedOn));
    }
}
