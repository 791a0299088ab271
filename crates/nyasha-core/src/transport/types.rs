use std::{fmt, sync::Arc};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::DropGuard;

use crate::{credentials::Credentials, domain::InboundBatch, transport::port::SessionPort, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ProtocolVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Result of version negotiation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VersionInfo {
    pub version: ProtocolVersion,
    /// False when the network knows a newer version than we can speak.
    pub is_latest: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    Open,
    Close { reason: String, is_terminal: bool },
    /// Something the operator has to act on to pair the device (e.g. a scannable code).
    PairingChallenge { data: String },
}

/// New credential state emitted by the transport.
///
/// The transport should wait on the paired receiver: it resolves only after the
/// store has finished saving (or failed to).
#[derive(Debug)]
pub struct CredentialUpdate {
    pub credentials: Credentials,
    pub ack: oneshot::Sender<Result<()>>,
}

impl CredentialUpdate {
    pub fn new(credentials: Credentials) -> (Self, oneshot::Receiver<Result<()>>) {
        let (ack, rx) = oneshot::channel();
        (Self { credentials, ack }, rx)
    }
}

/// Receiving half of a session's event streams.
#[derive(Debug)]
pub struct SessionEvents {
    pub connection: mpsc::Receiver<ConnectionEvent>,
    pub credentials: mpsc::Receiver<CredentialUpdate>,
    pub inbound: mpsc::Receiver<InboundBatch>,
}

/// Sending half, held by the transport's background tasks.
#[derive(Clone, Debug)]
pub struct SessionSender {
    pub connection: mpsc::Sender<ConnectionEvent>,
    pub credentials: mpsc::Sender<CredentialUpdate>,
    pub inbound: mpsc::Sender<InboundBatch>,
}

impl SessionSender {
    /// Emit a credential update and wait until it has been persisted.
    pub async fn persist(&self, credentials: Credentials) -> Result<()> {
        let (update, done) = CredentialUpdate::new(credentials);
        if self.credentials.send(update).await.is_err() {
            return Err(crate::Error::Connection(
                "session closed before credentials were persisted".to_string(),
            ));
        }
        done.await.map_err(|_| {
            crate::Error::Connection("credential update was dropped unacknowledged".to_string())
        })?
    }
}

pub fn channels(capacity: usize) -> (SessionSender, SessionEvents) {
    let (conn_tx, conn_rx) = mpsc::channel(capacity);
    let (cred_tx, cred_rx) = mpsc::channel(capacity);
    let (in_tx, in_rx) = mpsc::channel(capacity);
    (
        SessionSender {
            connection: conn_tx,
            credentials: cred_tx,
            inbound: in_tx,
        },
        SessionEvents {
            connection: conn_rx,
            credentials: cred_rx,
            inbound: in_rx,
        },
    )
}

/// One authenticated connection to the messaging network.
///
/// Dropping the session drops `guard`, which cancels the transport's background
/// tasks for it.
pub struct Session {
    pub port: Arc<dyn SessionPort>,
    pub events: SessionEvents,
    pub guard: Option<DropGuard>,
}

impl Session {
    pub fn new(port: Arc<dyn SessionPort>, events: SessionEvents) -> Self {
        Self {
            port,
            events,
            guard: None,
        }
    }

    pub fn with_guard(mut self, guard: DropGuard) -> Self {
        self.guard = Some(guard);
        self
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("events", &self.events)
            .field("guarded", &self.guard.is_some())
            .finish()
    }
}
