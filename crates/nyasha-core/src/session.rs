//! Session lifecycle: connect, persist credentials, follow connection state,
//! reconnect on transient closes, stop for good on logout.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    clock::Clock,
    credentials::CredentialStore,
    domain::InboundBatch,
    transport::{ConnectionEvent, CredentialUpdate, Session, SessionEvents, SessionPort, Transport},
    Result,
};

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    /// Credentials were revoked; nothing more will happen until an operator steps in.
    LoggedOut,
}

/// Why [`SessionManager::run`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    LoggedOut,
    Shutdown,
}

/// Where a live session's inbound stream gets consumed once it opens.
pub trait SessionAttach: Send + Sync {
    /// Start consuming `inbound`, replying through `port`.
    ///
    /// The returned task is aborted when the session closes.
    fn attach(
        &self,
        port: Arc<dyn SessionPort>,
        inbound: mpsc::Receiver<InboundBatch>,
    ) -> JoinHandle<()>;
}

/// Operator-facing surface for pairing challenges (e.g. a code to scan).
pub trait PairingDisplay: Send + Sync {
    fn show(&self, challenge: &str);
}

/// Prints the challenge to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogPairingDisplay;

impl PairingDisplay for LogPairingDisplay {
    fn show(&self, challenge: &str) {
        info!("pairing required; scan or enter this code on your device:\n{challenge}");
    }
}

enum SessionEnd {
    Closed(String),
    LoggedOut,
    Shutdown,
}

pub struct SessionManager {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    pairing: Arc<dyn PairingDisplay>,
    reconnect_delay: Duration,
    logout_hint: String,
    state: watch::Sender<SessionState>,
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            transport,
            store,
            clock,
            pairing: Arc::new(LogPairingDisplay),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            logout_hint: "Clear the stored credentials and restart to pair again.".to_string(),
            state,
        }
    }

    pub fn with_pairing_display(mut self, pairing: Arc<dyn PairingDisplay>) -> Self {
        self.pairing = pairing;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Operator instruction logged when the session is logged out.
    pub fn with_logout_hint(mut self, hint: impl Into<String>) -> Self {
        self.logout_hint = hint.into();
        self
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: SessionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(from = ?prev, to = ?next, "session state changed");
        }
    }

    /// Open a fresh session using the stored credentials.
    ///
    /// Version negotiation failures fall back to the transport's known-good version.
    pub async fn connect(&self) -> Result<Session> {
        self.set_state(SessionState::Connecting);

        let credentials = self.store.load().await?;
        let name = self.transport.name();
        let version = match self.transport.latest_version().await {
            Ok(v) => {
                let suffix = if v.is_latest { "" } else { " (not latest)" };
                info!("using {name} protocol v{}{suffix}", v.version);
                v.version
            }
            Err(e) => {
                let fallback = self.transport.fallback_version();
                warn!(error = %e, "version negotiation failed; falling back to {name} v{fallback}");
                fallback
            }
        };

        self.transport.connect(credentials, version).await
    }

    /// Drive sessions until logout or shutdown.
    ///
    /// A failure of the very first connect is returned; later connect failures are
    /// retried after the reconnect delay, without limit.
    pub async fn run(
        &self,
        attach: &dyn SessionAttach,
        shutdown: CancellationToken,
    ) -> Result<RunOutcome> {
        let mut session = tokio::select! {
            _ = shutdown.cancelled() => return Ok(RunOutcome::Shutdown),
            s = self.connect() => s?,
        };

        loop {
            match self.drive(session, attach, &shutdown).await {
                SessionEnd::Shutdown => return Ok(RunOutcome::Shutdown),
                SessionEnd::LoggedOut => {
                    self.set_state(SessionState::LoggedOut);
                    error!("logged out. {}", self.logout_hint);
                    return Ok(RunOutcome::LoggedOut);
                }
                SessionEnd::Closed(reason) => {
                    self.set_state(SessionState::Connecting);
                    warn!(
                        "connection closed: {reason}; reconnecting in {:?}",
                        self.reconnect_delay
                    );
                }
            }

            session = loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return Ok(RunOutcome::Shutdown),
                    _ = self.clock.sleep(self.reconnect_delay) => {}
                }
                let attempt = tokio::select! {
                    _ = shutdown.cancelled() => return Ok(RunOutcome::Shutdown),
                    s = self.connect() => s,
                };
                match attempt {
                    Ok(s) => break s,
                    Err(e) => warn!(
                        error = %e,
                        "reconnect failed; retrying in {:?}",
                        self.reconnect_delay
                    ),
                }
            };
        }
    }

    async fn drive(
        &self,
        session: Session,
        attach: &dyn SessionAttach,
        shutdown: &CancellationToken,
    ) -> SessionEnd {
        // `_guard` keeps the transport's tasks alive until this session is done.
        let Session {
            port,
            events,
            guard: _guard,
        } = session;
        let SessionEvents {
            mut connection,
            mut credentials,
            inbound,
        } = events;
        let mut inbound = Some(inbound);
        let mut router: Option<JoinHandle<()>> = None;
        let mut credentials_open = true;

        let end = loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break SessionEnd::Shutdown,
                update = credentials.recv(), if credentials_open => match update {
                    Some(update) => self.persist(update).await,
                    None => credentials_open = false,
                },
                event = connection.recv() => match event {
                    Some(ConnectionEvent::Open) => {
                        self.set_state(SessionState::Open);
                        info!("connection opened; Nyasha is online");
                        if let Some(rx) = inbound.take() {
                            router = Some(attach.attach(port.clone(), rx));
                        }
                    }
                    Some(ConnectionEvent::Close { reason, is_terminal: true }) => {
                        warn!("connection closed: {reason}");
                        break SessionEnd::LoggedOut;
                    }
                    Some(ConnectionEvent::Close { reason, is_terminal: false }) => {
                        break SessionEnd::Closed(reason);
                    }
                    Some(ConnectionEvent::PairingChallenge { data }) => self.pairing.show(&data),
                    None => break SessionEnd::Closed("connection stream ended".to_string()),
                },
            }
        };

        if let Some(task) = router {
            task.abort();
        }
        end
    }

    async fn persist(&self, update: CredentialUpdate) {
        let res = self.store.save(&update.credentials).await;
        match &res {
            Ok(()) => debug!("credentials persisted"),
            Err(e) => error!(error = %e, "failed to persist credentials"),
        }
        let _ = update.ack.send(res);
    }
}
