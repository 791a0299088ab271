//! Top-level wiring: one session manager feeding one message router.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    clock::{Clock, TokioClock},
    completion::CompletionClient,
    config::Config,
    credentials::{CredentialStore, FileCredentialStore},
    persona::Persona,
    router::MessageRouter,
    session::{RunOutcome, SessionManager},
    transport::Transport,
    Result,
};

pub struct Orchestrator {
    manager: SessionManager,
    router: MessageRouter,
}

impl Orchestrator {
    pub fn new(manager: SessionManager, router: MessageRouter) -> Self {
        Self { manager, router }
    }

    /// Wire production components from config around the given adapters.
    pub fn from_config(
        cfg: &Config,
        transport: Arc<dyn Transport>,
        completion: Arc<dyn CompletionClient>,
    ) -> Result<Self> {
        let persona = match &cfg.persona_file {
            Some(path) => Persona::from_file(path)?,
            None => Persona::default(),
        };
        let clock: Arc<dyn Clock> = Arc::new(TokioClock);
        let store: Arc<dyn CredentialStore> = Arc::new(FileCredentialStore::new(&cfg.auth_dir));

        let manager = SessionManager::new(transport, store, clock.clone())
            .with_reconnect_delay(cfg.reconnect_delay)
            .with_logout_hint(format!(
                "Delete {} to start fresh, then restart the bot.",
                cfg.auth_dir.display()
            ));
        let router = MessageRouter::new(persona, completion, clock, cfg.typing_delay);

        Ok(Self::new(manager, router))
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Run until `shutdown` fires.
    ///
    /// A logged-out session leaves the process alive but idle; only a fatal
    /// first connection failure returns an error.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        info!("starting Nyasha bot");

        let outcome = self
            .manager
            .run(&self.router, shutdown.clone())
            .await
            .context("could not establish the initial session")?;

        if outcome == RunOutcome::LoggedOut {
            warn!("session is logged out; idling until interrupted");
            shutdown.cancelled().await;
        }
        info!("shutting down");
        Ok(())
    }
}
