use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use nyasha_core::{config::Config, orchestrator::Orchestrator};
use nyasha_gemini::GeminiClient;
use nyasha_telegram::TelegramTransport;

#[tokio::main]
async fn main() -> Result<(), nyasha_core::Error> {
    nyasha_core::logging::init("nyasha")?;

    let cfg = Config::load()?;
    tracing::info!(model = %cfg.gemini_model, auth_dir = %cfg.auth_dir.display(), "config loaded");

    let completion = Arc::new(GeminiClient::from_config(&cfg)?);
    let transport = Arc::new(TelegramTransport::from_config(&cfg)?);
    let orchestrator = Orchestrator::from_config(&cfg, transport, completion)?;

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("interrupt received");
                on_signal.cancel();
            }
            Err(e) => tracing::warn!(error = %e, "could not listen for interrupt"),
        }
    });

    orchestrator
        .run(shutdown)
        .await
        .map_err(|e| nyasha_core::Error::External(format!("nyasha bot failed: {e:#}")))?;

    Ok(())
}
