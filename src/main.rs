//! Primer Voice Demo
//!
//! Verbindet sich mit dem Voice-Endpoint (`VOICE_API_URL`), öffnet einen
//! Mikrofon-Turn und loggt State-Änderungen, bis Ctrl-C gedrückt wird.

use anyhow::{Context, Result};
use primer_voice::{init_logging, SessionState, VoiceConfig, VoiceSession};
use std::time::Duration;
use tokio::sync::watch;

const LEVEL_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let config = VoiceConfig::from_env().context("Invalid voice configuration")?;
    let connect_timeout = config.connect_timeout();
    let session = VoiceSession::with_webrtc(config).context("Failed to create voice session")?;
    tracing::info!(
        "Starting voice session {} against {}",
        session.id(),
        session.config().signaling_url
    );

    let (state_tx, mut state_rx) = watch::channel(SessionState::default());
    let subscription = session.subscribe(move |state| {
        tracing::info!(
            "State: connected={} listening={} speaking={} error={:?}",
            state.connected,
            state.listening,
            state.speaking,
            state.error
        );
        let _ = state_tx.send(state.clone());
    });

    if let Err(e) = session.initialize().await {
        session.close().await;
        return Err(e).context("Failed to initialize voice connection");
    }

    // Auf die Answer warten
    let established = tokio::time::timeout(
        connect_timeout,
        state_rx.wait_for(|s| s.connected || s.error.is_some()),
    )
    .await
    .context("Timed out waiting for the voice agent")?
    .context("Voice session dropped")?
    .clone();

    if let Some(error) = established.error {
        session.close().await;
        anyhow::bail!("Voice connection failed: {}", error);
    }

    session
        .start_listening()
        .await
        .context("Failed to start listening")?;
    tracing::info!("Listening, press Ctrl-C to stop");

    let mut interval = tokio::time::interval(LEVEL_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                tracing::debug!("Input level: {:.3}", session.input_level());
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down...");
                break;
            }
        }
    }

    if let Err(e) = session.stop_listening().await {
        tracing::warn!("Failed to stop listening: {}", e);
    }
    session.close().await;
    subscription.unsubscribe();

    for interaction in session.recent_interactions() {
        tracing::info!(
            "Turn at {}: {}",
            interaction.timestamp,
            if interaction.is_user { "user" } else { "agent" }
        );
    }

    Ok(())
}
