//! WebSocket Client für den Voice-Signaling-Server
//!
//! Verwaltet die Duplex-Verbindung zum Voice-Endpoint:
//! - Verbindungsaufbau mit Timeout
//! - Read-Task liefert jede Nachricht genau einmal, in Empfangsreihenfolge
//! - Write-Task serialisiert ausgehende Frames
//!
//! Nachrichten werden nie gepuffert: `send` schlägt fehl, solange der Kanal
//! nicht offen ist.

use super::messages::SignalingMessage;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

/// Kapazität der ausgehenden Queue zum Write-Task
const OUTBOUND_CAPACITY: usize = 100;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("Invalid signaling URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to connect to signaling server: {0}")]
    ConnectFailed(String),

    #[error("Signaling channel is not open")]
    ChannelNotOpen,

    #[error("Signaling channel already connected")]
    AlreadyConnected,

    #[error("Failed to send message: {0}")]
    SendFailed(String),

    #[error("Signaling channel closed before the session was established")]
    ClosedDuringHandshake,
}

// ============================================================================
// CHANNEL STATE & EVENTS
// ============================================================================

/// Verbindungsstatus des Kanals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Events die vom Read-Task ausgelöst werden
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Eingehende Nachricht
    Message(SignalingMessage),

    /// Kanal wurde geschlossen (remote, lokal oder Fehler)
    Closed,
}

// ============================================================================
// SIGNALING CHANNEL
// ============================================================================

/// Duplex-Kanal zum Signaling-Server
pub struct SignalingChannel {
    url: Url,
    connect_timeout: Duration,
    state: Arc<RwLock<ChannelState>>,
    tx: Mutex<Option<mpsc::Sender<Message>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SignalingChannel {
    /// Erstellt einen (noch nicht verbundenen) Kanal
    pub fn new(url: &str, connect_timeout: Duration) -> Result<Self, SignalingError> {
        let url = Url::parse(url).map_err(|e| SignalingError::InvalidUrl(e.to_string()))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(SignalingError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }

        Ok(Self {
            url,
            connect_timeout,
            state: Arc::new(RwLock::new(ChannelState::Idle)),
            tx: Mutex::new(None),
            reader: Mutex::new(None),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn state(&self) -> ChannelState {
        *self.state.read()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Öffnet die WebSocket-Verbindung und startet Read-/Write-Task
    ///
    /// Eingehende Nachrichten und das Schließen des Kanals werden über
    /// `events` gemeldet.
    pub async fn connect(
        &self,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Result<(), SignalingError> {
        {
            let mut state = self.state.write();
            if *state != ChannelState::Idle {
                return Err(SignalingError::AlreadyConnected);
            }
            *state = ChannelState::Connecting;
        }

        tracing::info!("Connecting to signaling server: {}", self.url);

        let connect = tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()));
        let ws_stream = match connect.await {
            Ok(Ok((ws_stream, _))) => ws_stream,
            Ok(Err(e)) => {
                *self.state.write() = ChannelState::Closed;
                return Err(SignalingError::ConnectFailed(e.to_string()));
            }
            Err(_) => {
                *self.state.write() = ChannelState::Closed;
                return Err(SignalingError::ConnectFailed(format!(
                    "timed out after {:?}",
                    self.connect_timeout
                )));
            }
        };

        let (mut write, mut read) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_CAPACITY);

        // Write-Task: endet nach einem Close-Frame oder wenn alle Sender weg sind
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = write.send(msg).await {
                    tracing::error!("Failed to send WebSocket message: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        // Read-Task
        let state = Arc::clone(&self.state);
        let reader = tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match SignalingMessage::parse(&text) {
                        Ok(msg) => {
                            tracing::debug!("Received signaling message: {}", msg.kind());
                            if events.send(ChannelEvent::Message(msg)).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!("Ignoring malformed signaling message: {}", e);
                        }
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            *state.write() = ChannelState::Closed;
            let _ = events.send(ChannelEvent::Closed);
        });

        *self.tx.lock() = Some(tx);
        *self.reader.lock() = Some(reader);

        // close() kann während des Verbindungsaufbaus gelaufen sein
        {
            let mut state = self.state.write();
            if *state == ChannelState::Connecting {
                *state = ChannelState::Open;
            }
        }
        if !self.is_open() {
            self.close();
            return Err(SignalingError::ConnectFailed(
                "channel closed while connecting".to_string(),
            ));
        }

        tracing::info!("Signaling channel open");
        Ok(())
    }

    /// Sendet eine Nachricht; nur im Zustand `Open` erlaubt
    pub fn send(&self, message: &SignalingMessage) -> Result<(), SignalingError> {
        if !self.is_open() {
            return Err(SignalingError::ChannelNotOpen);
        }

        let tx = self.tx.lock().clone().ok_or(SignalingError::ChannelNotOpen)?;
        let text = message
            .to_json()
            .map_err(|e| SignalingError::SendFailed(e.to_string()))?;

        tracing::debug!("Sending signaling message: {}", message.kind());

        // try_send ist non-blocking
        tx.try_send(Message::Text(text))
            .map_err(|e| SignalingError::SendFailed(e.to_string()))
    }

    /// Schließt den Kanal (best effort, idempotent)
    pub fn close(&self) {
        let previous = std::mem::replace(&mut *self.state.write(), ChannelState::Closed);
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.try_send(Message::Close(None));
        }
        if previous == ChannelState::Open {
            tracing::info!("Signaling channel closed locally");
        }
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        self.close();
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}

impl std::fmt::Debug for SignalingChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingChannel")
            .field("url", &self.url.as_str())
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
