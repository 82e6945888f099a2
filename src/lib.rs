//! Primer Voice - Voice-Konversation mit dem Primer-Agent
//!
//! Baut eine Peer-to-Peer Audio-Session zu einem Remote Voice-Agent auf:
//! - WebSocket-Signaling für Offer/Answer und ICE Candidates
//! - WebRTC mit Mikrofon-Capture (G.711 PCMU)
//! - Beobachtbarer Session-State (connected / listening / speaking / error)
//!
//! ```no_run
//! use primer_voice::{VoiceConfig, VoiceSession};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let session = VoiceSession::with_webrtc(VoiceConfig::from_env()?)?;
//! let subscription = session.subscribe(|state| println!("{:?}", state));
//!
//! session.initialize().await?;
//! // ... sobald `connected`:
//! session.start_listening().await?;
//!
//! session.close().await;
//! subscription.unsubscribe();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod history;
pub mod logging;
pub mod session;
pub mod signaling;
pub mod state;
pub mod transport;

pub use config::{ConfigError, IceServerConfig, VoiceConfig};
pub use history::{InteractionHistory, VoiceInteraction};
pub use logging::init_logging;
pub use session::{SessionId, SessionPhase, VoiceError, VoiceSession};
pub use signaling::{IceCandidate, SdpKind, SessionDescription, SignalingMessage};
pub use state::{SessionState, StatePublisher, Subscription};
pub use transport::{MediaTransport, TransportError, TransportEvent, WebRtcTransport};
