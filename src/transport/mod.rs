//! Transport Module - Peer Connection und Mikrofon
//!
//! Dieses Modul verwaltet:
//! - den `MediaTransport`-Vertrag, gegen den die Session arbeitet
//! - die WebRTC-Implementierung (`WebRtcTransport`)
//! - Mikrofon Capture und PCMU-Encoding

mod audio;
mod rtc;

pub use audio::{
    encode_pcmu, linear_to_mulaw, AudioError, CaptureBuffer, MicrophoneCapture, FRAME_DURATION,
    FRAME_SIZE, SAMPLE_RATE,
};
pub use rtc::WebRtcTransport;

use crate::signaling::{IceCandidate, SessionDescription};
use std::future::Future;
use thiserror::Error;
use tokio::sync::mpsc;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to access microphone: {0}")]
    Capture(#[from] AudioError),

    #[error("Failed to set up peer connection: {0}")]
    ConnectionSetup(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Peer connection not initialized")]
    NotInitialized,
}

// ============================================================================
// TRANSPORT EVENTS
// ============================================================================

/// Events die vom Transport ausgelöst werden
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Lokaler ICE Candidate, muss an den Server gesendet werden
    LocalCandidate(IceCandidate),

    /// Remote Audio-Track empfangen
    RemoteTrackStarted,

    /// Remote Audio-Track beendet (End-of-Stream)
    RemoteTrackEnded,
}

// ============================================================================
// MEDIA TRANSPORT
// ============================================================================

/// Peer Connection mit lokaler Audio-Aufnahme
///
/// Eine Instanz besitzt Mikrofon und Peer Connection exklusiv. Ein erneutes
/// `initialize` ohne vorheriges `close` muss die bestehenden Ressourcen
/// zuerst freigeben.
pub trait MediaTransport: Send + Sync + 'static {
    /// Mikrofon öffnen, Peer Connection bauen, Callbacks registrieren und
    /// den lokalen Audio-Track anhängen
    fn initialize(
        &self,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Offer erzeugen und als Local Description setzen
    fn create_offer(
        &self,
    ) -> impl Future<Output = Result<SessionDescription, TransportError>> + Send;

    /// Answer erzeugen und als Local Description setzen
    fn create_answer(
        &self,
    ) -> impl Future<Output = Result<SessionDescription, TransportError>> + Send;

    fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn add_ice_candidate(
        &self,
        candidate: IceCandidate,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Best-effort Teardown, idempotent
    fn close(&self) -> impl Future<Output = ()> + Send;
}
