//! Message Types für das Signaling-Protokoll
//!
//! Jede Nachricht ist ein JSON-Objekt mit einem `type`-Feld. Die Payloads
//! entsprechen den Browser-Typen `RTCSessionDescription` und
//! `RTCIceCandidateInit`, damit der Voice-Server sie direkt verwenden kann.

use serde::{Deserialize, Serialize};

// ============================================================================
// PAYLOAD TYPES
// ============================================================================

/// Art einer Session Description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Pranswer,
    Answer,
}

/// SDP Session Description (`{"type": "offer", "sdp": "v=0..."}`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE Candidate, wie ihn `RTCIceCandidate.toJSON()` liefert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

// ============================================================================
// SIGNALING MESSAGES
// ============================================================================

/// Alle Nachrichten auf dem Signaling-Kanal (beide Richtungen)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalingMessage {
    /// SDP Offer (lokal → remote)
    Offer { sdp: SessionDescription },

    /// SDP Answer (remote → lokal, bei Renegotiation auch lokal → remote)
    Answer { sdp: SessionDescription },

    /// ICE Candidate (beide Richtungen)
    IceCandidate { candidate: IceCandidate },

    /// Mikrofon-Turn beginnt
    StartListening,

    /// Mikrofon-Turn endet
    StopListening,

    /// Agent beginnt zu sprechen
    SpeakingStart,

    /// Agent hört auf zu sprechen
    SpeakingEnd,
}

impl SignalingMessage {
    /// Parst einen Text-Frame; unbekannte `type`-Werte sind ein Fehler
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Serialisiert die Nachricht als JSON-Text-Frame
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Wire-Tag der Nachricht (für Logs)
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::StartListening => "start-listening",
            Self::StopListening => "stop-listening",
            Self::SpeakingStart => "speaking-start",
            Self::SpeakingEnd => "speaking-end",
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
