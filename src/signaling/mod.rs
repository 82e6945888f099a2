//! Signaling Module - WebSocket-Kanal zum Voice-Server
//!
//! Dieses Modul verwaltet die Kommunikation mit dem Signaling-Endpoint:
//! - WebSocket-Verbindung aufbauen und schließen
//! - Offer/Answer/ICE-Nachrichten senden
//! - Eingehende Nachrichten parsen und in Reihenfolge weiterleiten
//!

mod client;
mod messages;

pub use client::{ChannelEvent, ChannelState, SignalingChannel, SignalingError};
pub use messages::*;
