//! Konfiguration der Voice-Session
//!
//! Defaults zeigen auf den Produktions-Endpoint; jede Einstellung kann über
//! Umgebungsvariablen überschrieben werden:
//!
//! | Variable | Bedeutung |
//! |---|---|
//! | `VOICE_API_URL` | WebSocket-URL des Signaling-Servers |
//! | `VOICE_STUN_URLS` | kommagetrennte STUN-URLs |
//! | `VOICE_TURN_URL`, `VOICE_TURN_USERNAME`, `VOICE_TURN_CREDENTIAL` | optionaler TURN-Server |
//! | `VOICE_CONNECT_TIMEOUT_SECS` | Timeout für den Verbindungsaufbau |

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_SIGNALING_URL: &str = "wss://primer.calemcnulty.com/api/v1/voice";
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid signaling URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Signaling URL must use ws:// or wss://, got '{0}'")]
    UnsupportedScheme(String),

    #[error("At least one ICE server is required")]
    NoIceServers,

    #[error("At least one STUN server (stun: or stuns:) is required")]
    NoStunServer,

    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}

// ============================================================================
// CONFIG STRUCTS
// ============================================================================

/// STUN/TURN Server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServerConfig {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// Konfiguration einer Voice-Session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VoiceConfig {
    pub signaling_url: String,
    pub ice_servers: Vec<IceServerConfig>,
    pub connect_timeout_secs: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            ice_servers: vec![IceServerConfig::stun(DEFAULT_STUN_SERVER)],
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl VoiceConfig {
    /// Default-Konfiguration mit anderer Signaling-URL
    pub fn with_signaling_url(url: impl Into<String>) -> Self {
        Self {
            signaling_url: url.into(),
            ..Self::default()
        }
    }

    /// Lädt die Konfiguration aus den Umgebungsvariablen
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Wie `from_env`, aber mit beliebiger Quelle für die Variablen
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("VOICE_API_URL") {
            config.signaling_url = url.trim().to_string();
        }

        if let Some(urls) = lookup("VOICE_STUN_URLS") {
            let urls: Vec<String> = urls
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string)
                .collect();
            config.ice_servers = vec![IceServerConfig {
                urls,
                username: None,
                credential: None,
            }];
            config.ice_servers.retain(|s| !s.urls.is_empty());
        }

        if let Some(url) = lookup("VOICE_TURN_URL") {
            config = config.with_turn_server(
                url.trim(),
                lookup("VOICE_TURN_USERNAME").unwrap_or_default(),
                lookup("VOICE_TURN_CREDENTIAL").unwrap_or_default(),
            );
        }

        if let Some(raw) = lookup("VOICE_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout_secs = raw
                .trim()
                .parse()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: "VOICE_CONNECT_TIMEOUT_SECS".to_string(),
                    value: raw.clone(),
                })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Fügt TURN-Server Credentials hinzu
    pub fn with_turn_server(
        mut self,
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        self.ice_servers.push(IceServerConfig {
            urls: vec![url.into()],
            username: Some(username.into()),
            credential: Some(credential.into()),
        });
        self
    }

    /// Prüft URL-Schema und ICE-Server
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.signaling_url).map_err(|e| ConfigError::InvalidUrl {
            url: self.signaling_url.clone(),
            reason: e.to_string(),
        })?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConfigError::UnsupportedScheme(url.scheme().to_string()));
        }

        if self.ice_servers.iter().all(|s| s.urls.is_empty()) {
            return Err(ConfigError::NoIceServers);
        }

        let has_stun = self
            .ice_servers
            .iter()
            .flat_map(|s| s.urls.iter())
            .any(|u| u.starts_with("stun:") || u.starts_with("stuns:"));
        if !has_stun {
            return Err(ConfigError::NoStunServer);
        }

        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "connect_timeout_secs".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

// ============================================================================
// TESTS
// ============================================================================
