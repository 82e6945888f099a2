//! Verlauf der letzten Voice-Turns
//!
//! Hält die letzten `MAX_RECENT_INTERACTIONS` Wechsel zwischen Benutzer
//! (Mikrofon offen) und Agent (Agent spricht).

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use uuid::Uuid;

pub const MAX_RECENT_INTERACTIONS: usize = 10;

/// Ein einzelner Turn
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceInteraction {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub text: Option<String>,
    pub is_user: bool,
}

impl VoiceInteraction {
    pub fn user() -> Self {
        Self::new(true)
    }

    pub fn agent() -> Self {
        Self::new(false)
    }

    fn new(is_user: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            text: None,
            is_user,
        }
    }
}

#[derive(Debug, Default)]
pub struct InteractionHistory {
    entries: VecDeque<VoiceInteraction>,
}

impl InteractionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fügt einen Turn hinzu und verwirft den ältesten bei Überlauf
    pub fn record(&mut self, interaction: VoiceInteraction) {
        self.entries.push_back(interaction);
        while self.entries.len() > MAX_RECENT_INTERACTIONS {
            self.entries.pop_front();
        }
    }

    /// Älteste zuerst
    pub fn recent(&self) -> Vec<VoiceInteraction> {
        self.entries.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
