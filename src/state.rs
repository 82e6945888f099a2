//! Session State und State Publisher
//!
//! Der aktuelle `SessionState` wird bei jeder Änderung komplett ersetzt und
//! synchron an alle registrierten Observer verteilt (in
//! Registrierungsreihenfolge). Observer bekommen einen Snapshot, nie eine
//! Referenz in veränderlichen Zustand.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

// ============================================================================
// SESSION STATE
// ============================================================================

/// Sichtbarer Zustand einer Voice-Session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub connected: bool,
    pub listening: bool,
    pub speaking: bool,
    pub error: Option<String>,
}

impl SessionState {
    /// Zustand nach einem fehlgeschlagenen Verbindungsversuch
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

// ============================================================================
// STATE PUBLISHER
// ============================================================================

type Observer = Arc<dyn Fn(&SessionState) + Send + Sync>;

#[derive(Default)]
struct Registry {
    current: SessionState,
    observers: Vec<(u64, Observer)>,
    next_id: u64,
}

/// Hält den aktuellen Snapshot und benachrichtigt Observer
#[derive(Clone, Default)]
pub struct StatePublisher {
    registry: Arc<Mutex<Registry>>,
}

impl StatePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gibt den aktuellen Snapshot zurück
    pub fn current(&self) -> SessionState {
        self.registry.lock().current.clone()
    }

    /// Registriert einen Observer für alle folgenden Snapshots
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&SessionState) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.observers.push((id, Arc::new(observer)));

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
            active: AtomicBool::new(true),
        }
    }

    /// Ersetzt den Snapshot und ruft alle Observer synchron auf
    pub fn publish(&self, state: SessionState) {
        let observers: Vec<Observer> = {
            let mut registry = self.registry.lock();
            registry.current = state.clone();
            registry
                .observers
                .iter()
                .map(|(_, observer)| Arc::clone(observer))
                .collect()
        };

        // Ohne Lock aufrufen, damit Observer subscriben/lesen dürfen
        for observer in observers {
            observer(&state);
        }
    }

    /// Baut den nächsten Snapshot aus dem aktuellen und veröffentlicht ihn
    pub fn update<F>(&self, f: F) -> SessionState
    where
        F: FnOnce(&SessionState) -> SessionState,
    {
        let next = f(&self.current());
        self.publish(next.clone());
        next
    }

    /// Anzahl registrierter Observer
    pub fn observer_count(&self) -> usize {
        self.registry.lock().observers.len()
    }
}

impl std::fmt::Debug for StatePublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.lock();
        f.debug_struct("StatePublisher")
            .field("current", &registry.current)
            .field("observers", &registry.observers.len())
            .finish()
    }
}

// ============================================================================
// SUBSCRIPTION
// ============================================================================

/// Handle eines registrierten Observers
///
/// Das Observer bleibt registriert, bis `unsubscribe` aufgerufen wird; ein
/// Drop des Handles meldet nicht ab.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
    active: AtomicBool,
}

impl Subscription {
    /// Entfernt genau diesen Observer; weitere Aufrufe sind No-ops
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().observers.retain(|(id, _)| *id != self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

// ============================================================================
// TESTS
// ============================================================================
