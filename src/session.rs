//! Voice Session - Koordination von Transport, Signaling und State
//!
//! Eine `VoiceSession` besitzt genau einen Transport und höchstens einen
//! offenen Signaling-Kanal. Der Ablauf eines Verbindungsversuchs:
//!
//! 1. `initialize` gibt einen vorherigen Versuch frei, öffnet Mikrofon und
//!    Peer Connection, verbindet den Kanal und sendet das Offer
//! 2. Die Event-Loop des Versuchs wendet Answer und ICE Candidates an
//! 3. `close` beendet die Session endgültig
//!
//! Alle Änderungen am Handshake laufen unter einem async Lock. Dadurch
//! werden eingehende Nachrichten strikt in Empfangsreihenfolge verarbeitet.

use crate::config::{ConfigError, VoiceConfig};
use crate::history::{InteractionHistory, VoiceInteraction};
use crate::signaling::{
    ChannelEvent, IceCandidate, SessionDescription, SignalingChannel, SignalingError,
    SignalingMessage,
};
use crate::state::{SessionState, StatePublisher, Subscription};
use crate::transport::{MediaTransport, TransportError, TransportEvent, WebRtcTransport};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error("Voice session is closed")]
    SessionClosed,
}

// ============================================================================
// SESSION TYPES
// ============================================================================

/// Phase des Verbindungsaufbaus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionPhase {
    Idle,
    Initializing,
    AwaitingAnswer,
    Established,
    Error,
    Closed,
}

/// Eindeutige ID einer Session (für Logs)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Zustand des aktuellen Handshakes, nur unter dem async Lock verändert
#[derive(Debug, Default)]
struct Handshake {
    /// Wird bei jedem `initialize` und bei `close` erhöht
    generation: u64,
    established_once: bool,
    remote_description_set: bool,
    /// Candidates, die vor der Remote Description ankamen (FIFO)
    pending_candidates: VecDeque<IceCandidate>,
}

// ============================================================================
// SHARED STATE
// ============================================================================

struct Shared<T: MediaTransport> {
    id: SessionId,
    config: VoiceConfig,
    transport: T,
    publisher: StatePublisher,
    phase: RwLock<SessionPhase>,
    channel: Mutex<Option<Arc<SignalingChannel>>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    handshake: tokio::sync::Mutex<Handshake>,
    history: Mutex<InteractionHistory>,
    closed: watch::Sender<bool>,
}

impl<T: MediaTransport> Shared<T> {
    fn phase(&self) -> SessionPhase {
        *self.phase.read()
    }

    /// Setzt die Phase; `Closed` wird nie wieder verlassen
    fn transition(&self, to: SessionPhase) -> bool {
        let mut phase = self.phase.write();
        if *phase == SessionPhase::Closed {
            return false;
        }
        if *phase != to {
            tracing::debug!("Session {}: {:?} -> {:?}", self.id, *phase, to);
        }
        *phase = to;
        true
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    async fn wait_closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    fn current_channel(&self) -> Option<Arc<SignalingChannel>> {
        self.channel.lock().clone()
    }

    fn send(&self, message: &SignalingMessage) -> Result<(), SignalingError> {
        self.current_channel()
            .ok_or(SignalingError::ChannelNotOpen)?
            .send(message)
    }

    /// Gibt Kanal und Transport des aktuellen Versuchs frei
    async fn teardown(&self) {
        let channel = self.channel.lock().take();
        if let Some(channel) = channel {
            channel.close();
        }
        self.transport.close().await;
    }

    /// Bricht den aktuellen Versuch mit einem Fehler ab
    async fn fail(&self, error: &VoiceError) {
        tracing::error!("Session {}: voice connection failed: {}", self.id, error);
        self.teardown().await;
        if self.transition(SessionPhase::Error) {
            self.publisher.publish(SessionState::failed(error.to_string()));
        }
    }

    fn set_listening(&self, listening: bool) {
        let previous = self.publisher.current();
        self.publisher.update(|s| SessionState {
            listening,
            ..s.clone()
        });
        if listening && !previous.listening {
            self.history.lock().record(VoiceInteraction::user());
        }
    }

    fn set_speaking(&self, speaking: bool) {
        let previous = self.publisher.current();
        self.publisher.update(|s| SessionState {
            speaking,
            ..s.clone()
        });
        if speaking && !previous.speaking {
            self.history.lock().record(VoiceInteraction::agent());
        }
    }

    // ========================================================================
    // HANDSHAKE
    // ========================================================================

    /// Transport + Kanal aufbauen und das Offer senden
    async fn establish(self: &Arc<Self>, generation: u64) -> Result<(), VoiceError> {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        self.transport.initialize(transport_tx).await?;

        let channel = Arc::new(SignalingChannel::new(
            &self.config.signaling_url,
            self.config.connect_timeout(),
        )?);
        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        channel.connect(channel_tx).await?;
        tracing::debug!("Session {}: signaling open at {}", self.id, channel.url());
        *self.channel.lock() = Some(Arc::clone(&channel));

        // Die Loop wartet auf den Handshake-Lock, bis das Offer raus ist
        let handle = tokio::spawn(run_event_loop(
            Arc::downgrade(self),
            generation,
            transport_rx,
            channel_rx,
        ));
        if let Some(previous) = self.event_loop.lock().replace(handle) {
            previous.abort();
        }

        let offer = self.transport.create_offer().await?;
        channel.send(&SignalingMessage::Offer { sdp: offer })?;
        Ok(())
    }

    /// Remote Description setzen und gepufferte Candidates anwenden
    async fn apply_remote_description(
        &self,
        handshake: &mut Handshake,
        description: SessionDescription,
    ) -> Result<(), TransportError> {
        self.transport.set_remote_description(description).await?;
        handshake.remote_description_set = true;

        while let Some(candidate) = handshake.pending_candidates.pop_front() {
            if let Err(e) = self.transport.add_ice_candidate(candidate).await {
                tracing::warn!("Session {}: failed to apply buffered candidate: {}", self.id, e);
            }
        }
        Ok(())
    }

    async fn handle_answer(&self, handshake: &mut Handshake, sdp: SessionDescription) {
        if self.phase() != SessionPhase::AwaitingAnswer {
            tracing::warn!("Session {}: ignoring unexpected answer in {:?}", self.id, self.phase());
            return;
        }

        match self.apply_remote_description(handshake, sdp).await {
            Ok(()) => {
                if !self.transition(SessionPhase::Established) {
                    return;
                }
                handshake.established_once = true;
                self.publisher.update(|s| SessionState {
                    connected: true,
                    error: None,
                    ..s.clone()
                });
                tracing::info!("Session {}: voice connection established", self.id);
            }
            Err(e) => self.fail(&e.into()).await,
        }
    }

    /// Renegotiation durch den Server
    async fn handle_offer(&self, handshake: &mut Handshake, sdp: SessionDescription) {
        if self.phase() != SessionPhase::Established {
            tracing::warn!("Session {}: ignoring offer in {:?}", self.id, self.phase());
            return;
        }

        let result = async {
            self.apply_remote_description(handshake, sdp).await?;
            let answer = self.transport.create_answer().await?;
            self.send(&SignalingMessage::Answer { sdp: answer })?;
            Ok::<(), VoiceError>(())
        }
        .await;

        match result {
            Ok(()) => tracing::info!("Session {}: renegotiation answered", self.id),
            Err(e) => {
                tracing::error!("Session {}: renegotiation failed: {}", self.id, e);
                let message = e.to_string();
                self.publisher.update(|s| SessionState {
                    error: Some(message),
                    ..s.clone()
                });
            }
        }
    }

    async fn handle_remote_candidate(&self, handshake: &mut Handshake, candidate: IceCandidate) {
        if !handshake.remote_description_set {
            tracing::debug!("Session {}: buffering ICE candidate", self.id);
            handshake.pending_candidates.push_back(candidate);
            return;
        }

        if let Err(e) = self.transport.add_ice_candidate(candidate).await {
            tracing::warn!("Session {}: failed to add ICE candidate: {}", self.id, e);
        }
    }

    async fn handle_channel_event(&self, handshake: &mut Handshake, event: ChannelEvent) {
        let message = match event {
            ChannelEvent::Message(message) => message,
            ChannelEvent::Closed => {
                match self.phase() {
                    SessionPhase::Initializing | SessionPhase::AwaitingAnswer => {
                        self.fail(&SignalingError::ClosedDuringHandshake.into()).await;
                    }
                    _ => {
                        tracing::warn!("Session {}: signaling channel closed", self.id);
                        self.publisher.update(|s| SessionState {
                            connected: false,
                            ..s.clone()
                        });
                    }
                }
                return;
            }
        };

        match message {
            SignalingMessage::Answer { sdp } => self.handle_answer(handshake, sdp).await,
            SignalingMessage::Offer { sdp } => self.handle_offer(handshake, sdp).await,
            SignalingMessage::IceCandidate { candidate } => {
                self.handle_remote_candidate(handshake, candidate).await
            }
            SignalingMessage::StartListening => self.handle_listening_control(handshake, true),
            SignalingMessage::StopListening => self.handle_listening_control(handshake, false),
            SignalingMessage::SpeakingStart => self.set_speaking(true),
            SignalingMessage::SpeakingEnd => self.set_speaking(false),
        }
    }

    /// Listening-Steuerung vom Server
    fn handle_listening_control(&self, handshake: &Handshake, listening: bool) {
        if !handshake.established_once {
            tracing::warn!(
                "Session {}: ignoring listening control before connection is established",
                self.id
            );
            return;
        }
        self.set_listening(listening);
    }

    fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::LocalCandidate(candidate) => {
                let message = SignalingMessage::IceCandidate { candidate };
                match self.current_channel() {
                    Some(channel) if channel.is_open() => {
                        if let Err(e) = channel.send(&message) {
                            tracing::warn!("Session {}: failed to send ICE candidate: {}", self.id, e);
                        }
                    }
                    _ => tracing::debug!(
                        "Session {}: dropping local candidate, channel not open",
                        self.id
                    ),
                }
            }
            TransportEvent::RemoteTrackStarted => self.set_speaking(true),
            TransportEvent::RemoteTrackEnded => self.set_speaking(false),
        }
    }
}

enum LoopEvent {
    Transport(TransportEvent),
    Channel(ChannelEvent),
}

/// Event-Loop eines Verbindungsversuchs
///
/// Endet, sobald beide Quellen geschlossen sind, die Session weg ist oder ein
/// neuerer Versuch (bzw. `close`) die Generation erhöht hat.
async fn run_event_loop<T: MediaTransport>(
    shared: Weak<Shared<T>>,
    generation: u64,
    mut transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    mut channel_rx: mpsc::UnboundedReceiver<ChannelEvent>,
) {
    loop {
        let event = tokio::select! {
            Some(event) = transport_rx.recv() => LoopEvent::Transport(event),
            Some(event) = channel_rx.recv() => LoopEvent::Channel(event),
            else => break,
        };

        let Some(session) = shared.upgrade() else {
            break;
        };

        let mut handshake = session.handshake.lock().await;
        if handshake.generation != generation
            || session.is_closed()
            || session.phase() == SessionPhase::Error
        {
            break;
        }

        match event {
            LoopEvent::Transport(event) => session.handle_transport_event(event),
            LoopEvent::Channel(event) => session.handle_channel_event(&mut handshake, event).await,
        }
    }
}

// ============================================================================
// VOICE SESSION
// ============================================================================

/// Eine Voice-Konversation mit dem Remote-Agent
pub struct VoiceSession<T: MediaTransport> {
    shared: Arc<Shared<T>>,
}

impl VoiceSession<WebRtcTransport> {
    /// Session mit dem WebRTC-Transport
    pub fn with_webrtc(config: VoiceConfig) -> Result<Self, ConfigError> {
        let transport = WebRtcTransport::new(&config);
        Self::new(config, transport)
    }

    /// Mikrofon-Pegel für Visualisierung
    pub fn input_level(&self) -> f32 {
        self.shared.transport.input_level()
    }
}

impl<T: MediaTransport> VoiceSession<T> {
    pub fn new(config: VoiceConfig, transport: T) -> Result<Self, ConfigError> {
        config.validate()?;

        let (closed, _) = watch::channel(false);
        let id = SessionId::new();
        tracing::debug!("Session {}: created for {}", id, config.signaling_url);

        Ok(Self {
            shared: Arc::new(Shared {
                id,
                config,
                transport,
                publisher: StatePublisher::new(),
                phase: RwLock::new(SessionPhase::Idle),
                channel: Mutex::new(None),
                event_loop: Mutex::new(None),
                handshake: tokio::sync::Mutex::new(Handshake::default()),
                history: Mutex::new(InteractionHistory::new()),
                closed,
            }),
        })
    }

    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    pub fn state(&self) -> SessionState {
        self.shared.publisher.current()
    }

    pub fn phase(&self) -> SessionPhase {
        self.shared.phase()
    }

    pub fn config(&self) -> &VoiceConfig {
        &self.shared.config
    }

    pub fn transport(&self) -> &T {
        &self.shared.transport
    }

    /// Registriert einen Observer für alle folgenden State-Snapshots
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&SessionState) + Send + Sync + 'static,
    {
        self.shared.publisher.subscribe(observer)
    }

    /// Letzte Voice-Turns, älteste zuerst
    pub fn recent_interactions(&self) -> Vec<VoiceInteraction> {
        self.shared.history.lock().recent()
    }

    pub fn clear_interactions(&self) {
        self.shared.history.lock().clear();
    }

    /// Startet einen (neuen) Verbindungsversuch
    ///
    /// Ein bestehender Versuch wird zuerst vollständig freigegeben. Kehrt
    /// zurück, sobald das Offer gesendet wurde; die Answer wird
    /// asynchron angewendet. Bei einem Fehler ist die Phase `Error` und
    /// `state().error` enthält die Meldung.
    pub async fn initialize(&self) -> Result<(), VoiceError> {
        let shared = &self.shared;
        if shared.is_closed() {
            return Err(VoiceError::SessionClosed);
        }

        let mut handshake = shared.handshake.lock().await;
        if shared.is_closed() {
            return Err(VoiceError::SessionClosed);
        }

        handshake.generation += 1;
        handshake.pending_candidates.clear();
        handshake.remote_description_set = false;
        let generation = handshake.generation;

        if let Some(previous) = shared.event_loop.lock().take() {
            previous.abort();
        }
        if shared.phase() != SessionPhase::Idle {
            tracing::info!("Session {}: releasing previous connection attempt", shared.id);
            shared.teardown().await;
            shared.publisher.update(|s| SessionState {
                error: s.error.clone(),
                ..SessionState::default()
            });
        }
        shared.transition(SessionPhase::Initializing);
        tracing::info!("Session {}: initializing voice connection", shared.id);

        let result = tokio::select! {
            result = shared.establish(generation) => result,
            _ = shared.wait_closed() => Err(VoiceError::SessionClosed),
        };

        match result {
            Ok(()) => {
                if !shared.transition(SessionPhase::AwaitingAnswer) {
                    shared.teardown().await;
                    return Err(VoiceError::SessionClosed);
                }
                shared.publisher.update(|s| SessionState {
                    error: None,
                    ..s.clone()
                });
                tracing::info!("Session {}: offer sent, awaiting answer", shared.id);
                Ok(())
            }
            Err(VoiceError::SessionClosed) => {
                shared.teardown().await;
                Err(VoiceError::SessionClosed)
            }
            Err(e) => {
                shared.fail(&e).await;
                Err(e)
            }
        }
    }

    /// Öffnet einen Mikrofon-Turn beim Server
    pub async fn start_listening(&self) -> Result<(), VoiceError> {
        self.toggle_listening(true).await
    }

    /// Beendet den Mikrofon-Turn; mehrfacher Aufruf ist erlaubt
    pub async fn stop_listening(&self) -> Result<(), VoiceError> {
        self.toggle_listening(false).await
    }

    async fn toggle_listening(&self, listening: bool) -> Result<(), VoiceError> {
        let shared = &self.shared;
        if shared.is_closed() {
            return Err(VoiceError::SessionClosed);
        }

        let handshake = shared.handshake.lock().await;
        if shared.is_closed() {
            return Err(VoiceError::SessionClosed);
        }
        if !handshake.established_once {
            tracing::warn!(
                "Session {}: voice connection not established, ignoring listening toggle",
                shared.id
            );
            return Ok(());
        }

        let message = if listening {
            SignalingMessage::StartListening
        } else {
            SignalingMessage::StopListening
        };
        shared.send(&message)?;
        shared.set_listening(listening);
        Ok(())
    }

    /// Beendet die Session endgültig (idempotent)
    pub async fn close(&self) {
        let shared = &self.shared;
        if shared.closed.send_replace(true) {
            return;
        }
        tracing::info!("Session {}: closing voice session", shared.id);

        if shared.publisher.current().listening {
            let _ = shared.send(&SignalingMessage::StopListening);
        }

        if let Some(event_loop) = shared.event_loop.lock().take() {
            event_loop.abort();
        }
        *shared.phase.write() = SessionPhase::Closed;
        shared.teardown().await;

        {
            let mut handshake = shared.handshake.lock().await;
            handshake.generation += 1;
            handshake.pending_candidates.clear();
            handshake.remote_description_set = false;
        }

        shared.publisher.update(|s| SessionState {
            connected: false,
            listening: false,
            speaking: false,
            error: s.error.clone(),
        });
    }
}

impl<T: MediaTransport> Drop for VoiceSession<T> {
    fn drop(&mut self) {
        self.shared.closed.send_replace(true);
        if let Some(event_loop) = self.shared.event_loop.lock().take() {
            event_loop.abort();
        }
        if let Some(channel) = self.shared.channel.lock().take() {
            channel.close();
        }
    }
}

impl<T: MediaTransport> std::fmt::Debug for VoiceSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceSession")
            .field("id", &self.shared.id)
            .field("phase", &self.phase())
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
