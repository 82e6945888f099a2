//! Shared test fixtures: scripted media transport and an in-process
//! WebSocket signaling server.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use primer_voice::signaling::{IceCandidate, SdpKind, SessionDescription, SignalingMessage};
use primer_voice::transport::{AudioError, MediaTransport, TransportError, TransportEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Polls `condition` until it holds or the timeout expires
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    tokio::time::timeout(WAIT_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

/// A localhost port nobody listens on
pub fn unused_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to ephemeral port")
        .local_addr()
        .expect("Failed to get local address")
        .port()
}

// ============================================================================
// FAKE TRANSPORT
// ============================================================================

/// Media transport that records every call and lets tests inject events
#[derive(Default)]
pub struct FakeTransport {
    pub fail_capture: AtomicBool,
    pub fail_candidates: AtomicBool,
    pub fail_remote_description: AtomicBool,
    calls: Mutex<Vec<String>>,
    events: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
}

impl FakeTransport {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    /// Calls starting with any of `prefixes`, in order
    pub fn calls_with_prefix(&self, prefixes: &[&str]) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| prefixes.iter().any(|p| c.starts_with(p)))
            .cloned()
            .collect()
    }

    /// Emits a transport event; false when not initialized
    pub fn emit(&self, event: TransportEvent) -> bool {
        match self.events.lock().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }
}

impl MediaTransport for FakeTransport {
    async fn initialize(
        &self,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<(), TransportError> {
        self.record("initialize");
        if self.fail_capture.load(Ordering::SeqCst) {
            return Err(AudioError::NoInputDevice.into());
        }
        *self.events.lock() = Some(events);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        self.record("create-offer");
        Ok(SessionDescription::offer("fake-offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        self.record("create-answer");
        Ok(SessionDescription::answer("fake-answer"))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError> {
        let kind = match description.kind {
            SdpKind::Offer => "offer",
            SdpKind::Pranswer => "pranswer",
            SdpKind::Answer => "answer",
        };
        self.record(format!("remote:{}", kind));
        if self.fail_remote_description.load(Ordering::SeqCst) {
            return Err(TransportError::Handshake("rejected remote description".to_string()));
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.record(format!("candidate:{}", candidate.candidate));
        if self.fail_candidates.load(Ordering::SeqCst) {
            return Err(TransportError::Handshake("stale candidate".to_string()));
        }
        Ok(())
    }

    async fn close(&self) {
        self.record("close");
        self.events.lock().take();
    }
}

// ============================================================================
// FAKE SIGNALING SERVER
// ============================================================================

/// How the server reacts to an incoming offer
#[derive(Debug, Clone, Default)]
pub struct ServerScript {
    pub auto_answer: bool,
    /// Sent right before the answer
    pub candidates_before_answer: Vec<IceCandidate>,
}

impl ServerScript {
    pub fn answering() -> Self {
        Self {
            auto_answer: true,
            ..Self::default()
        }
    }

    pub fn silent() -> Self {
        Self::default()
    }
}

enum ServerCommand {
    Send(String),
    Disconnect,
}

/// Voice endpoint stand-in serving one client connection at a time
pub struct FakeSignalingServer {
    url: String,
    commands: mpsc::UnboundedSender<ServerCommand>,
    received: tokio::sync::Mutex<mpsc::UnboundedReceiver<SignalingMessage>>,
    task: JoinHandle<()>,
}

impl FakeSignalingServer {
    pub async fn start(script: ServerScript) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test server");
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (received_tx, received) = mpsc::unbounded_channel();
        let task = tokio::spawn(serve(listener, script, commands_rx, received_tx));

        Self {
            url,
            commands,
            received: tokio::sync::Mutex::new(received),
            task,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn push(&self, message: SignalingMessage) {
        self.push_raw(&message.to_json().unwrap());
    }

    pub fn push_raw(&self, text: &str) {
        let _ = self.commands.send(ServerCommand::Send(text.to_string()));
    }

    /// Closes the current client connection
    pub fn disconnect(&self) {
        let _ = self.commands.send(ServerCommand::Disconnect);
    }

    /// Next message the client sent, if any arrives in time
    pub async fn next_message(&self) -> Option<SignalingMessage> {
        self.next_message_within(WAIT_TIMEOUT).await
    }

    pub async fn next_message_within(&self, timeout: Duration) -> Option<SignalingMessage> {
        let mut received = self.received.lock().await;
        tokio::time::timeout(timeout, received.recv())
            .await
            .ok()
            .flatten()
    }
}

impl Drop for FakeSignalingServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    listener: TcpListener,
    script: ServerScript,
    mut commands: mpsc::UnboundedReceiver<ServerCommand>,
    received: mpsc::UnboundedSender<SignalingMessage>,
) {
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let Ok(ws_stream) = accept_async(stream).await else {
            continue;
        };
        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(message) = SignalingMessage::parse(&text) else {
                            continue;
                        };
                        let is_offer = matches!(message, SignalingMessage::Offer { .. });
                        let _ = received.send(message);

                        if is_offer && script.auto_answer {
                            for candidate in &script.candidates_before_answer {
                                let text = SignalingMessage::IceCandidate {
                                    candidate: candidate.clone(),
                                }
                                .to_json()
                                .unwrap();
                                let _ = write.send(Message::Text(text)).await;
                            }
                            let answer = SignalingMessage::Answer {
                                sdp: SessionDescription::answer("fake-remote-answer"),
                            };
                            let _ = write.send(Message::Text(answer.to_json().unwrap())).await;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                },
                command = commands.recv() => match command {
                    Some(ServerCommand::Send(text)) => {
                        let _ = write.send(Message::Text(text)).await;
                    }
                    Some(ServerCommand::Disconnect) => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                    None => return,
                },
            }
        }
    }
}
