//! WebRTC Transport
//!
//! Verwaltet die Peer Connection zum Voice-Agent und koordiniert
//! Mikrofon-Aufnahme und lokalen PCMU-Track.

use super::audio::{encode_pcmu, CaptureBuffer, MicrophoneCapture, FRAME_DURATION, SAMPLE_RATE};
use super::{MediaTransport, TransportError, TransportEvent};
use crate::config::VoiceConfig;
use crate::signaling::{IceCandidate, SdpKind, SessionDescription};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_PCMU};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

fn setup_error(e: impl std::fmt::Display) -> TransportError {
    TransportError::ConnectionSetup(e.to_string())
}

fn handshake_error(e: impl std::fmt::Display) -> TransportError {
    TransportError::Handshake(e.to_string())
}

// ============================================================================
// WEBRTC TRANSPORT
// ============================================================================

/// Peer Connection + Mikrofon einer Voice-Session
pub struct WebRtcTransport {
    ice_servers: Vec<RTCIceServer>,
    peer_connection: Mutex<Option<Arc<RTCPeerConnection>>>,
    capture: Mutex<Option<MicrophoneCapture>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl WebRtcTransport {
    /// Erstellt einen Transport mit den ICE-Servern aus der Konfiguration
    pub fn new(config: &VoiceConfig) -> Self {
        let ice_servers = config
            .ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        Self {
            ice_servers,
            peer_connection: Mutex::new(None),
            capture: Mutex::new(None),
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Aktueller Mikrofon-Pegel (0.0 - 1.0)
    pub fn input_level(&self) -> f32 {
        self.capture
            .lock()
            .as_ref()
            .map(|c| c.input_level())
            .unwrap_or(0.0)
    }

    pub fn is_initialized(&self) -> bool {
        self.peer_connection.lock().is_some()
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    fn peer_connection(&self) -> Result<Arc<RTCPeerConnection>, TransportError> {
        self.peer_connection
            .lock()
            .clone()
            .ok_or(TransportError::NotInitialized)
    }

    /// Erstellt eine neue Peer Connection
    async fn create_peer_connection(&self) -> Result<Arc<RTCPeerConnection>, TransportError> {
        // Media Engine mit Default-Codecs (Opus, G722, PCMU, PCMA)
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(setup_error)?;

        // Interceptors für RTCP, NACK etc.
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(setup_error)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let pc = api.new_peer_connection(config).await.map_err(setup_error)?;
        Ok(Arc::new(pc))
    }

    /// Registriert Event Handler für die Peer Connection
    fn register_handlers(
        pc: &RTCPeerConnection,
        events: mpsc::UnboundedSender<TransportEvent>,
        tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    ) {
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            match s {
                RTCPeerConnectionState::Failed | RTCPeerConnectionState::Disconnected => {
                    tracing::warn!("Peer connection state: {:?}", s);
                }
                _ => tracing::info!("Peer connection state: {:?}", s),
            }
            Box::pin(async {})
        }));

        // ICE Candidate Handler
        let candidate_tx = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            if let Some(c) = candidate {
                match c.to_json() {
                    Ok(init) => {
                        let _ = candidate_tx.send(TransportEvent::LocalCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }));
                    }
                    Err(e) => tracing::warn!("Failed to serialize local ICE candidate: {}", e),
                }
            }
            Box::pin(async {})
        }));

        // Track Handler: Remote-Audio gilt bis End-of-Stream als "speaking"
        pc.on_track(Box::new(move |track, _, _| {
            let events = events.clone();
            let tasks = Arc::clone(&tasks);
            Box::pin(async move {
                tracing::info!("Received track: {:?}", track.codec());
                let _ = events.send(TransportEvent::RemoteTrackStarted);

                let reader = tokio::spawn(async move {
                    while track.read_rtp().await.is_ok() {}
                    tracing::info!("Remote track ended");
                    let _ = events.send(TransportEvent::RemoteTrackEnded);
                });
                tasks.lock().push(reader);
            })
        }));
    }

    /// Hängt den lokalen PCMU-Track an und startet Frame-Pump + RTCP-Reader
    async fn attach_local_audio(
        &self,
        pc: &RTCPeerConnection,
        buffer: CaptureBuffer,
    ) -> Result<(), TransportError> {
        let audio_track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_PCMU.to_owned(),
                clock_rate: SAMPLE_RATE,
                channels: 1,
                ..Default::default()
            },
            "audio".to_string(),
            "primer-voice".to_string(),
        ));

        let rtp_sender = pc
            .add_track(Arc::clone(&audio_track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(setup_error)?;

        // RTCP lesen, damit die Interceptors arbeiten
        let rtcp_reader = tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        let frame_pump = tokio::spawn(async move {
            let mut interval = tokio::time::interval(FRAME_DURATION);
            loop {
                interval.tick().await;
                while let Some(frame) = buffer.read_frame() {
                    let sample = Sample {
                        data: Bytes::from(encode_pcmu(&frame)),
                        duration: FRAME_DURATION,
                        ..Default::default()
                    };
                    if let Err(e) = audio_track.write_sample(&sample).await {
                        tracing::debug!("Failed to write audio sample: {}", e);
                    }
                }
            }
        });

        self.tasks.lock().extend([rtcp_reader, frame_pump]);
        Ok(())
    }

    fn to_rtc_description(
        description: SessionDescription,
    ) -> Result<RTCSessionDescription, TransportError> {
        let result = match description.kind {
            SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
            SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
            SdpKind::Pranswer => RTCSessionDescription::pranswer(description.sdp),
        };
        result.map_err(|e| TransportError::Handshake(format!("Invalid SDP: {}", e)))
    }
}

impl MediaTransport for WebRtcTransport {
    async fn initialize(
        &self,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<(), TransportError> {
        // Bestehende Ressourcen zuerst freigeben
        self.close().await;

        let mut capture = MicrophoneCapture::new()?;
        capture.start()?;
        let buffer = capture.buffer();

        let pc = match self.create_peer_connection().await {
            Ok(pc) => pc,
            Err(e) => {
                capture.stop();
                return Err(e);
            }
        };

        Self::register_handlers(&pc, events, Arc::clone(&self.tasks));

        if let Err(e) = self.attach_local_audio(&pc, buffer).await {
            capture.stop();
            let _ = pc.close().await;
            return Err(e);
        }

        *self.capture.lock() = Some(capture);
        *self.peer_connection.lock() = Some(pc);

        tracing::info!("WebRTC transport initialized");
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let pc = self.peer_connection()?;

        let offer = pc.create_offer(None).await.map_err(handshake_error)?;
        pc.set_local_description(offer.clone())
            .await
            .map_err(handshake_error)?;

        let local = pc.local_description().await.unwrap_or(offer);
        Ok(SessionDescription::offer(local.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let pc = self.peer_connection()?;

        let answer = pc.create_answer(None).await.map_err(handshake_error)?;
        pc.set_local_description(answer.clone())
            .await
            .map_err(handshake_error)?;

        let local = pc.local_description().await.unwrap_or(answer);
        Ok(SessionDescription::answer(local.sdp))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError> {
        let pc = self.peer_connection()?;
        let description = Self::to_rtc_description(description)?;

        pc.set_remote_description(description)
            .await
            .map_err(handshake_error)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        let pc = self.peer_connection()?;

        pc.add_ice_candidate(RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        })
        .await
        .map_err(handshake_error)
    }

    async fn close(&self) {
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }

        let capture = self.capture.lock().take();
        if let Some(mut capture) = capture {
            capture.stop();
        }

        let pc = self.peer_connection.lock().take();
        if let Some(pc) = pc {
            if let Err(e) = pc.close().await {
                tracing::warn!("Failed to close peer connection: {}", e);
            }
            tracing::info!("Peer connection closed");
        }
    }
}

impl Drop for WebRtcTransport {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        // Ohne close() laufen ICE/DTLS weiter
        if let Some(pc) = self.peer_connection.lock().take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(e) = pc.close().await {
                            tracing::warn!("Failed to close dropped peer connection: {}", e);
                        }
                    });
                }
                Err(_) => tracing::warn!("Peer connection dropped outside a runtime, not closed"),
            }
        }
    }
}

impl std::fmt::Debug for WebRtcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRtcTransport")
            .field("ice_servers", &self.ice_servers.len())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
