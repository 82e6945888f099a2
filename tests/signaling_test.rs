//! Integration tests for the WebSocket signaling channel

mod common;

use common::{unused_port, FakeSignalingServer, ServerScript, WAIT_TIMEOUT};
use primer_voice::signaling::{
    ChannelEvent, ChannelState, IceCandidate, SignalingChannel, SignalingError, SignalingMessage,
};
use std::time::Duration;
use tokio::sync::mpsc;

async fn next_event(events: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> Option<ChannelEvent> {
    tokio::time::timeout(WAIT_TIMEOUT, events.recv())
        .await
        .ok()
        .flatten()
}

async fn open_channel(
    server: &FakeSignalingServer,
) -> (SignalingChannel, mpsc::UnboundedReceiver<ChannelEvent>) {
    let channel = SignalingChannel::new(server.url(), Duration::from_secs(5)).unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    channel.connect(tx).await.expect("Failed to connect");
    (channel, rx)
}

#[tokio::test]
async fn test_connect_and_send() {
    let server = FakeSignalingServer::start(ServerScript::silent()).await;
    let (channel, _events) = open_channel(&server).await;

    assert_eq!(channel.state(), ChannelState::Open);
    assert_eq!(
        channel.url().as_str().trim_end_matches('/'),
        server.url().trim_end_matches('/')
    );
    channel.send(&SignalingMessage::StartListening).unwrap();

    assert_eq!(server.next_message().await, Some(SignalingMessage::StartListening));
}

#[tokio::test]
async fn test_connect_twice_fails() {
    let server = FakeSignalingServer::start(ServerScript::silent()).await;
    let (channel, _events) = open_channel(&server).await;

    let (tx, _rx) = mpsc::unbounded_channel();
    assert_eq!(
        channel.connect(tx).await,
        Err(SignalingError::AlreadyConnected)
    );
    assert!(channel.is_open());
}

#[tokio::test]
async fn test_connect_refused() {
    let url = format!("ws://127.0.0.1:{}", unused_port());
    let channel = SignalingChannel::new(&url, Duration::from_secs(5)).unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();

    let result = channel.connect(tx).await;

    assert!(matches!(result, Err(SignalingError::ConnectFailed(_))));
    assert_eq!(channel.state(), ChannelState::Closed);
}

#[tokio::test]
async fn test_connect_timeout() {
    // accepts TCP but never answers the WebSocket handshake
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let channel = SignalingChannel::new(&url, Duration::from_millis(200)).unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();

    let err = channel.connect(tx).await.unwrap_err();

    match err {
        SignalingError::ConnectFailed(reason) => assert!(reason.contains("timed out")),
        other => panic!("Expected ConnectFailed, got {:?}", other),
    }
    drop(listener);
}

#[tokio::test]
async fn test_inbound_order_preserved_and_malformed_skipped() {
    let server = FakeSignalingServer::start(ServerScript::silent()).await;
    let (_channel, mut events) = open_channel(&server).await;

    server.push(SignalingMessage::SpeakingStart);
    server.push_raw("{broken");
    server.push_raw(r#"{"type":"teleport"}"#);
    server.push(SignalingMessage::SpeakingEnd);
    server.push(SignalingMessage::IceCandidate {
        candidate: IceCandidate::new("candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host"),
    });

    assert_eq!(
        next_event(&mut events).await,
        Some(ChannelEvent::Message(SignalingMessage::SpeakingStart))
    );
    assert_eq!(
        next_event(&mut events).await,
        Some(ChannelEvent::Message(SignalingMessage::SpeakingEnd))
    );
    assert!(matches!(
        next_event(&mut events).await,
        Some(ChannelEvent::Message(SignalingMessage::IceCandidate { .. }))
    ));
}

#[tokio::test]
async fn test_remote_close_emits_closed() {
    let server = FakeSignalingServer::start(ServerScript::silent()).await;
    let (channel, mut events) = open_channel(&server).await;

    server.disconnect();

    assert_eq!(next_event(&mut events).await, Some(ChannelEvent::Closed));
    assert_eq!(channel.state(), ChannelState::Closed);
    assert_eq!(
        channel.send(&SignalingMessage::StopListening),
        Err(SignalingError::ChannelNotOpen)
    );
}

#[tokio::test]
async fn test_local_close() {
    let server = FakeSignalingServer::start(ServerScript::silent()).await;
    let (channel, mut events) = open_channel(&server).await;

    channel.send(&SignalingMessage::StopListening).unwrap();
    channel.close();
    channel.close();

    assert_eq!(channel.state(), ChannelState::Closed);
    assert_eq!(server.next_message().await, Some(SignalingMessage::StopListening));
    assert_eq!(next_event(&mut events).await, Some(ChannelEvent::Closed));
    assert_eq!(
        channel.send(&SignalingMessage::StartListening),
        Err(SignalingError::ChannelNotOpen)
    );
}
