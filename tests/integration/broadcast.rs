// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Integration tests for broadcast fan-out through a real relay server.
//!
//! These tests validate:
//! - Every registered client receives each message exactly once
//! - The sender receives its own message by default and not when echo is off
//! - All recipients observe the same message order
//! - A client that joins late receives every message sent after it joined

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use termotalks_proto::codec;
use termotalks_proto::message::{MAX_FRAME_SIZE, Message, Timestamp};
use termotalks_relay::dispatcher::{DispatchSettings, EchoPolicy};
use termotalks_relay::relay::{self, RelaySettings, RelayState};
use tokio_tungstenite::tungstenite;

type Client =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

// =============================================================================
// Helpers
// =============================================================================

/// Start a relay on an OS-assigned port and keep a handle on its state.
async fn start_relay(settings: RelaySettings) -> (SocketAddr, Arc<RelayState>) {
    let state = Arc::new(RelayState::new(settings));
    let (addr, _handle) = relay::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start relay server");
    (addr, state)
}

/// Connect a client and wait until the relay has registered it.
async fn connect(addr: SocketAddr, state: &RelayState) -> Client {
    let expected = state.connection_count() + 1;
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();
    wait_for_connections(state, expected).await;
    ws
}

/// Poll the registry until it holds exactly `n` connections.
async fn wait_for_connections(state: &RelayState, n: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while state.connection_count() != n {
        assert!(
            Instant::now() < deadline,
            "expected {n} connections, have {}",
            state.connection_count()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn send_text(ws: &mut Client, text: &str) {
    ws.send(tungstenite::Message::Text(text.into())).await.unwrap();
}

/// Receive the next text frame, skipping control frames.
async fn recv_text(ws: &mut Client) -> String {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("read failed");
        match msg {
            tungstenite::Message::Text(text) => return text.as_str().to_owned(),
            tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_) => {}
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

/// Assert no data frame arrives within a short window.
async fn expect_silence(ws: &mut Client) {
    let result = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(result.is_err(), "unexpected frame: {result:?}");
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn three_clients_each_receive_once() {
    let (addr, state) = start_relay(RelaySettings::default()).await;
    let mut a = connect(addr, &state).await;
    let mut b = connect(addr, &state).await;
    let mut c = connect(addr, &state).await;

    send_text(&mut a, r#"{"content":"hi"}"#).await;

    for ws in [&mut a, &mut b, &mut c] {
        assert_eq!(recv_text(ws).await, r#"{"content":"hi"}"#);
    }
    for ws in [&mut a, &mut b, &mut c] {
        expect_silence(ws).await;
    }
}

#[tokio::test]
async fn optional_fields_are_relayed_verbatim() {
    let (addr, state) = start_relay(RelaySettings::default()).await;
    let mut a = connect(addr, &state).await;
    let mut b = connect(addr, &state).await;

    let original = Message::new("hello")
        .with_sender("alice")
        .with_timestamp(Timestamp::from_millis(1_700_000_000_000));
    send_text(&mut a, &codec::encode(&original).unwrap()).await;

    let relayed = codec::decode(&recv_text(&mut b).await, MAX_FRAME_SIZE).unwrap();
    assert_eq!(relayed, original);
}

#[tokio::test]
async fn binary_json_frames_are_relayed_as_text() {
    let (addr, state) = start_relay(RelaySettings::default()).await;
    let mut a = connect(addr, &state).await;
    let mut b = connect(addr, &state).await;

    a.send(tungstenite::Message::Binary(
        br#"{"content":"bin"}"#.to_vec().into(),
    ))
    .await
    .unwrap();

    assert_eq!(recv_text(&mut b).await, r#"{"content":"bin"}"#);
}

#[tokio::test]
async fn sender_excluded_when_echo_disabled() {
    let settings = RelaySettings {
        dispatch: DispatchSettings {
            echo: EchoPolicy::ExcludeSender,
            ..DispatchSettings::default()
        },
        ..RelaySettings::default()
    };
    let (addr, state) = start_relay(settings).await;
    let mut a = connect(addr, &state).await;
    let mut b = connect(addr, &state).await;

    send_text(&mut a, r#"{"content":"not for me"}"#).await;

    assert_eq!(recv_text(&mut b).await, r#"{"content":"not for me"}"#);
    expect_silence(&mut a).await;
}

#[tokio::test]
async fn all_recipients_see_the_same_order() {
    let (addr, state) = start_relay(RelaySettings::default()).await;
    let mut a = connect(addr, &state).await;
    let mut b = connect(addr, &state).await;
    let mut c = connect(addr, &state).await;

    for i in 0..10 {
        send_text(&mut a, &format!(r#"{{"content":"a{i}"}}"#)).await;
        send_text(&mut b, &format!(r#"{{"content":"b{i}"}}"#)).await;
    }

    let mut seen = Vec::new();
    for ws in [&mut a, &mut b, &mut c] {
        let mut frames = Vec::new();
        for _ in 0..20 {
            frames.push(recv_text(ws).await);
        }
        seen.push(frames);
    }

    assert_eq!(seen[0], seen[1]);
    assert_eq!(seen[1], seen[2]);

    // Each sender's own messages keep their relative order.
    let a_order: Vec<_> = seen[0].iter().filter(|f| f.contains("\"a")).collect();
    let expected: Vec<_> = (0..10).map(|i| format!(r#"{{"content":"a{i}"}}"#)).collect();
    assert_eq!(a_order, expected.iter().collect::<Vec<_>>());
}

#[tokio::test]
async fn late_joiner_receives_only_later_messages() {
    let (addr, state) = start_relay(RelaySettings::default()).await;
    let mut a = connect(addr, &state).await;
    let mut b = connect(addr, &state).await;

    send_text(&mut a, r#"{"content":"before"}"#).await;
    assert_eq!(recv_text(&mut b).await, r#"{"content":"before"}"#);

    let mut c = connect(addr, &state).await;
    send_text(&mut a, r#"{"content":"after"}"#).await;

    assert_eq!(recv_text(&mut c).await, r#"{"content":"after"}"#);
    assert_eq!(recv_text(&mut b).await, r#"{"content":"after"}"#);
}
