//! Integration tests for the heartbeat engine and command channel.
//!
//! Each test runs a loopback "companion" on `127.0.0.1` that behaves like
//! the PC side: it answers pings with pongs and commands with acks, or stays
//! silent, or answers too late.  Intervals are shortened to milliseconds so
//! a full Connected → ConnectionLost cycle takes well under a second.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use buttonbox_client::application::heartbeat_monitor::{CommandAckPolicy, HeartbeatSettings};
use buttonbox_client::application::send_macro::SendError;
use buttonbox_client::application::state_publisher::ConnectionStatePublisher;
use buttonbox_client::infrastructure::endpoint_source::WatchEndpointSource;
use buttonbox_client::infrastructure::network::HeartbeatEngine;
use buttonbox_core::protocol::packet::{CapturePurpose, LoopAction};
use buttonbox_core::{
    decode_packet, encode_packet, ConnectionState, Endpoint, Packet, PacketBody, PacketKind,
};
use serde_json::{json, Value};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(3);

// ── Loopback companion ────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq)]
enum Reply {
    Immediately,
    After(Duration),
    Never,
}

struct Companion {
    addr: SocketAddr,
    pings: Arc<AtomicUsize>,
    commands: Arc<Mutex<Vec<(Uuid, String)>>>,
    /// Auxiliary requests with their nested payload as it was on the wire.
    auxiliary: Arc<Mutex<Vec<(PacketKind, Value)>>>,
    answering: Arc<AtomicBool>,
    garbage_first: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Companion {
    async fn spawn(reply: Reply) -> Self {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.expect("bind companion"));
        let addr = socket.local_addr().expect("companion addr");
        let pings = Arc::new(AtomicUsize::new(0));
        let commands = Arc::new(Mutex::new(Vec::new()));
        let auxiliary = Arc::new(Mutex::new(Vec::new()));
        let answering = Arc::new(AtomicBool::new(reply != Reply::Never));
        let garbage_first = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn({
            let (pings, commands, auxiliary, answering, garbage_first) = (
                Arc::clone(&pings),
                Arc::clone(&commands),
                Arc::clone(&auxiliary),
                Arc::clone(&answering),
                Arc::clone(&garbage_first),
            );
            async move {
                let mut buf = vec![0u8; 2048];
                loop {
                    let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                        continue;
                    };
                    let Ok(packet) = decode_packet(&buf[..len]) else {
                        continue;
                    };
                    if matches!(
                        packet.kind(),
                        PacketKind::TriggerImportBrowser
                            | PacketKind::CaptureMousePosition
                            | PacketKind::AutoDragLoopCommand
                    ) {
                        let envelope: Value = serde_json::from_slice(&buf[..len]).unwrap();
                        let nested = envelope["payload"]
                            .as_str()
                            .and_then(|payload| serde_json::from_str(payload).ok())
                            .unwrap_or(Value::Null);
                        auxiliary.lock().unwrap().push((packet.kind(), nested));
                        continue;
                    }
                    let response = match packet.body {
                        PacketBody::Ping => {
                            pings.fetch_add(1, Ordering::SeqCst);
                            PacketBody::Pong
                        }
                        PacketBody::Command { payload } => {
                            commands.lock().unwrap().push((packet.id, payload));
                            PacketBody::CommandAck
                        }
                        _ => continue,
                    };
                    if !answering.load(Ordering::SeqCst) {
                        continue;
                    }
                    if garbage_first.load(Ordering::SeqCst) {
                        let _ = socket.send_to(br#"{"packetId":"3f2b8c1e-9d4a"#, peer).await;
                    }
                    let bytes = encode_packet(&Packet::reply_to(packet.id, response)).unwrap();
                    match reply {
                        Reply::After(delay) => {
                            let socket = Arc::clone(&socket);
                            tokio::spawn(async move {
                                tokio::time::sleep(delay).await;
                                let _ = socket.send_to(&bytes, peer).await;
                            });
                        }
                        _ => {
                            let _ = socket.send_to(&bytes, peer).await;
                        }
                    }
                }
            }
        });

        Self {
            addr,
            pings,
            commands,
            auxiliary,
            answering,
            garbage_first,
            task,
        }
    }

    fn endpoint(&self) -> Option<Endpoint> {
        Endpoint::new(self.addr.ip().to_string(), self.addr.port())
    }

    fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    fn commands(&self) -> Vec<(Uuid, String)> {
        self.commands.lock().unwrap().clone()
    }

    fn auxiliary(&self) -> Vec<(PacketKind, Value)> {
        self.auxiliary.lock().unwrap().clone()
    }

    fn go_silent(&self) {
        self.answering.store(false, Ordering::SeqCst);
    }
}

impl Drop for Companion {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn fast_settings() -> HeartbeatSettings {
    HeartbeatSettings {
        health_check_interval: Duration::from_millis(100),
        ping_timeout: Duration::from_millis(50),
        ..HeartbeatSettings::default()
    }
}

async fn reaches(publisher: &ConnectionStatePublisher, want: ConnectionState) -> bool {
    let mut states = publisher.observe();
    let reached = matches!(
        tokio::time::timeout(WAIT, states.wait_for(|state| *state == want)).await,
        Ok(Ok(_))
    );
    reached
}

/// Lets already-sent datagrams and queued notifications be processed.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

/// Records every state the publisher goes through.
fn record_states(publisher: &ConnectionStatePublisher) -> Arc<Mutex<Vec<ConnectionState>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut states = publisher.observe();
    let sink = Arc::clone(&seen);
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            sink.lock().unwrap().push(state);
        }
    });
    seen
}

// ── Heartbeat ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_answered_pings_reach_connected() {
    // Arrange
    let companion = Companion::spawn(Reply::Immediately).await;
    let engine = HeartbeatEngine::new(fast_settings());
    let states = record_states(&engine.publisher());

    // Act
    assert_ok!(engine.apply_endpoint(companion.endpoint()).await);

    // Assert
    assert!(reaches(&engine.publisher(), ConnectionState::Connected).await);
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.consecutive_failures, 0);
    assert!(snapshot.latest_response_time_ms.is_some());
    settle().await;
    assert_eq!(
        states.lock().unwrap()[..2],
        [ConnectionState::Connecting, ConnectionState::Connected]
    );
    engine.stop().await;
}

#[tokio::test]
async fn test_three_missed_pongs_declare_connection_lost() {
    // Arrange
    let companion = Companion::spawn(Reply::Immediately).await;
    let engine = HeartbeatEngine::new(fast_settings());
    assert_ok!(engine.apply_endpoint(companion.endpoint()).await);
    assert!(reaches(&engine.publisher(), ConnectionState::Connected).await);
    let states = record_states(&engine.publisher());

    // Act
    companion.go_silent();

    // Assert
    assert!(reaches(&engine.publisher(), ConnectionState::ConnectionLost).await);
    assert_eq!(engine.snapshot().consecutive_failures, 3);
    settle().await;
    assert_eq!(
        *states.lock().unwrap(),
        vec![
            ConnectionState::Connected,
            ConnectionState::Connecting,
            ConnectionState::ConnectionLost
        ]
    );
    engine.stop().await;
}

#[tokio::test]
async fn test_late_pongs_never_count_as_successes() {
    // Arrange – every pong arrives after its ping was already reaped
    let companion = Companion::spawn(Reply::After(Duration::from_millis(90))).await;
    let engine = HeartbeatEngine::new(fast_settings());

    // Act
    assert_ok!(engine.apply_endpoint(companion.endpoint()).await);

    // Assert
    assert!(reaches(&engine.publisher(), ConnectionState::ConnectionLost).await);
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.consecutive_successes, 0);
    assert!(snapshot.consecutive_failures >= 3);
    engine.stop().await;
}

#[tokio::test]
async fn test_malformed_datagrams_do_not_disturb_the_heartbeat() {
    // Arrange
    let companion = Companion::spawn(Reply::Immediately).await;
    companion.garbage_first.store(true, Ordering::SeqCst);
    let engine = HeartbeatEngine::new(fast_settings());

    // Act
    assert_ok!(engine.apply_endpoint(companion.endpoint()).await);

    // Assert
    assert!(reaches(&engine.publisher(), ConnectionState::Connected).await);
    assert_eq!(engine.snapshot().consecutive_failures, 0);
    engine.stop().await;
}

#[tokio::test]
async fn test_endpoint_change_tears_down_old_session_first() {
    // Arrange
    let old = Companion::spawn(Reply::Immediately).await;
    let new = Companion::spawn(Reply::Immediately).await;
    let engine = HeartbeatEngine::new(fast_settings());
    assert_ok!(engine.apply_endpoint(old.endpoint()).await);
    assert!(reaches(&engine.publisher(), ConnectionState::Connected).await);

    // Act
    assert_ok!(engine.apply_endpoint(new.endpoint()).await);
    settle().await;
    let old_pings_at_switch = old.pings();

    // Assert
    assert!(reaches(&engine.publisher(), ConnectionState::Connected).await);
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(old.pings(), old_pings_at_switch);
    assert!(new.pings() >= 2);
    engine.stop().await;
}

#[tokio::test]
async fn test_same_endpoint_does_not_rebuild_session() {
    // Arrange
    let companion = Companion::spawn(Reply::Immediately).await;
    let engine = HeartbeatEngine::new(fast_settings());
    assert_ok!(engine.apply_endpoint(companion.endpoint()).await);
    assert!(reaches(&engine.publisher(), ConnectionState::Connected).await);

    // Act
    assert_ok!(engine.apply_endpoint(companion.endpoint()).await);

    // Assert – a rebuild would have reset to Connecting
    assert_eq!(engine.state(), ConnectionState::Connected);
    engine.stop().await;
}

#[tokio::test]
async fn test_reconnect_rebuilds_session() {
    let companion = Companion::spawn(Reply::Immediately).await;
    let engine = HeartbeatEngine::new(fast_settings());
    assert_ok!(engine.apply_endpoint(companion.endpoint()).await);
    assert!(reaches(&engine.publisher(), ConnectionState::Connected).await);
    let states = record_states(&engine.publisher());

    assert_ok!(engine.reconnect().await);

    assert!(reaches(&engine.publisher(), ConnectionState::Connected).await);
    assert!(states.lock().unwrap().contains(&ConnectionState::Connecting));
    engine.stop().await;
}

#[tokio::test]
async fn test_engine_follows_endpoint_source() {
    // Arrange
    let companion = Companion::spawn(Reply::Immediately).await;
    let engine = HeartbeatEngine::new(fast_settings());
    let source = WatchEndpointSource::default();
    engine.start(&source);

    // Act / Assert
    source.set(companion.endpoint());
    assert!(reaches(&engine.publisher(), ConnectionState::Connected).await);

    source.set(None);
    assert!(reaches(&engine.publisher(), ConnectionState::NoConfig).await);
    assert_eq!(engine.snapshot().pending_pings, 0);

    engine.stop().await;
    assert_eq!(engine.state(), ConnectionState::NoConfig);
}

// ── Commands ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_send_without_endpoint_fails_fast() {
    // Arrange
    let engine = HeartbeatEngine::new(fast_settings());
    let channel = engine.command_channel();

    // Act
    let result = tokio::time::timeout(Duration::from_millis(100), channel.send("macro-1")).await;

    // Assert
    let err = assert_err!(result.expect("send must not block"));
    assert!(matches!(err, SendError::NotConnected));
    assert_eq!(engine.state(), ConnectionState::NoConfig);
}

#[tokio::test]
async fn test_command_reaches_companion_verbatim() {
    // Arrange
    let companion = Companion::spawn(Reply::Immediately).await;
    let engine = HeartbeatEngine::new(fast_settings());
    assert_ok!(engine.apply_endpoint(companion.endpoint()).await);
    let payload = r#"{"type":"KeyCombo","keys":["ctrl","alt","t"]}"#;

    // Act
    let id = assert_ok!(engine.command_channel().send(payload).await);

    // Assert
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(companion.commands(), vec![(id, payload.to_string())]);
    assert_eq!(engine.snapshot().pending_commands, 0);
    engine.stop().await;
}

#[tokio::test]
async fn test_ack_mode_clears_pending_command() {
    // Arrange
    let companion = Companion::spawn(Reply::Immediately).await;
    let engine = HeartbeatEngine::new(HeartbeatSettings {
        command_ack: CommandAckPolicy::AwaitAck {
            timeout: Duration::from_millis(50),
            max_retries: 2,
        },
        ..fast_settings()
    });
    assert_ok!(engine.apply_endpoint(companion.endpoint()).await);
    assert!(reaches(&engine.publisher(), ConnectionState::Connected).await);

    // Act
    assert_ok!(engine.command_channel().send("macro-ack").await);

    // Assert
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.snapshot().pending_commands, 0);
    assert_eq!(engine.state(), ConnectionState::Connected);
    engine.stop().await;
}

#[tokio::test]
async fn test_ack_mode_retransmits_with_same_id() {
    // Arrange – the companion records commands but never acknowledges
    let companion = Companion::spawn(Reply::Never).await;
    let engine = HeartbeatEngine::new(HeartbeatSettings {
        health_check_interval: Duration::from_secs(60),
        command_ack: CommandAckPolicy::AwaitAck {
            timeout: Duration::from_millis(40),
            max_retries: 2,
        },
        ..fast_settings()
    });
    assert_ok!(engine.apply_endpoint(companion.endpoint()).await);

    // Act
    let id = assert_ok!(engine.command_channel().send("macro-retry").await);

    // Assert – first send plus two retries, all with the same id
    tokio::time::sleep(Duration::from_millis(400)).await;
    let received = companion.commands();
    assert_eq!(received.len(), 3);
    assert!(received.iter().all(|(got, _)| *got == id));
    assert_eq!(engine.snapshot().pending_commands, 0);
    engine.stop().await;
}

// ── Auxiliary requests ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_auxiliary_requests_carry_nested_payloads() {
    // Arrange
    let companion = Companion::spawn(Reply::Immediately).await;
    let engine = HeartbeatEngine::new(fast_settings());
    assert_ok!(engine.apply_endpoint(companion.endpoint()).await);
    assert!(reaches(&engine.publisher(), ConnectionState::Connected).await);
    let channel = engine.command_channel();

    // Act
    assert_ok!(channel.send_trigger_import("http://x").await);
    assert_ok!(channel.send_auto_drag_loop(LoopAction::Start).await);
    assert_ok!(channel.send_capture_mouse_position(CapturePurpose::Source).await);
    settle().await;

    // Assert
    assert_eq!(
        companion.auxiliary(),
        vec![
            (PacketKind::TriggerImportBrowser, json!({ "url": "http://x" })),
            (PacketKind::AutoDragLoopCommand, json!({ "action": "START" })),
            (PacketKind::CaptureMousePosition, json!({ "purpose": "SRC" })),
        ]
    );
    engine.stop().await;
}

#[tokio::test]
async fn test_connection_lost_refuses_capture_and_loop_but_not_import() {
    // Arrange – the companion never answers, so three misses lose the link
    let companion = Companion::spawn(Reply::Never).await;
    let engine = HeartbeatEngine::new(fast_settings());
    assert_ok!(engine.apply_endpoint(companion.endpoint()).await);
    assert!(reaches(&engine.publisher(), ConnectionState::ConnectionLost).await);
    let channel = engine.command_channel();

    // Act
    let capture = channel.send_capture_mouse_position(CapturePurpose::Destination).await;
    let drag = channel.send_auto_drag_loop(LoopAction::Stop).await;
    let import = channel.send_trigger_import("http://x").await;
    settle().await;

    // Assert
    assert!(matches!(assert_err!(capture), SendError::NotConnected));
    assert!(matches!(assert_err!(drag), SendError::NotConnected));
    assert_ok!(import);
    assert_eq!(
        companion.auxiliary(),
        vec![(PacketKind::TriggerImportBrowser, json!({ "url": "http://x" }))]
    );
    engine.stop().await;
}
