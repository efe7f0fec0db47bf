//! Delivery channel against a real TCP test controller.
//!
//! These tests verify end-to-end delivery semantics:
//! - Per-player ordering, including while the connect report is retried
//! - Recovery when the controller appears late or restarts
//! - Dropping events when the controller is unusable
//! - Flushing at shutdown
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{unused_address, Behavior, TestController};
use pbridge_core::{SessionEvent, SessionEventKind, SessionRecord};
use pbridge_plugin::channel::{spawn_channel, ChannelConfig, DeliveryChannel, RetryPolicy, TcpTransport};
use pbridge_protocol::ProtocolVersion;
use tokio::time::{sleep, Instant};

// ============================================================================
// Helpers
// ============================================================================

const ALICE_ID: &str = "3f1c9a2e-0000-4000-8000-00000000a11c";
const BOB_ID: &str = "7b2d4e6f-0000-4000-8000-0000000000b0";

fn fast_config() -> ChannelConfig {
    ChannelConfig {
        retry: RetryPolicy {
            max_attempts: 4,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
            multiplier: 2.0,
        },
        connect_timeout: Duration::from_millis(500),
        request_timeout: Duration::from_millis(500),
        health_check_interval: Duration::from_secs(30),
        shutdown_grace: Duration::from_secs(2),
    }
}

fn channel_to(address: &str, config: ChannelConfig) -> DeliveryChannel {
    let transport = TcpTransport::new(address, "lobby-1", None);
    spawn_channel(config, Arc::new(transport))
}

fn joined(name: &str, id: &str) -> SessionEvent {
    SessionEvent::Connected(SessionRecord::from_raw(name, id).unwrap())
}

fn left(name: &str, id: &str) -> SessionEvent {
    SessionEvent::Disconnected(SessionRecord::from_raw(name, id).unwrap())
}

async fn wait_settled(channel: &DeliveryChannel, count: u64) {
    let start = Instant::now();
    while start.elapsed() < common::REPORT_WAIT_TIMEOUT {
        let stats = channel.stats();
        if stats.delivered + stats.dropped >= count {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("channel did not settle: {:?}", channel.stats());
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_alice_joins_and_leaves() {
    let controller = TestController::spawn().await;
    let channel = channel_to(&controller.address, fast_config());

    channel.try_submit(joined("Alice", ALICE_ID)).unwrap();
    channel.try_submit(left("Alice", ALICE_ID)).unwrap();

    let reports = controller.wait_for_reports(2).await;

    assert_eq!(reports[0].kind, SessionEventKind::Connected);
    assert_eq!(reports[0].name, "Alice");
    assert_eq!(reports[0].id, ALICE_ID);
    assert_eq!(reports[1].kind, SessionEventKind::Disconnected);
    assert!(reports[0].seq < reports[1].seq);
    assert_eq!(controller.connections(), 1);
}

#[tokio::test]
async fn test_leave_waits_for_retried_join() {
    let controller = TestController::spawn_with(Behavior::failing(ALICE_ID, 2)).await;
    let channel = channel_to(&controller.address, fast_config());

    channel.try_submit(joined("Alice", ALICE_ID)).unwrap();
    channel.try_submit(left("Alice", ALICE_ID)).unwrap();

    let reports = controller.wait_for_reports(2).await;

    let kinds: Vec<SessionEventKind> = reports.iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![SessionEventKind::Connected, SessionEventKind::Disconnected]
    );
    assert_eq!(controller.report_attempts(), 4);
    assert_eq!(channel.stats().retried, 2);
}

#[tokio::test]
async fn test_other_players_not_held_back() {
    let controller = TestController::spawn_with(Behavior::failing(ALICE_ID, 2)).await;
    let channel = channel_to(&controller.address, fast_config());

    channel.try_submit(joined("Alice", ALICE_ID)).unwrap();
    channel.try_submit(joined("Bob", BOB_ID)).unwrap();

    let reports = controller.wait_for_reports(2).await;

    assert_eq!(reports[0].name, "Bob");
    assert_eq!(reports[1].name, "Alice");
}

#[tokio::test]
async fn test_controller_started_late() {
    let address = unused_address().await;
    let config = ChannelConfig {
        retry: RetryPolicy {
            max_attempts: 50,
            ..fast_config().retry
        },
        ..fast_config()
    };
    let channel = channel_to(&address, config);

    channel.try_submit(joined("Alice", ALICE_ID)).unwrap();
    sleep(Duration::from_millis(150)).await;
    assert!(!channel.is_connected());

    let controller = TestController::bind(&address, Behavior::default()).await;
    let reports = controller.wait_for_reports(1).await;

    assert_eq!(reports[0].id, ALICE_ID);
    assert!(channel.is_connected());
    assert!(channel.stats().retried > 0);
}

#[tokio::test]
async fn test_reconnects_after_controller_restart() {
    let first = TestController::spawn().await;
    let address = first.address.clone();
    let channel = channel_to(&address, fast_config());

    channel.try_submit(joined("Alice", ALICE_ID)).unwrap();
    first.wait_for_reports(1).await;

    first.shutdown();
    drop(first);
    sleep(Duration::from_millis(50)).await;

    let second = TestController::bind(&address, Behavior::default()).await;
    channel.try_submit(left("Alice", ALICE_ID)).unwrap();

    let reports = second.wait_for_reports(1).await;
    assert_eq!(reports[0].kind, SessionEventKind::Disconnected);
    assert!(channel.stats().connects >= 2);
}

#[tokio::test]
async fn test_incompatible_controller_drops_events() {
    let controller = TestController::spawn_with(Behavior {
        protocol_version: Some(ProtocolVersion::new(2, 0)),
        ..Default::default()
    })
    .await;
    let channel = channel_to(&controller.address, fast_config());

    channel.try_submit(joined("Alice", ALICE_ID)).unwrap();
    wait_settled(&channel, 1).await;

    assert_eq!(channel.stats().dropped, 1);
    assert_eq!(controller.report_attempts(), 0);
    assert!(!channel.is_connected());
}

#[tokio::test]
async fn test_rejected_handshake_drops_events() {
    let controller = TestController::spawn_with(Behavior {
        reject: Some("unknown server".to_string()),
        ..Default::default()
    })
    .await;
    let channel = channel_to(&controller.address, fast_config());

    channel.try_submit(joined("Alice", ALICE_ID)).unwrap();
    wait_settled(&channel, 1).await;

    assert_eq!(channel.stats().dropped, 1);
    assert!(controller.reports().is_empty());
}

#[tokio::test]
async fn test_unavailable_controller_never_blocks_submit() {
    let address = unused_address().await;
    let channel = channel_to(&address, fast_config());

    let start = std::time::Instant::now();
    channel.try_submit(joined("Alice", ALICE_ID)).unwrap();
    channel.try_submit(left("Alice", ALICE_ID)).unwrap();
    assert!(start.elapsed() < Duration::from_millis(50));

    wait_settled(&channel, 2).await;

    let stats = channel.stats();
    assert_eq!(stats.dropped, 2);
    assert_eq!(stats.delivered, 0);
    assert_eq!(stats.in_flight(), 0);
}

#[tokio::test]
async fn test_shutdown_flushes_to_controller() {
    let controller = TestController::spawn().await;
    let channel = channel_to(&controller.address, fast_config());

    for i in 0..10 {
        channel
            .try_submit(joined(&format!("Player{i}"), &format!("player-{i}")))
            .unwrap();
    }

    let report = channel.shutdown().await;

    assert_eq!(report.dropped, 0);
    assert_eq!(channel.stats().delivered, 10);
    assert_eq!(controller.reports().len(), 10);
    assert!(channel.try_submit(joined("Late", "late-1")).is_err());
}

#[tokio::test]
async fn test_idle_connection_survives_health_checks() {
    let controller = TestController::spawn().await;
    let config = ChannelConfig {
        health_check_interval: Duration::from_millis(30),
        ..fast_config()
    };
    let channel = channel_to(&controller.address, config);

    sleep(Duration::from_millis(200)).await;

    assert!(channel.is_connected());
    assert_eq!(controller.connections(), 1);
    assert_eq!(channel.stats().connects, 1);
}
