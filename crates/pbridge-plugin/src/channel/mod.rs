//! Delivery channel to the control plane using the Actor pattern.
//!
//! The channel decouples presence notifications from network state. The
//! host thread only ever touches the [`DeliveryChannel`] handle, whose
//! `submit` enqueues and returns. A single `ChannelWorker` task owns the
//! transport connection and does all network I/O.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐  ChannelCommand  ┌─────────────────┐   Transport   ┌──────────────┐
//! │ DeliveryChannel │─────────────────▶│  ChannelWorker  │──────────────▶│ Control plane│
//! │ (host thread)   │  (unbounded mpsc)│ lanes per player│ report / ping │              │
//! └─────────────────┘                  └─────────────────┘               └──────────────┘
//!          │                                    │
//!          └──────── ChannelShared ─────────────┘
//!            (state watch, stats, connected flag)
//! ```
//!
//! # Ordering
//!
//! Events are queued per player. Only the head of a player's lane is ever
//! in flight, so a `Disconnected` is never attempted before the preceding
//! `Connected` for the same player has been delivered or dropped. Lanes of
//! different players proceed independently.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - Channel operations handle closure gracefully

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

mod handle;
mod retry;
mod transport;
mod worker;

pub use handle::DeliveryChannel;
pub use retry::RetryPolicy;
pub use transport::{Connection, TcpConnection, TcpTransport, Transport};

use crate::lifecycle::LifecycleState;
use worker::{ChannelCommand, ChannelWorker};

// ============================================================================
// Configuration
// ============================================================================

/// Runtime settings of the delivery channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Per-event retry budget; also shapes the idle reconnect backoff.
    pub retry: RetryPolicy,

    /// Bound for establishing and handshaking a connection.
    pub connect_timeout: Duration,

    /// Bound for a single report or ping round trip.
    pub request_timeout: Duration,

    /// Idle time after which the connection is health-checked.
    pub health_check_interval: Duration,

    /// How long shutdown keeps flushing pending events.
    pub shutdown_grace: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            health_check_interval: Duration::from_secs(15),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

// ============================================================================
// Channel State
// ============================================================================

/// Lifecycle of a delivery channel instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Accepting and delivering events.
    Active,
    /// No new submissions; flushing what is pending.
    ShuttingDown,
    /// Worker has stopped; nothing is delivered anymore.
    Terminated,
}

impl From<ChannelState> for LifecycleState {
    fn from(state: ChannelState) -> Self {
        match state {
            ChannelState::Active => LifecycleState::Active,
            ChannelState::ShuttingDown => LifecycleState::ShuttingDown,
            ChannelState::Terminated => LifecycleState::Terminated,
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Delivery outcome counters, updated by the handle and the worker.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    submitted: AtomicU64,
    rejected: AtomicU64,
    delivered: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
    connects: AtomicU64,
}

impl DeliveryStats {
    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self, count: u64) {
        self.dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_connect(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`DeliveryStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Events accepted by `submit`.
    pub submitted: u64,
    /// Events refused by `submit` (channel not active).
    pub rejected: u64,
    /// Events acknowledged by the controller.
    pub delivered: u64,
    /// Failed attempts that were rescheduled.
    pub retried: u64,
    /// Events given up on (retry budget or shutdown grace exhausted).
    pub dropped: u64,
    /// Successful connection handshakes.
    pub connects: u64,
}

impl StatsSnapshot {
    /// Accepted events not yet delivered or dropped.
    pub fn in_flight(&self) -> u64 {
        self.submitted
            .saturating_sub(self.delivered)
            .saturating_sub(self.dropped)
    }
}

/// Outcome of a channel shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Events delivered during the grace period.
    pub flushed: u64,
    /// Events still pending when the grace period ended.
    pub dropped: u64,
}

// ============================================================================
// Shared State
// ============================================================================

/// State shared between the handle(s) and the worker.
#[derive(Debug)]
pub(crate) struct ChannelShared {
    pub(crate) state: watch::Sender<ChannelState>,
    pub(crate) connected: AtomicBool,
    pub(crate) next_seq: AtomicU64,
    pub(crate) stats: DeliveryStats,
}

impl ChannelShared {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(ChannelState::Active);
        Self {
            state,
            connected: AtomicBool::new(false),
            next_seq: AtomicU64::new(0),
            stats: DeliveryStats::default(),
        }
    }

    pub(crate) fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub(crate) fn set_state(&self, state: ChannelState) {
        self.state.send_replace(state);
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }
}

// ============================================================================
// Spawning
// ============================================================================

/// Spawns the delivery worker on the current tokio runtime.
///
/// # Panics
///
/// Like `tokio::spawn`, this must be called from within a runtime. Use
/// [`spawn_channel_on`] from a thread that is not driven by tokio.
pub fn spawn_channel(config: ChannelConfig, transport: Arc<dyn Transport>) -> DeliveryChannel {
    spawn_channel_on(&tokio::runtime::Handle::current(), config, transport)
}

/// Spawns the delivery worker on the given runtime.
///
/// Safe to call from the host's main thread; the worker starts connecting
/// immediately in the background.
pub fn spawn_channel_on(
    runtime: &tokio::runtime::Handle,
    config: ChannelConfig,
    transport: Arc<dyn Transport>,
) -> DeliveryChannel {
    let (command_tx, command_rx) = mpsc::unbounded_channel::<ChannelCommand>();
    let shared = Arc::new(ChannelShared::new());

    let worker = ChannelWorker::new(transport, config, Arc::clone(&shared));
    runtime.spawn(worker.run(command_rx));

    DeliveryChannel::new(command_tx, shared)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_config_default() {
        let config = ChannelConfig::default();

        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.health_check_interval, Duration::from_secs(15));
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn test_channel_state_maps_to_lifecycle() {
        assert_eq!(
            LifecycleState::from(ChannelState::Active),
            LifecycleState::Active
        );
        assert_eq!(
            LifecycleState::from(ChannelState::ShuttingDown),
            LifecycleState::ShuttingDown
        );
        assert_eq!(
            LifecycleState::from(ChannelState::Terminated),
            LifecycleState::Terminated
        );
    }

    #[test]
    fn test_stats_snapshot() {
        let stats = DeliveryStats::default();
        stats.record_submitted();
        stats.record_submitted();
        stats.record_submitted();
        stats.record_delivered();
        stats.record_dropped(1);
        stats.record_retried();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.submitted, 3);
        assert_eq!(snapshot.delivered, 1);
        assert_eq!(snapshot.dropped, 1);
        assert_eq!(snapshot.retried, 1);
        assert_eq!(snapshot.in_flight(), 1);
    }

    #[test]
    fn test_shared_state_transitions() {
        let shared = ChannelShared::new();
        assert_eq!(shared.state(), ChannelState::Active);

        shared.set_state(ChannelState::ShuttingDown);
        assert_eq!(shared.state(), ChannelState::ShuttingDown);
    }
}
