//! Host-facing handle of the delivery channel.
//!
//! The `DeliveryChannel` is a cheap-to-clone handle. Submitting never
//! awaits: it stamps the event, pushes it onto an unbounded queue and
//! returns, so it is safe to call from the host's main thread no matter
//! how the control plane is doing.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `BridgeError::ChannelClosed`

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use pbridge_core::SessionEvent;

use super::worker::{ChannelCommand, Envelope};
use super::{ChannelShared, ChannelState, ShutdownReport, StatsSnapshot};
use crate::error::{BridgeError, Result};
use crate::notifier::EventSink;

/// Handle for submitting presence events to the delivery worker.
///
/// # Usage
///
/// ```ignore
/// let channel = spawn_channel(ChannelConfig::default(), transport);
///
/// // From any thread, never blocks
/// channel.submit(SessionEvent::Connected(record));
///
/// // On plugin deactivation
/// let report = channel.shutdown().await;
/// ```
#[derive(Clone)]
pub struct DeliveryChannel {
    /// Command sender to the worker
    sender: mpsc::UnboundedSender<ChannelCommand>,

    /// State, stats and sequence counter shared with the worker
    shared: Arc<ChannelShared>,
}

impl DeliveryChannel {
    pub(crate) fn new(
        sender: mpsc::UnboundedSender<ChannelCommand>,
        shared: Arc<ChannelShared>,
    ) -> Self {
        Self { sender, shared }
    }

    /// Enqueues an event for delivery and returns its sequence number.
    ///
    /// # Errors
    ///
    /// - `BridgeError::InvalidLifecycleState` once shutdown has begun
    /// - `BridgeError::ChannelClosed` if the worker has stopped
    pub fn try_submit(&self, event: SessionEvent) -> Result<u64> {
        let state = self.shared.state();
        if state != ChannelState::Active {
            self.shared.stats.record_rejected();
            return Err(BridgeError::InvalidLifecycleState {
                operation: "submit presence events",
                state: state.into(),
            });
        }

        let seq = self.shared.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let envelope = Envelope {
            seq,
            event,
            observed_at: Utc::now(),
        };

        if self.sender.send(ChannelCommand::Deliver(envelope)).is_err() {
            self.shared.stats.record_rejected();
            return Err(BridgeError::ChannelClosed);
        }

        self.shared.stats.record_submitted();
        Ok(seq)
    }

    /// Current state of the channel.
    pub fn state(&self) -> ChannelState {
        self.shared.state()
    }

    /// True while the worker holds a handshaken connection.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Snapshot of the delivery counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Stops accepting events, flushes pending ones within the configured
    /// grace period, then terminates the worker.
    ///
    /// Calling this more than once is harmless: later calls wait for
    /// termination and return an empty report.
    pub async fn shutdown(&self) -> ShutdownReport {
        let initiated = self.shared.state.send_if_modified(|state| {
            if *state == ChannelState::Active {
                *state = ChannelState::ShuttingDown;
                true
            } else {
                false
            }
        });

        if !initiated {
            let mut state_rx = self.shared.state.subscribe();
            let _ = state_rx
                .wait_for(|state| *state == ChannelState::Terminated)
                .await;
            return ShutdownReport::default();
        }

        info!("Delivery channel shutting down");

        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(ChannelCommand::Shutdown { respond_to: tx })
            .is_ok()
        {
            if let Ok(report) = rx.await {
                return report;
            }
        }

        // Worker already gone (runtime dropped); nothing left to flush
        warn!("Delivery worker was not running at shutdown");
        self.shared.set_state(ChannelState::Terminated);
        ShutdownReport::default()
    }
}

impl EventSink for DeliveryChannel {
    fn submit(&self, event: SessionEvent) {
        let description = event.to_string();
        match self.try_submit(event) {
            Ok(seq) => debug!(seq, event = %description, "Presence event queued"),
            Err(e) => warn!(error = %e, event = %description, "Presence event rejected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbridge_core::SessionRecord;

    fn create_test_channel() -> (DeliveryChannel, mpsc::UnboundedReceiver<ChannelCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = DeliveryChannel::new(tx, Arc::new(ChannelShared::new()));
        (channel, rx)
    }

    fn joined(name: &str, id: &str) -> SessionEvent {
        SessionEvent::Connected(SessionRecord::from_raw(name, id).unwrap())
    }

    #[test]
    fn test_handle_is_clone() {
        let (channel, _rx) = create_test_channel();
        let _cloned = channel.clone();
    }

    #[test]
    fn test_try_submit_sends_command_with_increasing_seq() {
        let (channel, mut rx) = create_test_channel();

        assert_eq!(channel.try_submit(joined("Alice", "a-1")).unwrap(), 1);
        assert_eq!(channel.try_submit(joined("Bob", "b-1")).unwrap(), 2);

        match rx.try_recv().unwrap() {
            ChannelCommand::Deliver(envelope) => {
                assert_eq!(envelope.seq, 1);
                assert_eq!(envelope.event.player_id().as_str(), "a-1");
            }
            ChannelCommand::Shutdown { .. } => panic!("Expected Deliver command"),
        }
        assert_eq!(channel.stats().submitted, 2);
    }

    #[test]
    fn test_try_submit_channel_closed_error() {
        let (channel, rx) = create_test_channel();
        drop(rx);

        let result = channel.try_submit(joined("Alice", "a-1"));

        assert!(matches!(result, Err(BridgeError::ChannelClosed)));
        assert_eq!(channel.stats().rejected, 1);
        assert_eq!(channel.stats().submitted, 0);
    }

    #[test]
    fn test_try_submit_rejected_when_shutting_down() {
        let (channel, mut rx) = create_test_channel();
        channel.shared.set_state(ChannelState::ShuttingDown);

        let result = channel.try_submit(joined("Alice", "a-1"));

        assert!(matches!(
            result,
            Err(BridgeError::InvalidLifecycleState { .. })
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_submit_swallows_errors() {
        let (channel, rx) = create_test_channel();
        drop(rx);

        // Must not panic or propagate
        channel.submit(joined("Alice", "a-1"));
        assert_eq!(channel.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_shutdown_sends_command_and_returns_report() {
        let (channel, mut rx) = create_test_channel();

        let worker = tokio::spawn(async move {
            if let Some(ChannelCommand::Shutdown { respond_to }) = rx.recv().await {
                let _ = respond_to.send(ShutdownReport {
                    flushed: 2,
                    dropped: 1,
                });
                return true;
            }
            false
        });

        let report = channel.shutdown().await;

        assert_eq!(report.flushed, 2);
        assert_eq!(report.dropped, 1);
        assert!(worker.await.unwrap());
    }

    #[tokio::test]
    async fn test_shutdown_without_worker_terminates() {
        let (channel, rx) = create_test_channel();
        drop(rx);

        let report = channel.shutdown().await;

        assert_eq!(report, ShutdownReport::default());
        assert_eq!(channel.state(), ChannelState::Terminated);
    }

    #[tokio::test]
    async fn test_second_shutdown_waits_for_termination() {
        let (channel, _rx) = create_test_channel();
        channel.shared.set_state(ChannelState::ShuttingDown);

        let waiter = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.shutdown().await })
        };

        tokio::task::yield_now().await;
        channel.shared.set_state(ChannelState::Terminated);

        assert_eq!(waiter.await.unwrap(), ShutdownReport::default());
    }
}
