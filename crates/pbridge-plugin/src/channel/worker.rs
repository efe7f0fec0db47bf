//! Delivery worker - owns the connection and processes queued events.
//!
//! The worker is the single owner of the transport connection. It receives
//! commands via an unbounded mpsc channel and keeps undelivered events in
//! per-player lanes:
//!
//! - Only the head of a lane is attempted; the rest wait behind it.
//! - Due heads of different lanes are attempted in submission order.
//! - A failed head is rescheduled with exponential backoff, or dropped once
//!   its retry budget is spent.
//!
//! Between deliveries it keeps the connection healthy: reconnecting with
//! backoff after a loss and pinging after a period of silence.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Send failures on response channels are ignored, not unwrapped

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, timeout, timeout_at, Instant};
use tracing::{debug, error, info, warn};

use pbridge_core::{PlayerId, SessionEvent};

use super::transport::{Connection, Transport};
use super::{ChannelConfig, ChannelShared, ChannelState, ShutdownReport};
use crate::error::{BridgeError, TransportError};

/// Wake-up horizon when there is nothing scheduled.
const IDLE_WAKEUP: Duration = Duration::from_secs(3600);

// ============================================================================
// Commands
// ============================================================================

/// An event accepted by the handle, stamped for delivery.
#[derive(Debug, Clone)]
pub(crate) struct Envelope {
    /// Submission sequence number (1-based, channel-wide)
    pub seq: u64,
    pub event: SessionEvent,
    /// When the host signal was observed
    pub observed_at: DateTime<Utc>,
}

/// Commands sent from the handle to the worker.
#[derive(Debug)]
pub(crate) enum ChannelCommand {
    /// Queue an event for delivery.
    Deliver(Envelope),

    /// Flush within the grace period, then stop.
    Shutdown {
        respond_to: oneshot::Sender<ShutdownReport>,
    },
}

/// An envelope waiting in a lane.
#[derive(Debug)]
struct Pending {
    envelope: Envelope,
    /// Failed attempts so far
    attempts: u32,
    /// Earliest time of the next attempt
    not_before: Instant,
}

/// Work that is due now.
#[derive(Debug)]
enum Task {
    /// Attempt the head of this player's lane
    Deliver(PlayerId),
    /// Reconnect or health-check while idle
    Maintain,
}

/// Why the worker loop ended.
#[derive(Debug)]
enum Stop {
    Requested(oneshot::Sender<ShutdownReport>),
    HandlesDropped,
}

// ============================================================================
// Channel Worker
// ============================================================================

/// The delivery worker. Runs in its own task until shutdown.
pub(crate) struct ChannelWorker {
    transport: Arc<dyn Transport>,
    config: ChannelConfig,
    shared: Arc<ChannelShared>,

    /// Current connection; `None` while disconnected
    connection: Option<Box<dyn Connection>>,

    /// Undelivered events, one FIFO lane per player
    lanes: HashMap<PlayerId, VecDeque<Pending>>,

    /// Consecutive failed connection attempts
    connect_failures: u32,

    /// When to try reconnecting while idle
    next_reconnect: Option<Instant>,

    /// Last successful exchange with the controller
    last_activity: Instant,

    ping_seq: u64,
}

impl ChannelWorker {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        config: ChannelConfig,
        shared: Arc<ChannelShared>,
    ) -> Self {
        Self {
            transport,
            config,
            shared,
            connection: None,
            lanes: HashMap::new(),
            connect_failures: 0,
            next_reconnect: Some(Instant::now()),
            last_activity: Instant::now(),
            ping_seq: 0,
        }
    }

    /// Runs the worker loop until shutdown or until every handle is dropped.
    ///
    /// One task (a delivery attempt or a maintenance step) runs at a time
    /// and races the command receiver: submissions arriving meanwhile are
    /// buffered, and a shutdown request starts the grace period at once
    /// instead of waiting for the queue to drain.
    pub(crate) async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<ChannelCommand>) {
        info!(endpoint = %self.transport.endpoint(), "Delivery worker starting");

        let mut inbox: Vec<Envelope> = Vec::new();

        let (stop, deadline) = loop {
            for envelope in inbox.drain(..) {
                self.enqueue(envelope);
            }

            let Some(task) = self.next_task(Instant::now()) else {
                let wake_at = self.next_wakeup();
                let command = tokio::select! {
                    command = receiver.recv() => Some(command),
                    _ = sleep_until(wake_at) => None,
                };
                match command {
                    None => {}
                    Some(Some(ChannelCommand::Deliver(envelope))) => self.enqueue(envelope),
                    Some(Some(ChannelCommand::Shutdown { respond_to })) => {
                        break (Stop::Requested(respond_to), self.grace_deadline());
                    }
                    Some(None) => break (Stop::HandlesDropped, self.grace_deadline()),
                }
                continue;
            };

            let grace = self.config.shutdown_grace;
            let interrupted = {
                let work = self.run_task(task);
                tokio::pin!(work);

                let stop = loop {
                    tokio::select! {
                        biased;

                        command = receiver.recv() => match command {
                            Some(ChannelCommand::Deliver(envelope)) => inbox.push(envelope),
                            Some(ChannelCommand::Shutdown { respond_to }) => {
                                break Some(Stop::Requested(respond_to));
                            }
                            None => break Some(Stop::HandlesDropped),
                        },

                        () = &mut work => break None,
                    }
                };

                match stop {
                    None => None,
                    Some(stop) => {
                        // The task in flight may still finish inside the grace period
                        let deadline = Instant::now() + grace;
                        let finished = timeout_at(deadline, &mut work).await.is_ok();
                        Some((stop, deadline, finished))
                    }
                }
            };

            if let Some((stop, deadline, finished)) = interrupted {
                if !finished {
                    // A request may have been cut off mid-exchange
                    self.drop_connection(&TransportError::Timeout(grace));
                }
                break (stop, deadline);
            }
        };

        for envelope in inbox.drain(..) {
            self.enqueue(envelope);
        }

        match stop {
            Stop::Requested(respond_to) => {
                let report = self.shutdown(&mut receiver, deadline).await;
                let _ = respond_to.send(report);
            }
            Stop::HandlesDropped => {
                debug!("All channel handles dropped");
                self.shared.set_state(ChannelState::ShuttingDown);
                self.shutdown(&mut receiver, deadline).await;
            }
        }

        info!("Delivery worker stopped");
    }

    // ========================================================================
    // Queueing
    // ========================================================================

    fn enqueue(&mut self, envelope: Envelope) {
        let lane = self
            .lanes
            .entry(envelope.event.player_id().clone())
            .or_default();

        if !lane.is_empty() {
            debug!(
                seq = envelope.seq,
                waiting_behind = lane.len(),
                "Event queued behind earlier event for the same player"
            );
        }

        lane.push_back(Pending {
            envelope,
            attempts: 0,
            not_before: Instant::now(),
        });
    }

    fn pending_count(&self) -> usize {
        self.lanes.values().map(VecDeque::len).sum()
    }

    /// Player whose lane head is due, preferring the oldest submission.
    fn next_due_lane(&self, now: Instant) -> Option<PlayerId> {
        self.lanes
            .iter()
            .filter_map(|(player, lane)| lane.front().map(|head| (player, head)))
            .filter(|(_, head)| head.not_before <= now)
            .min_by_key(|(_, head)| head.envelope.seq)
            .map(|(player, _)| player.clone())
    }

    /// Earliest time any lane head becomes due.
    fn next_retry_at(&self) -> Option<Instant> {
        self.lanes
            .values()
            .filter_map(|lane| lane.front().map(|head| head.not_before))
            .min()
    }

    /// The task due at `now`, deliveries before maintenance.
    fn next_task(&self, now: Instant) -> Option<Task> {
        if let Some(player) = self.next_due_lane(now) {
            return Some(Task::Deliver(player));
        }

        let maintenance_due = match &self.connection {
            Some(_) => now >= self.last_activity + self.config.health_check_interval,
            // With events pending, delivery attempts do the reconnecting
            None => self.lanes.is_empty() && self.next_reconnect.is_some_and(|at| at <= now),
        };
        maintenance_due.then_some(Task::Maintain)
    }

    fn grace_deadline(&self) -> Instant {
        Instant::now() + self.config.shutdown_grace
    }

    fn next_wakeup(&self) -> Instant {
        let maintenance = match &self.connection {
            Some(_) => Some(self.last_activity + self.config.health_check_interval),
            // With events pending, delivery attempts do the reconnecting
            None if self.lanes.is_empty() => self.next_reconnect,
            None => None,
        };

        [self.next_retry_at(), maintenance]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or_else(|| Instant::now() + IDLE_WAKEUP)
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    async fn run_task(&mut self, task: Task) {
        match task {
            Task::Deliver(player) => self.attempt_head(&player).await,
            Task::Maintain => self.maintain_connection().await,
        }
    }

    /// Attempts every due lane head until none is due. Only bounded by the
    /// caller's deadline, so it is reserved for the shutdown flush.
    async fn deliver_due(&mut self) {
        while let Some(player) = self.next_due_lane(Instant::now()) {
            self.attempt_head(&player).await;
        }
    }

    async fn attempt_head(&mut self, player: &PlayerId) {
        let Some(envelope) = self
            .lanes
            .get(player)
            .and_then(|lane| lane.front())
            .map(|head| head.envelope.clone())
        else {
            return;
        };

        let result = self.send_report(&envelope).await;

        let Some(lane) = self.lanes.get_mut(player) else {
            return;
        };

        match result {
            Ok(()) => {
                lane.pop_front();
                self.shared.stats.record_delivered();
                debug!(
                    seq = envelope.seq,
                    event = %envelope.event,
                    "Presence event delivered"
                );
            }
            Err(e) => {
                let Some(head) = lane.front_mut() else {
                    return;
                };
                head.attempts = head.attempts.saturating_add(1);
                let policy = &self.config.retry;

                if policy.is_exhausted(head.attempts) {
                    let lost = BridgeError::DeliveryFailed {
                        seq: envelope.seq,
                        player_id: player.clone(),
                        attempts: head.attempts,
                    };
                    error!(
                        error = %lost,
                        last_error = %e,
                        event = %envelope.event,
                        "Dropping presence event"
                    );
                    lane.pop_front();
                    self.shared.stats.record_dropped(1);
                } else {
                    let delay = policy.delay_after(head.attempts);
                    head.not_before = Instant::now() + delay;
                    self.shared.stats.record_retried();
                    warn!(
                        seq = envelope.seq,
                        attempt = head.attempts,
                        retry_in = ?delay,
                        error = %e,
                        "Presence event delivery failed, will retry"
                    );
                }
            }
        }

        if lane.is_empty() {
            self.lanes.remove(player);
        }
    }

    /// One delivery attempt, connecting first if needed.
    async fn send_report(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        if self.connection.is_none() {
            self.connect().await?;
        }

        let request_timeout = self.config.request_timeout;
        let Some(connection) = self.connection.as_mut() else {
            return Err(TransportError::Closed);
        };

        let result = match timeout(
            request_timeout,
            connection.report(envelope.seq, &envelope.event, envelope.observed_at),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(request_timeout)),
        };

        match &result {
            Ok(()) => self.last_activity = Instant::now(),
            // The controller answered, so the link itself is fine
            Err(TransportError::Remote { .. }) => self.last_activity = Instant::now(),
            Err(e) => self.drop_connection(e),
        }
        result
    }

    // ========================================================================
    // Connection Management
    // ========================================================================

    async fn connect(&mut self) -> Result<(), TransportError> {
        let connect_timeout = self.config.connect_timeout;

        debug!(
            attempt = self.connect_failures.saturating_add(1),
            endpoint = %self.transport.endpoint(),
            "Connecting to controller"
        );

        let result = match timeout(connect_timeout, self.transport.connect()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(connect_timeout)),
        };

        match result {
            Ok(connection) => {
                self.connection = Some(connection);
                self.connect_failures = 0;
                self.next_reconnect = None;
                self.last_activity = Instant::now();
                self.shared.set_connected(true);
                self.shared.stats.record_connect();
                Ok(())
            }
            Err(e) => {
                self.connect_failures = self.connect_failures.saturating_add(1);
                let delay = self.config.retry.delay_after(self.connect_failures);
                self.next_reconnect = Some(Instant::now() + delay);

                // Only the first failure in a row is worth a warning
                if self.connect_failures == 1 {
                    warn!(error = %e, "Controller unreachable, will keep retrying");
                } else {
                    debug!(
                        attempt = self.connect_failures,
                        retry_in = ?delay,
                        error = %e,
                        "Connection attempt failed"
                    );
                }
                Err(e)
            }
        }
    }

    fn drop_connection(&mut self, reason: &TransportError) {
        if self.connection.take().is_some() {
            warn!(error = %reason, "Dropping controller connection");
        }
        self.shared.set_connected(false);
        self.next_reconnect = Some(Instant::now());
    }

    /// Reconnects when idle and disconnected; pings when idle and connected.
    async fn maintain_connection(&mut self) {
        let now = Instant::now();

        if self.connection.is_none() {
            let due = self.next_reconnect.is_some_and(|at| at <= now);
            if due && self.lanes.is_empty() {
                // Failure is logged and rescheduled inside connect()
                let _ = self.connect().await;
            }
            return;
        }

        if now >= self.last_activity + self.config.health_check_interval {
            self.health_check().await;
        }
    }

    async fn health_check(&mut self) {
        let request_timeout = self.config.request_timeout;
        self.ping_seq = self.ping_seq.wrapping_add(1);
        let seq = self.ping_seq;

        let Some(connection) = self.connection.as_mut() else {
            return;
        };

        let result = match timeout(request_timeout, connection.ping(seq)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(request_timeout)),
        };

        match result {
            Ok(()) => {
                debug!(seq, "Controller health check ok");
                self.last_activity = Instant::now();
            }
            Err(e) => self.drop_connection(&e),
        }
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Drains queued commands, flushes within the grace period, drops the
    /// rest and closes the connection.
    async fn shutdown(
        &mut self,
        receiver: &mut mpsc::UnboundedReceiver<ChannelCommand>,
        deadline: Instant,
    ) -> ShutdownReport {
        // No more submissions can arrive after this; take the ones in flight
        receiver.close();
        while let Ok(command) = receiver.try_recv() {
            match command {
                ChannelCommand::Deliver(envelope) => self.enqueue(envelope),
                ChannelCommand::Shutdown { respond_to } => {
                    let _ = respond_to.send(ShutdownReport::default());
                }
            }
        }

        let pending = self.pending_count();
        let remaining = deadline.saturating_duration_since(Instant::now());
        info!(pending, remaining = ?remaining, "Flushing pending presence events");

        let delivered_before = self.shared.stats.snapshot().delivered;
        if timeout_at(deadline, self.flush()).await.is_err() {
            debug!("Shutdown grace period elapsed");
        }
        let flushed = self
            .shared
            .stats
            .snapshot()
            .delivered
            .saturating_sub(delivered_before);

        let dropped = self.pending_count() as u64;
        for pending in self.lanes.values().flatten() {
            warn!(
                seq = pending.envelope.seq,
                event = %pending.envelope.event,
                "Dropping presence event at shutdown"
            );
        }
        self.lanes.clear();
        self.shared.stats.record_dropped(dropped);

        if let Some(mut connection) = self.connection.take() {
            let _ = timeout(self.config.request_timeout, connection.close()).await;
        }
        self.shared.set_connected(false);
        self.shared.set_state(ChannelState::Terminated);

        info!(flushed, dropped, "Delivery channel terminated");
        ShutdownReport { flushed, dropped }
    }

    /// Delivers until every lane is empty, honoring retry backoff.
    async fn flush(&mut self) {
        loop {
            self.deliver_due().await;
            match self.next_retry_at() {
                Some(at) => sleep_until(at).await,
                None => return,
            }
        }
    }
}
