//! The long-lived bridge instance handed to the host.
//!
//! A [`Bridge`] owns the delivery channel and the background runtime it runs
//! on. The host drives it from its main thread:
//!
//! ```ignore
//! let bridge = registrar.provide_instance();
//! bridge.activate()?;          // on plugin enable
//! bridge.attach(&mut host);    // observers at earliest/latest priority
//! // ... host dispatches join/leave signals ...
//! bridge.deactivate()?;        // on plugin disable
//! ```
//!
//! `activate` and `deactivate` must not be called from inside an async
//! context: the bridge brings its own runtime and blocks on it briefly
//! during shutdown.

use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use tokio::runtime::{Builder, Runtime};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use pbridge_core::SessionEvent;

use crate::channel::{spawn_channel_on, DeliveryChannel, ShutdownReport, StatsSnapshot, Transport};
use crate::config::BridgeConfig;
use crate::error::Result;
use crate::host::HostEvents;
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::notifier::{EventSink, PresenceNotifier};

/// Name of the delivery runtime's worker thread.
pub const DELIVERY_THREAD_NAME: &str = "pbridge-delivery";

/// Bound for stopping the runtime once the channel has terminated.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Process-wide bridge between the host and the control plane.
pub struct Bridge {
    config: BridgeConfig,
    transport: Arc<dyn Transport>,
    lifecycle: Arc<Lifecycle>,
    /// Background runtime, present while active
    runtime: Mutex<Option<Runtime>>,
    channel: OnceLock<DeliveryChannel>,
}

impl Bridge {
    pub(crate) fn new(
        config: BridgeConfig,
        transport: Arc<dyn Transport>,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        Self {
            config,
            transport,
            lifecycle,
            runtime: Mutex::new(None),
            channel: OnceLock::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Longest time `deactivate` keeps the host thread waiting.
    pub fn shutdown_limit(&self) -> Duration {
        let channel = self.config.channel_config();
        channel.shutdown_grace + channel.connect_timeout.max(channel.request_timeout)
    }

    /// Starts the delivery channel (`Bootstrapped -> Active`).
    ///
    /// # Errors
    ///
    /// - `BridgeError::InvalidLifecycleState` unless bootstrapped
    /// - `BridgeError::Io` if the delivery runtime cannot be built
    pub fn activate(&self) -> Result<()> {
        let mut runtime_slot = self.runtime.lock().unwrap_or_else(PoisonError::into_inner);
        self.lifecycle
            .require(|state| state == LifecycleState::Bootstrapped, "activate")?;

        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(DELIVERY_THREAD_NAME)
            .enable_all()
            .build()?;

        let channel = spawn_channel_on(
            runtime.handle(),
            self.config.channel_config(),
            Arc::clone(&self.transport),
        );
        if self.channel.set(channel).is_err() {
            // Only reachable if a previous activation half-failed
            debug!("Delivery channel already present");
        }
        *runtime_slot = Some(runtime);

        self.lifecycle.transition(
            LifecycleState::Bootstrapped,
            LifecycleState::Active,
            "activate",
        )?;

        info!(
            endpoint = %self.transport.endpoint(),
            server_name = %self.config.controller.server_name,
            retry_budget = ?self.config.retry_policy().total_budget(),
            "Presence bridge active"
        );
        Ok(())
    }

    /// Stops accepting events, flushes within the grace period and stops
    /// the background runtime (`Active -> ShuttingDown -> Terminated`).
    ///
    /// Blocks the calling thread for at most the grace period plus one
    /// connect or request timeout (see [`Bridge::shutdown_limit`]).
    pub fn deactivate(&self) -> Result<ShutdownReport> {
        self.lifecycle.transition(
            LifecycleState::Active,
            LifecycleState::ShuttingDown,
            "deactivate",
        )?;
        info!("Presence bridge shutting down");

        let runtime = self
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let report = match (runtime, self.channel.get()) {
            (Some(runtime), Some(channel)) => {
                let limit = self.shutdown_limit();
                let report = runtime.block_on(async {
                    match timeout(limit, channel.shutdown()).await {
                        Ok(report) => report,
                        Err(_) => {
                            let dropped = channel.stats().in_flight();
                            warn!(limit = ?limit, dropped, "Delivery channel did not stop in time");
                            ShutdownReport { flushed: 0, dropped }
                        }
                    }
                });
                runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
                report
            }
            _ => {
                warn!("Delivery runtime missing at shutdown");
                ShutdownReport::default()
            }
        };

        self.lifecycle.transition(
            LifecycleState::ShuttingDown,
            LifecycleState::Terminated,
            "terminate",
        )?;

        info!(
            flushed = report.flushed,
            dropped = report.dropped,
            "Presence bridge terminated"
        );
        Ok(report)
    }

    /// Notifier that submits to this bridge.
    pub fn notifier(self: &Arc<Self>) -> PresenceNotifier {
        PresenceNotifier::new(Arc::clone(self) as Arc<dyn EventSink>)
    }

    /// Registers the presence observers with the host.
    pub fn attach(self: &Arc<Self>, host: &mut dyn HostEvents) {
        self.notifier().register(host);
        debug!("Presence observers attached");
    }

    /// Delivery counters; all zero before activation.
    pub fn stats(&self) -> StatsSnapshot {
        self.channel
            .get()
            .map(DeliveryChannel::stats)
            .unwrap_or_default()
    }

    pub fn is_connected(&self) -> bool {
        self.channel
            .get()
            .is_some_and(DeliveryChannel::is_connected)
    }
}

impl EventSink for Bridge {
    fn submit(&self, event: SessionEvent) {
        if let Err(e) = self
            .lifecycle
            .require(LifecycleState::accepts_events, "submit presence events")
        {
            warn!(error = %e, event = %event, "Presence event rejected");
            return;
        }

        match self.channel.get() {
            Some(channel) => channel.submit(event),
            None => warn!(event = %event, "Presence event rejected: no delivery channel"),
        }
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("state", &self.state())
            .field("endpoint", &self.transport.endpoint())
            .finish_non_exhaustive()
    }
}
