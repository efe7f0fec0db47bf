//! Presence notifier: turns host signals into session events.
//!
//! Observation is a pure function from signal to [`SessionEvent`]; the only
//! side effect is handing the event to an [`EventSink`], which must return
//! immediately. Every valid signal yields exactly one event, in the order
//! the host delivers them. Nothing is deduplicated or coalesced.

use std::sync::Arc;

use tracing::{trace, warn};

use pbridge_core::{DomainResult, SessionEvent, SessionRecord};

use crate::error::BridgeError;
use crate::host::{HostEvents, ObserverPriority, PlayerArrived, PlayerDeparted};

/// Arrival is observed before any other plugin logic.
pub const CONNECT_PRIORITY: ObserverPriority = ObserverPriority::Earliest;

/// Departure is observed after all other plugin logic.
pub const DISCONNECT_PRIORITY: ObserverPriority = ObserverPriority::Latest;

/// Destination of presence events.
///
/// `submit` is called on the host's main thread and must never block or
/// fail visibly; implementations log what they cannot accept.
pub trait EventSink: Send + Sync {
    fn submit(&self, event: SessionEvent);
}

/// Builds the `Connected` event for a join signal.
pub fn arrival_event(signal: &PlayerArrived) -> DomainResult<SessionEvent> {
    SessionRecord::from_raw(&signal.name, &signal.id).map(SessionEvent::Connected)
}

/// Builds the `Disconnected` event for a leave signal.
pub fn departure_event(signal: &PlayerDeparted) -> DomainResult<SessionEvent> {
    SessionRecord::from_raw(&signal.name, &signal.id).map(SessionEvent::Disconnected)
}

/// Observes host session signals and forwards them to a sink.
#[derive(Clone)]
pub struct PresenceNotifier {
    sink: Arc<dyn EventSink>,
}

impl PresenceNotifier {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    pub fn on_connect(&self, signal: &PlayerArrived) {
        match arrival_event(signal) {
            Ok(event) => {
                trace!(event = %event, "Observed arrival");
                self.sink.submit(event);
            }
            Err(e) => warn!(
                error = %BridgeError::InvalidSignal(e),
                player = %signal.name,
                "Ignoring join signal"
            ),
        }
    }

    pub fn on_disconnect(&self, signal: &PlayerDeparted) {
        match departure_event(signal) {
            Ok(event) => {
                trace!(event = %event, "Observed departure");
                self.sink.submit(event);
            }
            Err(e) => warn!(
                error = %BridgeError::InvalidSignal(e),
                player = %signal.name,
                "Ignoring leave signal"
            ),
        }
    }

    /// Registers both observers with the host at their fixed priorities.
    pub fn register(&self, host: &mut dyn HostEvents) {
        let arrivals = self.clone();
        host.observe_arrival(
            CONNECT_PRIORITY,
            Box::new(move |signal: &PlayerArrived| arrivals.on_connect(signal)),
        );

        let departures = self.clone();
        host.observe_departure(
            DISCONNECT_PRIORITY,
            Box::new(move |signal: &PlayerDeparted| departures.on_disconnect(signal)),
        );
    }
}
