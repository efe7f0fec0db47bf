//! pbridge Plugin - Session presence bridge for game servers
//!
//! This crate is the game-server side of pbridge. It observes player
//! join/leave signals from the host and reports them to the remote control
//! plane without ever blocking the host's main thread:
//! - `host` - Boundary traits for host events and command registration
//! - `notifier` - Turns raw host signals into session events
//! - `channel` - Non-blocking, retrying delivery to the control plane
//! - `registrar` / `bridge` - Two-phase registration and the bridge instance
//! - `config` - TOML + environment configuration
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         host main thread                         │
//! │                                                                  │
//! │  join/leave ──▶ PresenceNotifier ──▶ Bridge (EventSink) ──┐      │
//! │                 (earliest/latest)    gated on Active      │      │
//! └───────────────────────────────────────────────────────────┼──────┘
//!                                                             │ submit (never blocks)
//! ┌───────────────────────────────────────────────────────────▼──────┐
//! │                    pbridge-delivery runtime                      │
//! │                                                                  │
//! │   ChannelWorker: per-player lanes, retry/backoff, reconnect ─────┼──▶ control plane
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Nothing raised here propagates into the host's event dispatch

pub mod bridge;
pub mod channel;
pub mod config;
pub mod error;
pub mod host;
pub mod lifecycle;
pub mod notifier;
pub mod registrar;

pub use bridge::Bridge;
pub use channel::{
    spawn_channel, spawn_channel_on, ChannelConfig, ChannelState, DeliveryChannel, RetryPolicy,
    ShutdownReport, StatsSnapshot,
};
pub use config::BridgeConfig;
pub use error::{BridgeError, Result, TransportError};
pub use host::{
    CommandDescriptor, CommandRegistry, HostEvents, LocalHost, ObserverPriority, PlayerArrived,
    PlayerDeparted,
};
pub use lifecycle::{Lifecycle, LifecycleState};
pub use notifier::{EventSink, PresenceNotifier};
pub use registrar::Registrar;
