//! Error types for the presence bridge.
//!
//! Two layers:
//! - [`TransportError`]: a single delivery or connection attempt failed.
//!   These are transient and retried inside the delivery channel.
//! - [`BridgeError`]: everything a bridge operation can report, including
//!   lifecycle violations and permanently lost events.
//!
//! None of these ever reach the host's event-dispatch context: host-facing
//! entry points log and swallow them.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::io;
use thiserror::Error;

use pbridge_core::{DomainError, PlayerId};
use pbridge_protocol::VersionError;

use crate::lifecycle::LifecycleState;

// ============================================================================
// Transport Error Type
// ============================================================================

/// Failure of one attempt to talk to the control plane.
///
/// Every variant is treated as transient and retried according to the
/// retry policy. All but `Remote` also cost the current connection.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Could not establish a connection.
    #[error("Failed to connect to controller at {address}: {reason}")]
    Connect { address: String, reason: String },

    /// Connection or request did not complete in time.
    #[error("Controller did not respond within {0:?}")]
    Timeout(std::time::Duration),

    /// Controller refused the handshake.
    #[error("Controller rejected handshake: {0}")]
    Rejected(String),

    /// Controller speaks an incompatible protocol version.
    #[error("Protocol version mismatch: {0}")]
    Version(#[from] VersionError),

    /// Controller replied with something unexpected.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Controller answered a request with an error.
    #[error("Controller error: {message}")]
    Remote {
        message: String,
        code: Option<String>,
    },

    /// Controller closed the connection.
    #[error("Connection closed by controller")]
    Closed,

    /// I/O error passthrough.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error passthrough.
    #[error("Failed to encode or decode message: {0}")]
    Codec(#[from] serde_json::Error),
}

// ============================================================================
// Bridge Error Type
// ============================================================================

/// Errors reported by bridge operations.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// A transport attempt failed (transient, retried internally).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Retry budget exhausted; the event was dropped.
    #[error("Event #{seq} for player {player_id} lost after {attempts} attempts")]
    DeliveryFailed {
        seq: u64,
        player_id: PlayerId,
        attempts: u32,
    },

    /// Operation attempted in a state that does not permit it.
    #[error("Cannot {operation} while {state}")]
    InvalidLifecycleState {
        operation: &'static str,
        state: LifecycleState,
    },

    /// A command descriptor was already forwarded to the host.
    ///
    /// The registrar treats this as a no-op; it is only surfaced in logs.
    #[error("Command '{command}' is already registered")]
    DuplicateRegistration { command: String },

    /// The delivery worker is gone.
    #[error("Delivery channel is closed")]
    ChannelClosed,

    /// Host supplied invalid player data.
    #[error("Invalid signal: {0}")]
    InvalidSignal(#[from] DomainError),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Configuration file could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// I/O error passthrough.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl BridgeError {
    /// Returns true if retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Convenience Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
