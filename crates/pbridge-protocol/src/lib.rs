//! pbridge Protocol - Wire protocol for control plane communication
//!
//! Newline-delimited JSON exchanged between the game server bridge and
//! the fleet control plane. Every bridge message carries the protocol
//! version; the controller answers each request with exactly one reply.

pub mod message;
pub mod version;

pub use message::{BridgeMessage, ControllerMessage, MessageType};
pub use version::{ProtocolVersion, VersionError};
