//! pbridge Core - Shared types for session presence
//!
//! This crate provides the domain types shared between the wire protocol
//! (pbridge-protocol) and the game server plugin (pbridge-plugin).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod session;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use session::{PlayerId, PlayerName, SessionEvent, SessionEventKind, SessionRecord};
