//! Plugin lifecycle state machine.
//!
//! ```text
//! Uninitialized ──bootstrap──▶ Bootstrapped ──activate──▶ Active
//!                                                           │
//!                                       deactivate          ▼
//!                         Terminated ◀──────────────── ShuttingDown
//! ```
//!
//! States only move forward. The cell is lock-free so the host's main
//! thread can check it on every signal without contention.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::{BridgeError, Result};

/// Lifecycle state of the bridge within the host process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LifecycleState {
    Uninitialized = 0,
    Bootstrapped = 1,
    Active = 2,
    ShuttingDown = 3,
    Terminated = 4,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Uninitialized,
            1 => Self::Bootstrapped,
            2 => Self::Active,
            3 => Self::ShuttingDown,
            _ => Self::Terminated,
        }
    }

    /// Command descriptors may only be forwarded to the host here.
    pub fn accepts_commands(self) -> bool {
        self == Self::Bootstrapped
    }

    /// Presence events may only be submitted here.
    pub fn accepts_events(self) -> bool {
        self == Self::Active
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Bootstrapped => "bootstrapped",
            Self::Active => "active",
            Self::ShuttingDown => "shutting down",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Shared, atomically updated lifecycle state.
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Uninitialized as u8),
        }
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves from `from` to `to`, failing if the current state is not `from`.
    ///
    /// `operation` names the attempted action for the error message.
    pub fn transition(
        &self,
        from: LifecycleState,
        to: LifecycleState,
        operation: &'static str,
    ) -> Result<()> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| BridgeError::InvalidLifecycleState {
                operation,
                state: LifecycleState::from_u8(actual),
            })
    }

    /// Fails with `InvalidLifecycleState` unless the state satisfies `allowed`.
    pub fn require(
        &self,
        allowed: impl Fn(LifecycleState) -> bool,
        operation: &'static str,
    ) -> Result<LifecycleState> {
        let state = self.state();
        if allowed(state) {
            Ok(state)
        } else {
            Err(BridgeError::InvalidLifecycleState { operation, state })
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
