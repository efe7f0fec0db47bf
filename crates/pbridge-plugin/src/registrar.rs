//! Two-phase plugin registration.
//!
//! 1. **Bootstrap phase**: [`Registrar::bootstrap`] followed by
//!    [`Registrar::register_commands`], before the host runtime is fully up.
//! 2. **Plugin phase**: [`Registrar::provide_instance`] hands the host the
//!    single [`Bridge`] it then activates.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use tracing::{debug, info, warn};

use crate::bridge::Bridge;
use crate::channel::Transport;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::host::{CommandDescriptor, CommandRegistry};
use crate::lifecycle::{Lifecycle, LifecycleState};

/// Entry point the host calls into during plugin loading.
pub struct Registrar {
    config: BridgeConfig,
    transport: Arc<dyn Transport>,
    lifecycle: Arc<Lifecycle>,
    /// Descriptors to expose, in declaration order
    commands: Vec<CommandDescriptor>,
    /// Names already handed to the host
    forwarded: HashSet<String>,
    instance: OnceLock<Arc<Bridge>>,
}

impl Registrar {
    /// Registrar using a TCP transport to the configured controller and the
    /// configured command descriptors.
    pub fn new(config: BridgeConfig) -> Self {
        let transport: Arc<dyn Transport> = Arc::new(config.transport());
        let commands = config.commands.clone();
        Self {
            config,
            transport,
            lifecycle: Arc::new(Lifecycle::new()),
            commands,
            forwarded: HashSet::new(),
            instance: OnceLock::new(),
        }
    }

    /// Replaces the transport. Has no effect once the instance exists.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Adds descriptors supplied by the caller after the configured ones.
    pub fn with_commands(mut self, commands: impl IntoIterator<Item = CommandDescriptor>) -> Self {
        self.commands.extend(commands);
        self
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Enters the bootstrap phase (`Uninitialized -> Bootstrapped`).
    pub fn bootstrap(&self) -> Result<()> {
        self.lifecycle.transition(
            LifecycleState::Uninitialized,
            LifecycleState::Bootstrapped,
            "bootstrap",
        )?;
        info!(commands = self.commands.len(), "Presence bridge bootstrapped");
        Ok(())
    }

    /// Forwards every descriptor not yet registered to the host, in one call.
    ///
    /// Re-invocation is a no-op for descriptors already forwarded, and the
    /// host is not called at all when nothing is new. Returns how many
    /// descriptors were forwarded.
    ///
    /// # Errors
    ///
    /// `BridgeError::InvalidLifecycleState` outside the bootstrap phase.
    pub fn register_commands(&mut self, registry: &mut dyn CommandRegistry) -> Result<usize> {
        if let Err(e) = self
            .lifecycle
            .require(LifecycleState::accepts_commands, "register commands")
        {
            warn!(error = %e, "Command registration refused");
            return Err(e);
        }

        let mut batch = Vec::new();
        for command in &self.commands {
            if self.forwarded.insert(command.name.clone()) {
                batch.push(command.clone());
            } else {
                let duplicate = BridgeError::DuplicateRegistration {
                    command: command.name.clone(),
                };
                debug!(reason = %duplicate, "Skipping command");
            }
        }

        if batch.is_empty() {
            debug!("No new commands to register");
            return Ok(0);
        }

        let count = batch.len();
        registry.register(batch);
        info!(count, "Registered commands with host");
        Ok(count)
    }

    /// The process-wide bridge; every call returns the same instance.
    pub fn provide_instance(&self) -> Arc<Bridge> {
        let bridge = self.instance.get_or_init(|| {
            debug!("Creating bridge instance");
            Arc::new(Bridge::new(
                self.config.clone(),
                Arc::clone(&self.transport),
                Arc::clone(&self.lifecycle),
            ))
        });
        Arc::clone(bridge)
    }
}
