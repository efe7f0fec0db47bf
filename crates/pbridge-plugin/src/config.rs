//! Bridge configuration.
//!
//! Resolution order, later wins:
//!
//! 1. Built-in defaults
//! 2. TOML file: `$PBRIDGE_CONFIG`, else `<config_dir>/pbridge/bridge.toml`
//! 3. Environment: `PBRIDGE_CONTROLLER_ADDRESS`, `PBRIDGE_SERVER_NAME`,
//!    `PBRIDGE_TOKEN`
//!
//! ```toml
//! [controller]
//! address = "10.0.0.5:7450"
//! server_name = "lobby-1"
//!
//! [retry]
//! max_attempts = 8
//!
//! [[commands]]
//! name = "lobby"
//! description = "Return to the lobby"
//! aliases = ["hub"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::channel::{ChannelConfig, RetryPolicy, TcpTransport};
use crate::error::{BridgeError, Result};
use crate::host::CommandDescriptor;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "PBRIDGE_CONFIG";
pub const CONTROLLER_ADDRESS_ENV: &str = "PBRIDGE_CONTROLLER_ADDRESS";
pub const SERVER_NAME_ENV: &str = "PBRIDGE_SERVER_NAME";
pub const TOKEN_ENV: &str = "PBRIDGE_TOKEN";

/// Complete bridge configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub controller: ControllerConfig,
    pub retry: RetryConfig,
    pub shutdown: ShutdownConfig,
    /// Commands forwarded to the host at bootstrap.
    pub commands: Vec<CommandDescriptor>,
}

/// Where and how to reach the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// `host:port` of the controller.
    pub address: String,
    /// Name this server announces in the handshake.
    pub server_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub health_check_interval_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:7450".to_string(),
            server_name: "pbridge".to_string(),
            token: None,
            connect_timeout_ms: 5_000,
            request_timeout_ms: 5_000,
            health_check_interval_ms: 15_000,
        }
    }
}

/// Per-event retry budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long deactivation keeps flushing pending events.
    pub grace_period_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 5_000,
        }
    }
}

impl BridgeConfig {
    /// Loads, applies environment overrides and validates.
    ///
    /// `path` overrides the default lookup.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(default_config_path);

        let mut config = match path {
            Some(path) => Self::load(&path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Reads a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// Applies `PBRIDGE_*` environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from `lookup`, keyed by environment variable name.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(address) = lookup(CONTROLLER_ADDRESS_ENV) {
            self.controller.address = address;
        }
        if let Some(server_name) = lookup(SERVER_NAME_ENV) {
            self.controller.server_name = server_name;
        }
        if let Some(token) = lookup(TOKEN_ENV) {
            self.controller.token = Some(token).filter(|t| !t.is_empty());
        }
    }

    /// Checks the values the channel cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.controller.address.trim().is_empty() {
            return Err(BridgeError::Config(
                "controller.address must not be empty".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(BridgeError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(BridgeError::Config(format!(
                "retry.multiplier must be at least 1.0, got {}",
                self.retry.multiplier
            )));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(BridgeError::Config(format!(
                "retry.initial_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.initial_delay_ms, self.retry.max_delay_ms
            )));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            multiplier: self.retry.multiplier,
        }
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            retry: self.retry_policy(),
            connect_timeout: Duration::from_millis(self.controller.connect_timeout_ms),
            request_timeout: Duration::from_millis(self.controller.request_timeout_ms),
            health_check_interval: Duration::from_millis(
                self.controller.health_check_interval_ms,
            ),
            shutdown_grace: Duration::from_millis(self.shutdown.grace_period_ms),
        }
    }

    /// TCP transport for the configured controller.
    pub fn transport(&self) -> TcpTransport {
        TcpTransport::new(
            self.controller.address.clone(),
            self.controller.server_name.clone(),
            self.controller.token.clone(),
        )
    }
}

/// `$PBRIDGE_CONFIG`, else `<config_dir>/pbridge/bridge.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .or_else(|| dirs::config_dir().map(|dir| dir.join("pbridge").join("bridge.toml")))
}
