//! Node configuration from environment variables.

use std::time::Duration;

use rumor_broadcast::correlation::{default_machine_id, MAX_MACHINE_ID};
use rumor_broadcast::service::{DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_TICK_INTERVAL};
use rumor_broadcast::BroadcastConfig;
use thiserror::Error;

pub const TICK_INTERVAL_VAR: &str = "RUMOR_TICK_INTERVAL_MS";
pub const MACHINE_ID_VAR: &str = "RUMOR_MACHINE_ID";
pub const SHUTDOWN_TIMEOUT_VAR: &str = "RUMOR_SHUTDOWN_TIMEOUT_MS";

/// Invalid configuration value.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Configuration for the node process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Retry pump period.
    pub tick_interval: Duration,

    /// Correlation id machine id (0..=1023).
    pub machine_id: u16,

    /// Maximum wait for the retry pump on shutdown.
    pub shutdown_timeout: Duration,
}

impl NodeConfig {
    /// Read config from the process environment, with defaults for unset
    /// variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read config through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let tick_interval = match lookup(TICK_INTERVAL_VAR) {
            Some(value) => parse_millis(TICK_INTERVAL_VAR, value)?,
            None => DEFAULT_TICK_INTERVAL,
        };
        if tick_interval.is_zero() {
            return Err(ConfigError::Invalid {
                var: TICK_INTERVAL_VAR,
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        let machine_id = match lookup(MACHINE_ID_VAR) {
            Some(value) => parse_machine_id(value)?,
            None => default_machine_id(),
        };

        let shutdown_timeout = match lookup(SHUTDOWN_TIMEOUT_VAR) {
            Some(value) => parse_millis(SHUTDOWN_TIMEOUT_VAR, value)?,
            None => DEFAULT_SHUTDOWN_TIMEOUT,
        };

        Ok(Self {
            tick_interval,
            machine_id,
            shutdown_timeout,
        })
    }

    pub fn broadcast(&self) -> BroadcastConfig {
        BroadcastConfig::default()
            .with_tick_interval(self.tick_interval)
            .with_machine_id(self.machine_id)
            .with_shutdown_timeout(self.shutdown_timeout)
    }
}

fn parse_millis(var: &'static str, value: String) -> Result<Duration, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(ms) => Ok(Duration::from_millis(ms)),
        Err(e) => Err(ConfigError::Invalid {
            var,
            value,
            reason: e.to_string(),
        }),
    }
}

fn parse_machine_id(value: String) -> Result<u16, ConfigError> {
    match value.trim().parse::<u16>() {
        Ok(id) if id <= MAX_MACHINE_ID => Ok(id),
        Ok(_) => Err(ConfigError::Invalid {
            var: MACHINE_ID_VAR,
            value,
            reason: format!("must be at most {MAX_MACHINE_ID}"),
        }),
        Err(e) => Err(ConfigError::Invalid {
            var: MACHINE_ID_VAR,
            value,
            reason: e.to_string(),
        }),
    }
}
