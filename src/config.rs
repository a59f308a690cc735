//! Configuration
//!
//! Defaults suitable for local play, overridable from `NIM_*` environment
//! variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::network::matchmaking::PairingStrategy;
use crate::network::reaper::ReaperConfig;

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Environment variable could not be parsed.
    #[error("invalid value for {var}: {reason}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// Pile layout cannot start a game.
    #[error("initial piles must contain at least one stone")]
    EmptyPiles,
}

/// Coordinator configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Piles every new session starts with.
    pub initial_piles: Vec<u32>,
    /// Pairing strategy.
    pub pairing: PairingStrategy,
    /// Eviction grace windows.
    pub reaper: ReaperConfig,
    /// General sweep interval.
    pub sweep_interval: Duration,
    /// How often due evictions are checked.
    pub reap_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            initial_piles: vec![3, 5, 7],
            pairing: PairingStrategy::DirectKey,
            reaper: ReaperConfig::default(),
            sweep_interval: Duration::from_secs(300),
            reap_interval: Duration::from_secs(1),
        }
    }
}

impl CoordinatorConfig {
    /// Single-pile layout with `stones` stones.
    pub fn single_pile(stones: u32) -> Self {
        Self {
            initial_piles: vec![stones],
            ..Default::default()
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            initial_piles: match env_var("NIM_PILES") {
                Some(raw) => parse_piles(&raw)?,
                None => defaults.initial_piles,
            },
            pairing: env_parse("NIM_PAIRING")?.unwrap_or(defaults.pairing),
            reaper: ReaperConfig {
                finished_grace: env_secs("NIM_FINISHED_GRACE_SECS")?
                    .unwrap_or(defaults.reaper.finished_grace),
                abandoned_grace: env_secs("NIM_ABANDONED_GRACE_SECS")?
                    .unwrap_or(defaults.reaper.abandoned_grace),
            },
            sweep_interval: env_secs("NIM_SWEEP_INTERVAL_SECS")?.unwrap_or(defaults.sweep_interval),
            reap_interval: defaults.reap_interval,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject layouts that cannot start a game.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_piles.iter().all(|&p| p == 0) {
            return Err(ConfigError::EmptyPiles);
        }
        Ok(())
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Per-connection outbound buffer (messages).
    pub outbound_buffer: usize,
    /// Coordinator intake buffer (commands).
    pub command_buffer: usize,
    /// Server version string.
    pub version: String,
    /// Coordinator settings.
    pub coordinator: CoordinatorConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
            max_connections: 1000,
            outbound_buffer: 64,
            command_buffer: 1024,
            version: crate::VERSION.to_string(),
            coordinator: CoordinatorConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            bind_addr: env_parse("NIM_BIND_ADDR")?.unwrap_or(defaults.bind_addr),
            max_connections: env_parse("NIM_MAX_CONNECTIONS")?.unwrap_or(defaults.max_connections),
            coordinator: CoordinatorConfig::from_env()?,
            ..defaults
        })
    }
}

/// Parse a comma separated pile layout such as `3,5,7`.
pub fn parse_piles(raw: &str) -> Result<Vec<u32>, ConfigError> {
    let piles = raw
        .split(',')
        .map(|part| part.trim().parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConfigError::InvalidValue {
            var: "NIM_PILES",
            reason: e.to_string(),
        })?;

    if piles.iter().all(|&p| p == 0) {
        return Err(ConfigError::EmptyPiles);
    }
    Ok(piles)
}

fn env_var(var: &'static str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_var(var)
        .map(|raw| raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
            var,
            reason: e.to_string(),
        }))
        .transpose()
}

fn env_secs(var: &'static str) -> Result<Option<Duration>, ConfigError> {
    Ok(env_parse::<u64>(var)?.map(Duration::from_secs))
}
