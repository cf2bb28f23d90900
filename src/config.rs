//! Layered service configuration.
//!
//! Sources, highest priority first:
//! 1. Environment variables with the `CHECKIN_` prefix; `__` separates sections,
//!    so `CHECKIN_SERVER__PORT` maps to `server.port`.
//! 2. A TOML file, either the one passed explicitly or `./checkin.toml`.
//! 3. Built-in defaults.

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{runtime::handle::RuntimeConfig, types::RescanPolicy};

const DEFAULT_CONFIG_FILE: &str = "checkin.toml";
const ENV_PREFIX: &str = "CHECKIN_";

/// Configuration loading failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or did not match the schema.
    #[error("Configuration error: {0}")]
    Figment(#[from] figment::Error),

    /// A value parsed but is out of range.
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue {
        /// Dotted path of the offending key.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind.
    pub bind: String,
    /// TCP port.
    pub port: u16,
    /// Seconds a browser may cache CORS preflight results.
    pub cors_max_age_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 3000,
            cors_max_age_secs: 60 * 60,
        }
    }
}

impl ServerConfig {
    /// `bind:port`, ready for [`tokio::net::TcpListener::bind`].
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// Journal location; `None` keeps the journal in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite journal file.
    pub path: Option<PathBuf>,
}

/// Check-in behaviour.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckInConfig {
    /// What a repeat scan of an already checked-in badge does.
    pub rescan: RescanPolicy,
}

/// Full service configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// `[server]`
    #[serde(default)]
    pub server: ServerConfig,
    /// `[database]`
    #[serde(default)]
    pub database: DatabaseConfig,
    /// `[checkin]`
    #[serde(default)]
    pub checkin: CheckInConfig,
    /// `[runtime]`
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl Config {
    /// Loads and validates configuration from all sources.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let config: Self = Self::figment(file).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the provider chain without extracting it.
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        match file {
            Some(path) => figment = figment.merge(Toml::file(path)),
            None => {
                let local = Path::new(DEFAULT_CONFIG_FILE);
                if local.exists() {
                    figment = figment.merge(Toml::file(local));
                }
            }
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.runtime.batch_max_ops == 0 {
            return Err(ConfigError::InvalidValue {
                field: "runtime.batch_max_ops",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.runtime.persist_queue_bound == 0 {
            return Err(ConfigError::InvalidValue {
                field: "runtime.persist_queue_bound",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
