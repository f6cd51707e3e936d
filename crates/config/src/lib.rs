//! Flowcast Configuration
//!
//! TOML-based configuration loading with sensible defaults.
//! Minimal config should just work - only specify what you need to change.
//!
//! # Parsing
//!
//! Use the `FromStr` trait to parse configuration:
//!
//! ```
//! use flowcast_config::Config;
//! use std::str::FromStr;
//!
//! let config = Config::from_str("[[listen]]\nport = 561").unwrap();
//! assert_eq!(config.listen.len(), 1);
//! ```
//!
//! # Example Minimal Config
//!
//! ```toml
//! [engine]
//! source_id = "192.0.2.1"
//!
//! [[listen]]
//! port = 561
//!
//! [[listen]]
//! port = 562
//! channel = "control"
//! ```

mod auth;
mod engine;
mod error;
mod listen;
mod logging;
mod validation;

use std::fs;
use std::path::Path;
use std::str::FromStr;

pub use auth::{AccessConfig, AuthConfig, AuthMode};
pub use engine::EngineConfig;
pub use error::{ConfigError, Result};
pub use listen::{ChannelKind, DEFAULT_PORT, ListenConfig, OutputConfig};
pub use logging::{LogConfig, LogFormat, LogLevel, LogOutput};

use serde::Deserialize;

/// Main configuration structure
///
/// All sections are optional with sensible defaults, but at least one
/// listener or static output must be declared.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,

    /// Queue limits, timers, and source identity
    pub engine: EngineConfig,

    /// Client authentication
    pub auth: AuthConfig,

    /// Peer allow-list
    pub access: AccessConfig,

    /// Listening sockets (data and control channels)
    pub listen: Vec<ListenConfig>,

    /// Static outputs opened at startup
    pub outputs: Vec<OutputConfig>,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, contains invalid TOML, or
    /// fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string
    ///
    /// Prefer using the `FromStr` trait implementation.
    fn parse(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// Applied automatically by [`Config::from_file`] and `FromStr`; call it
    /// again after editing a loaded config in place.
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }

    /// Listeners serving the given channel
    pub fn listeners(&self, channel: ChannelKind) -> impl Iterator<Item = &ListenConfig> {
        self.listen.iter().filter(move |l| l.channel == channel)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
