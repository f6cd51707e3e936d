//! Errors raised while loading `flowcast.toml`

use std::io;
use thiserror::Error;

/// Result of loading or validating a [`crate::Config`]
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Why a configuration was rejected
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Malformed TOML or a value of the wrong type
    #[error("invalid config syntax: {0}")]
    ParseError(#[from] toml::de::Error),

    /// A section needs a setting that was left out, e.g. `auth.token`
    /// in token mode
    #[error("{component} '{name}' requires '{field}'")]
    MissingField {
        /// Section, e.g. `"auth"`
        component: &'static str,
        /// Which entry of the section
        name: String,
        field: &'static str,
    },

    #[error("{component} '{name}': bad {field} ({message})")]
    InvalidValue {
        component: &'static str,
        name: String,
        field: &'static str,
        message: String,
    },

    /// Two listeners share an address and port
    #[error("listener {address}:{port} is declared more than once")]
    DuplicateListener { address: String, port: u16 },

    /// Neither a listener nor a static output is configured
    #[error("no listeners or outputs configured, nothing to serve")]
    NothingToServe,
}

impl ConfigError {
    pub fn missing_field(
        component: &'static str,
        name: impl Into<String>,
        field: &'static str,
    ) -> Self {
        Self::MissingField {
            component,
            name: name.into(),
            field,
        }
    }

    pub fn invalid_value(
        component: &'static str,
        name: impl Into<String>,
        field: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            component,
            name: name.into(),
            field,
            message: message.into(),
        }
    }

    pub fn duplicate_listener(address: impl Into<String>, port: u16) -> Self {
        Self::DuplicateListener {
            address: address.into(),
            port,
        }
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
