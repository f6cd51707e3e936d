//! Authentication and access configuration
//!
//! Two independent gates apply to every accepted peer: the `[access]`
//! allow-list, checked first, then the `[auth]` negotiation.

use serde::Deserialize;

/// Authentication mode
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// No negotiation (default)
    #[default]
    None,
    /// Shared token sent as the first line, `AUTH <token>`
    Token,
}

/// Authentication configuration
///
/// # Example
///
/// ```toml
/// [auth]
/// mode = "token"
/// token = "s3cret"
/// trust_loopback = true
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Negotiation mode
    /// Default: none
    pub mode: AuthMode,

    /// Shared token for `mode = "token"`
    pub token: String,

    /// Skip negotiation for loopback peers
    /// Default: false
    pub trust_loopback: bool,
}

/// Peer allow-list
///
/// Entries are single addresses or CIDR blocks. An empty list allows every
/// peer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Allowed peers
    pub allow: Vec<String>,
}

impl AccessConfig {
    /// Whether every peer is allowed
    pub fn is_open(&self) -> bool {
        self.allow.is_empty()
    }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
