//! Listener and static output declarations

use serde::Deserialize;

/// Default monitor port
pub const DEFAULT_PORT: u16 = 561;

/// Which command set a listener serves
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Binary record stream (default)
    #[default]
    Data,
    /// Line-oriented control commands
    Control,
}

impl ChannelKind {
    /// Lowercase name, as accepted in the config file
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Control => "control",
        }
    }
}

/// One `[[listen]]` entry
///
/// # Example
///
/// ```toml
/// [[listen]]
/// address = "0.0.0.0"
/// port = 561
/// channel = "data"
/// version = 5
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Bind address
    /// Default: 0.0.0.0
    pub address: String,

    /// Bind port
    /// Default: 561
    pub port: u16,

    /// Channel served on this socket
    /// Default: data
    pub channel: ChannelKind,

    /// Native wire version for sessions accepted here (3 or 5)
    /// Default: 5
    pub version: u8,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            channel: ChannelKind::Data,
            version: 5,
        }
    }
}

impl ListenConfig {
    /// `address:port`, bracketing IPv6 literals
    pub fn socket_addr(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

/// One `[[outputs]]` entry
///
/// `target` is a file path or a `file://`, `udp://`, `netflow://`, or
/// `tcp://` URL with an optional `+v3`, `+v5`, or `+netflow` suffix on the
/// scheme.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Destination
    pub target: String,
}

const SCHEMES: &[&str] = &["file", "udp", "netflow", "tcp"];
const FORMATS: &[&str] = &["v3", "v5", "netflow"];

/// Syntax check for an output target
///
/// Only the shape is checked here. Host resolution and the final parse
/// happen when the engine opens the target.
pub(crate) fn check_target(target: &str) -> std::result::Result<(), String> {
    let target = target.trim();
    if target.is_empty() {
        return Err("target is empty".into());
    }

    let Some((scheme, rest)) = target.split_once("://") else {
        // bare file path
        return Ok(());
    };

    let (base, format) = match scheme.split_once('+') {
        Some((base, format)) => (base, Some(format)),
        None => (scheme, None),
    };
    let base = base.to_ascii_lowercase();
    if !SCHEMES.contains(&base.as_str()) {
        return Err(format!("unknown scheme '{scheme}'"));
    }
    if let Some(format) = format
        && !FORMATS.contains(&format.to_ascii_lowercase().as_str())
    {
        return Err(format!("unknown format '{format}'"));
    }
    if rest.is_empty() {
        return Err("missing destination".into());
    }
    Ok(())
}

#[cfg(test)]
#[path = "listen_test.rs"]
mod tests;
