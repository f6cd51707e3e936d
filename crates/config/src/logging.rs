//! `[log]` section
//!
//! Diagnostics of the engine itself, not the flow records it distributes.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Verbosity of engine diagnostics
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Every command and write
    Trace,
    /// Session lifecycle and queue transitions
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Line format of engine diagnostics
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text, coloured on a terminal
    #[default]
    Console,
    /// One JSON object per event
    Json,
}

/// Where engine diagnostics go
///
/// `"stdout"` and `"stderr"` name the standard streams; any other string is
/// a file path opened for append.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    #[default]
    Stderr,
    #[serde(untagged)]
    File(String),
}

/// `[log]` section
///
/// ```toml
/// [log]
/// level = "info"
/// format = "json"
/// output = "/var/log/flowcast.log"
///
/// [log.modules]
/// flowcast_output = "debug"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub output: LogOutput,

    /// Per-crate overrides of `level`, keyed by tracing target
    pub modules: BTreeMap<String, LogLevel>,
}

impl LogConfig {
    /// Build an `EnvFilter` directive string from a base level and the
    /// per-crate overrides
    pub fn filter_directives(&self, base: &str) -> String {
        let mut directives = base.to_string();
        for (target, level) in &self.modules {
            directives.push(',');
            directives.push_str(target);
            directives.push('=');
            directives.push_str(level.as_str());
        }
        directives
    }
}

#[cfg(test)]
#[path = "logging_test.rs"]
mod tests;
