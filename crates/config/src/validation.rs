//! Configuration validation
//!
//! Validates config consistency:
//! - At least one listener or static output
//! - No two listeners on the same address and port
//! - Listener versions are 3 or 5
//! - Queue thresholds and per-cycle limits are usable
//! - Token mode carries a token
//! - Access entries and output targets parse

use std::collections::HashSet;
use std::net::IpAddr;

use ipnet::IpNet;

use crate::Config;
use crate::auth::AuthMode;
use crate::error::{ConfigError, Result};
use crate::listen::check_target;

/// Validate the entire configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.listen.is_empty() && config.outputs.is_empty() {
        return Err(ConfigError::NothingToServe);
    }
    validate_engine(config)?;
    validate_auth(config)?;
    validate_listeners(config)?;
    validate_outputs(config)?;
    Ok(())
}

fn validate_engine(config: &Config) -> Result<()> {
    let engine = &config.engine;

    if engine.max_clients == 0 {
        return Err(ConfigError::invalid_value(
            "engine",
            "engine",
            "max_clients",
            "must be at least 1",
        ));
    }
    if engine.max_writes_per_cycle == 0 {
        return Err(ConfigError::invalid_value(
            "engine",
            "engine",
            "max_writes_per_cycle",
            "must be at least 1",
        ));
    }
    if engine.max_queue_depth == 0 {
        return Err(ConfigError::invalid_value(
            "engine",
            "engine",
            "max_queue_depth",
            "must be at least 1",
        ));
    }
    if engine.resume_queue_depth >= engine.max_queue_depth {
        return Err(ConfigError::invalid_value(
            "engine",
            "engine",
            "resume_queue_depth",
            format!(
                "must be below max_queue_depth ({})",
                engine.max_queue_depth
            ),
        ));
    }
    if let Some(ref id) = engine.source_id
        && id.trim().is_empty()
    {
        return Err(ConfigError::invalid_value(
            "engine",
            "engine",
            "source_id",
            "must not be empty",
        ));
    }
    Ok(())
}

fn validate_auth(config: &Config) -> Result<()> {
    if config.auth.mode == AuthMode::Token && config.auth.token.is_empty() {
        return Err(ConfigError::missing_field("auth", "token", "token"));
    }

    for entry in &config.access.allow {
        let entry = entry.trim();
        if entry.parse::<IpNet>().is_err() && entry.parse::<IpAddr>().is_err() {
            return Err(ConfigError::invalid_value(
                "access",
                entry,
                "allow",
                "expected an IP address or CIDR block",
            ));
        }
    }
    Ok(())
}

fn validate_listeners(config: &Config) -> Result<()> {
    let mut seen = HashSet::new();

    for listen in &config.listen {
        let name = listen.socket_addr();
        if listen.address.trim().is_empty() {
            return Err(ConfigError::missing_field("listen", name, "address"));
        }
        if listen.version != 3 && listen.version != 5 {
            return Err(ConfigError::invalid_value(
                "listen",
                name,
                "version",
                format!("must be 3 or 5, got {}", listen.version),
            ));
        }
        if !seen.insert((listen.address.as_str(), listen.port)) {
            return Err(ConfigError::duplicate_listener(
                listen.address.clone(),
                listen.port,
            ));
        }
    }
    Ok(())
}

fn validate_outputs(config: &Config) -> Result<()> {
    for output in &config.outputs {
        check_target(&output.target).map_err(|message| {
            ConfigError::invalid_value("output", output.target.clone(), "target", message)
        })?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "validation_test.rs"]
mod tests;
