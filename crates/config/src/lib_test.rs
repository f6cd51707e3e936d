//! Tests for loading whole configuration files

use super::*;
use std::io::Write;
use std::str::FromStr;
use std::time::Duration;

#[test]
fn test_minimal_config() {
    let config = Config::from_str("[[listen]]\nport = 50561\n").unwrap();
    assert_eq!(config.listen.len(), 1);
    assert_eq!(config.listen[0].port, 50561);
    assert_eq!(config.engine.max_clients, 32);
    assert_eq!(config.auth.mode, AuthMode::None);
    assert!(config.access.is_open());
    assert!(config.outputs.is_empty());
}

#[test]
fn test_full_config_parse() {
    let toml = r#"
[log]
level = "debug"
format = "json"

[engine]
source_id = "192.0.2.1"
mar_interval = "30s"
max_clients = 8
max_queue_depth = 2000
resume_queue_depth = 1000
startup_timeout = "2s"

[auth]
mode = "token"
token = "s3cret"
trust_loopback = true

[access]
allow = ["10.0.0.0/8"]

[[listen]]
address = "0.0.0.0"
port = 561
channel = "data"
version = 5

[[listen]]
address = "127.0.0.1"
port = 562
channel = "control"
version = 3

[[outputs]]
target = "udp+netflow://collector:2055"

[[outputs]]
target = "/var/log/flows.bin"
"#;
    let config = Config::from_str(toml).unwrap();

    assert_eq!(config.log.level, LogLevel::Debug);
    assert_eq!(config.log.format, LogFormat::Json);
    assert_eq!(config.engine.source_id.as_deref(), Some("192.0.2.1"));
    assert_eq!(config.engine.mar_interval, Duration::from_secs(30));
    assert_eq!(config.engine.max_clients, 8);
    assert_eq!(config.auth.mode, AuthMode::Token);
    assert!(config.auth.trust_loopback);
    assert_eq!(config.access.allow, vec!["10.0.0.0/8"]);
    assert_eq!(config.listen.len(), 2);
    assert_eq!(config.listeners(ChannelKind::Data).count(), 1);
    assert_eq!(
        config.listeners(ChannelKind::Control).next().unwrap().version,
        3
    );
    assert_eq!(config.outputs.len(), 2);
}

#[test]
fn test_example_config_parses() {
    let config = Config::from_str(include_str!("../../../configs/flowcast.toml")).unwrap();
    assert_eq!(config.listeners(ChannelKind::Data).count(), 1);
    assert_eq!(config.listeners(ChannelKind::Control).count(), 1);
}

#[test]
fn test_invalid_toml() {
    let result = Config::from_str("invalid { toml");
    assert!(matches!(result, Err(ConfigError::ParseError(_))));
}

#[test]
fn test_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[[listen]]\nport = 5561").unwrap();

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.listen[0].port, 5561);
}

#[test]
fn test_from_missing_file() {
    let result = Config::from_file("/nonexistent/flowcast.toml");
    assert!(matches!(result, Err(ConfigError::IoError { .. })));
}
