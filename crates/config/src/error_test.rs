//! Tests for config error messages

use super::*;

#[test]
fn test_missing_token_message() {
    let err = ConfigError::missing_field("auth", "token", "token");
    assert_eq!(err.to_string(), "auth 'token' requires 'token'");
}

#[test]
fn test_bad_listener_version_message() {
    let err = ConfigError::invalid_value("listen", "0.0.0.0:561", "version", "must be 3 or 5");
    assert_eq!(
        err.to_string(),
        "listen '0.0.0.0:561': bad version (must be 3 or 5)"
    );
}

#[test]
fn test_duplicate_listener_error() {
    let err = ConfigError::duplicate_listener("127.0.0.1", 561);
    assert!(err.to_string().contains("127.0.0.1:561"));
}

#[test]
fn test_nothing_to_serve() {
    assert!(ConfigError::NothingToServe.to_string().contains("no listeners"));
}
