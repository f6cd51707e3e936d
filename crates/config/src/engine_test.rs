//! Tests for the engine section

use super::*;

#[test]
fn test_defaults() {
    let config: EngineConfig = toml::from_str("").unwrap();
    assert_eq!(config.source_id, None);
    assert_eq!(config.mar_interval, Duration::from_secs(60));
    assert_eq!(config.max_clients, 32);
    assert_eq!(config.max_queue_depth, 10_000);
    assert_eq!(config.resume_queue_depth, 5_000);
    assert_eq!(config.scan_interval, Duration::from_millis(50));
}

#[test]
fn test_durations_use_humantime() {
    let toml = r#"
mar_interval = "0s"
startup_timeout = "1m"
idle_wait = "5ms"
"#;
    let config: EngineConfig = toml::from_str(toml).unwrap();
    assert_eq!(config.mar_interval, Duration::ZERO);
    assert_eq!(config.startup_timeout, Duration::from_secs(60));
    assert_eq!(config.idle_wait, Duration::from_millis(5));
}

#[test]
fn test_bad_duration_rejected() {
    assert!(toml::from_str::<EngineConfig>(r#"mar_interval = "soon""#).is_err());
}
