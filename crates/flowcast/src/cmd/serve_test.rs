//! Tests for config translation and replay

use std::io::Write;
use std::net::Ipv4Addr;
use std::str::FromStr;

use flowcast_protocol::{BytesMut, FlowKey, FlowRecord, encode_record};

use super::*;

fn config(toml: &str) -> Config {
    Config::from_str(toml).unwrap()
}

// ============================================================================
// Engine and auth settings
// ============================================================================

#[test]
fn test_output_config_from_engine() {
    let config = config(
        r#"
[engine]
source_id = "192.0.2.9"
mar_interval = "15s"
max_clients = 4
max_queue_depth = 200
resume_queue_depth = 50
drop_batch = 8
max_writes_per_cycle = 16
startup_timeout = "2s"

[[listen]]
port = 561
"#,
    );

    let output = output_config(&config.engine).unwrap();
    assert_eq!(output.source_id, SourceIdentity::Ipv4(Ipv4Addr::new(192, 0, 2, 9)));
    assert_eq!(output.mar_interval, Duration::from_secs(15));
    assert_eq!(output.max_clients, 4);
    assert_eq!(output.startup_timeout, Duration::from_secs(2));
    assert_eq!(
        output.limits,
        SessionLimits::default()
            .with_queue_depth(200, 50)
            .with_drop_batch(8)
            .with_max_writes_per_cycle(16)
    );
}

#[test]
fn test_output_config_rejects_bad_source_id() {
    let mut engine = EngineConfig::default();
    engine.source_id = Some("much-too-long".into());
    assert!(output_config(&engine).is_err());
}

#[test]
fn test_auth_policy_modes() {
    let loopback: SocketAddr = "127.0.0.1:40000".parse().unwrap();
    let remote: SocketAddr = "192.0.2.1:40000".parse().unwrap();

    let none = auth_policy(&AuthConfig::default());
    assert!(!none.requires_negotiation(&remote));

    let token = auth_policy(&AuthConfig {
        mode: AuthMode::Token,
        token: "s3cret".into(),
        trust_loopback: true,
    });
    assert!(token.requires_negotiation(&remote));
    assert!(!token.requires_negotiation(&loopback));
}

// ============================================================================
// Listeners
// ============================================================================

#[tokio::test]
async fn test_listener_specs_split_by_channel() {
    let config = config(
        r#"
[[listen]]
address = "127.0.0.1"
port = 5610
version = 3

[[listen]]
address = "::1"
port = 5620
channel = "control"
"#,
    );

    let data = listener_specs(&config.listen, ChannelKind::Data).await.unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0].address, "127.0.0.1:5610".parse().unwrap());
    assert_eq!(data[0].format, WireFormat::Native(WireVersion::V3));

    let control = listener_specs(&config.listen, ChannelKind::Control).await.unwrap();
    assert_eq!(control[0].address, "[::1]:5620".parse().unwrap());
    assert_eq!(control[0].format, WireFormat::Native(WireVersion::V5));
}

#[tokio::test]
async fn test_listener_specs_resolve_hostnames() {
    let listen = vec![ListenConfig {
        address: "localhost".into(),
        port: 5611,
        ..ListenConfig::default()
    }];
    let specs = listener_specs(&listen, ChannelKind::Data).await.unwrap();
    assert_eq!(specs[0].address.port(), 5611);
    assert!(specs[0].address.ip().is_loopback());
}

// ============================================================================
// Config loading
// ============================================================================

#[test]
fn test_load_config_missing_explicit_path() {
    let result = load_config(Some(Path::new("/nonexistent/flowcast.toml")));
    assert!(result.is_err());
}

#[test]
fn test_load_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[[listen]]\nport = 5612\nchannel = \"control\"").unwrap();

    let loaded = load_config(Some(file.path())).unwrap();
    assert_eq!(loaded.source.as_deref(), Some(file.path()));
    assert_eq!(loaded.config.listen[0].channel, ChannelKind::Control);
}

// ============================================================================
// Replay
// ============================================================================

#[tokio::test]
async fn test_replay_pushes_every_record() {
    let mut record = FlowRecord::flow();
    record.flow = Some(FlowKey::V4 {
        src: Ipv4Addr::new(192, 0, 2, 1),
        dst: Ipv4Addr::new(192, 0, 2, 2),
        proto: 17,
        sport: 53,
        dport: 5353,
        src_mask: 32,
        dst_mask: 32,
    });
    let mut bytes = BytesMut::new();
    for _ in 0..3 {
        encode_record(&record, WireVersion::V5, &mut bytes).unwrap();
    }

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&bytes).unwrap();

    let manager = OutputManager::new(Channel::Data, OutputConfig::default());
    replay_file(&manager, file.path()).await.unwrap();
    assert_eq!(manager.stats().input_depth, 3);
}

#[tokio::test]
async fn test_replay_rejects_garbage() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&[0xff, 0x00, 0x00, 0x01, 0xde, 0xad]).unwrap();

    let manager = OutputManager::new(Channel::Data, OutputConfig::default());
    assert!(replay_file(&manager, file.path()).await.is_err());
    assert_eq!(manager.stats().input_depth, 0);
}
