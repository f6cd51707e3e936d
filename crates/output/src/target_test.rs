//! Tests for static output targets

use std::io::Read;

use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;

use flowcast_protocol::WireVersion;

use super::*;

const V3: WireFormat = WireFormat::Native(WireVersion::V3);
const V5: WireFormat = WireFormat::Native(WireVersion::V5);

// ============================================================================
// Parsing
// ============================================================================

#[test]
fn test_parse_bare_path() {
    let target = OutputTarget::parse("/var/log/flows.bin").unwrap();
    assert_eq!(target.kind, TargetKind::File(PathBuf::from("/var/log/flows.bin")));
    assert_eq!(target.format, V5);
}

#[test]
fn test_parse_file_url_with_format() {
    let target: OutputTarget = "file+v3:///tmp/out.v3".parse().unwrap();
    assert_eq!(target.kind, TargetKind::File(PathBuf::from("/tmp/out.v3")));
    assert_eq!(target.format, V3);
}

#[test]
fn test_parse_udp_netflow() {
    let target = OutputTarget::parse("udp+netflow://collector:9995").unwrap();
    assert_eq!(target.kind, TargetKind::Udp("collector:9995".into()));
    assert_eq!(target.format, WireFormat::NetflowV5);
}

#[test]
fn test_parse_default_ports() {
    let netflow = OutputTarget::parse("netflow://collector").unwrap();
    assert_eq!(netflow.kind, TargetKind::Udp("collector:2055".into()));
    assert_eq!(netflow.format, WireFormat::NetflowV5);

    let native = OutputTarget::parse("tcp://monitor").unwrap();
    assert_eq!(native.kind, TargetKind::Tcp("monitor:561".into()));
    assert_eq!(native.format, V5);
}

#[test]
fn test_parse_ipv6_hosts() {
    let bracketed = OutputTarget::parse("tcp+v3://[2001:db8::1]:7000").unwrap();
    assert_eq!(bracketed.kind, TargetKind::Tcp("[2001:db8::1]:7000".into()));
    assert_eq!(bracketed.format, V3);

    let bare = OutputTarget::parse("udp://2001:db8::1").unwrap();
    assert_eq!(bare.kind, TargetKind::Udp("[2001:db8::1]:561".into()));
}

#[test]
fn test_parse_rejects() {
    for bad in [
        "",
        "ftp://host",
        "udp+v9://host",
        "udp://",
        "tcp://host:notaport",
        "tcp://host:70000",
        "tcp://[::1",
        "file://",
    ] {
        assert!(OutputTarget::parse(bad).is_err(), "accepted {bad:?}");
    }
}

#[test]
fn test_display_reparses() {
    for text in ["udp+netflow://collector:2055", "tcp+v3://[::1]:561", "file+v5:///tmp/x"] {
        let target = OutputTarget::parse(text).unwrap();
        assert_eq!(target.to_string(), text);
        assert_eq!(OutputTarget::parse(&target.to_string()).unwrap(), target);
    }
}

// ============================================================================
// File sink
// ============================================================================

#[tokio::test]
async fn test_file_output_initial_mar_only_when_empty() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("flows.bin");
    let target = OutputTarget {
        kind: TargetKind::File(path.clone()),
        format: V5,
    };

    let mut opened = target.open().await.unwrap();
    assert!(opened.initial_mar);
    assert_eq!(opened.sink.kind(), "file");
    assert_eq!(opened.sink.try_write(b"abcd").unwrap(), 4);
    drop(opened);

    let reopened = target.open().await.unwrap();
    assert!(!reopened.initial_mar);
}

#[test]
fn test_file_sink_appends() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("flows.bin");
    std::fs::write(&path, b"head").unwrap();

    let mut sink = FileSink::open(&path).unwrap();
    assert!(!sink.is_empty());
    sink.try_write(b"tail").unwrap();

    let mut content = Vec::new();
    File::open(&path).unwrap().read_to_end(&mut content).unwrap();
    assert_eq!(content, b"headtail");
}

#[cfg(unix)]
#[test]
fn test_file_sink_reopens_after_rotation() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("flows.bin");
    let rotated = dir.path().join("flows.bin.1");

    let mut sink = FileSink::open(&path).unwrap();
    sink.try_write(b"old").unwrap();
    assert!(!sink.reopen_if_rotated().unwrap());

    std::fs::rename(&path, &rotated).unwrap();
    assert!(sink.reopen_if_rotated().unwrap());
    sink.try_write(b"new").unwrap();

    assert_eq!(std::fs::read(&rotated).unwrap(), b"old");
    assert_eq!(std::fs::read(&path).unwrap(), b"new");
}

#[test]
fn test_file_open_failure() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing").join("flows.bin");
    assert!(matches!(FileSink::open(&path), Err(SinkError::Open { .. })));
}

// ============================================================================
// Network sinks
// ============================================================================

#[tokio::test]
async fn test_udp_output_sends_datagrams() {
    let collector = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = collector.local_addr().unwrap();
    let target = OutputTarget::parse(&format!("udp+netflow://{addr}")).unwrap();

    let mut opened = target.open().await.unwrap();
    assert_eq!(opened.format, WireFormat::NetflowV5);
    assert_eq!(opened.sink.try_write(b"packet-one").unwrap(), 10);

    let mut buf = [0u8; 64];
    let n = tokio::time::timeout(Duration::from_secs(5), collector.recv(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], b"packet-one");
}

#[tokio::test]
async fn test_tcp_output_connects() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let target = OutputTarget::parse(&format!("tcp://{addr}")).unwrap();

    let mut opened = target.open().await.unwrap();
    let (mut accepted, _) = listener.accept().await.unwrap();

    // the socket may need a moment before it reports writable
    let mut written = 0;
    while written == 0 {
        match opened.sink.try_write(b"hello") {
            Ok(n) => written = n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Err(e) => panic!("write failed: {e}"),
        }
    }

    let mut buf = [0u8; 5];
    accepted.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello");
}

#[tokio::test]
async fn test_tcp_output_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let target = OutputTarget::parse(&format!("tcp://{addr}")).unwrap();
    assert!(matches!(target.open().await, Err(SinkError::Open { .. })));
}
