//! Socket tests for the Event Loop

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use flowcast_protocol::wire::{MAR_CAUSE_START, MAR_CAUSE_STOP};
use flowcast_protocol::{FlowKey, FlowRecord, decode_record};

use super::*;
use crate::auth::{AccessList, AuthPolicy, TokenAuthenticator};
use crate::dispatch::DispatchLoop;
use crate::manager::OutputConfig;

const V5: WireFormat = WireFormat::Native(WireVersion::V5);
const DEADLINE: Duration = Duration::from_secs(5);

struct Running {
    manager: Arc<OutputManager>,
    addr: SocketAddr,
    event_loop: JoinHandle<()>,
    dispatch: JoinHandle<Result<()>>,
}

impl Running {
    async fn stop(self) {
        self.manager.shutdown();
        self.dispatch.await.unwrap().unwrap();
        self.event_loop.await.unwrap();
    }
}

async fn start(manager: OutputManager) -> Running {
    let manager = Arc::new(manager);
    let spec = ListenerSpec::new("127.0.0.1:0".parse().unwrap(), V5);
    let event_loop = EventLoop::bind(Arc::clone(&manager), &[spec]).await.unwrap();
    let addr = event_loop.local_addrs()[0];
    let dispatch = DispatchLoop::new(Arc::clone(&manager)).unwrap();
    Running {
        addr,
        event_loop: tokio::spawn(event_loop.run()),
        dispatch: tokio::spawn(dispatch.run()),
        manager,
    }
}

fn config() -> OutputConfig {
    OutputConfig::default()
        .with_mar_interval(Duration::ZERO)
        .with_startup_timeout(Duration::from_secs(30))
        .with_scan_interval(Duration::from_millis(10))
        .with_idle_wait(Duration::from_millis(5))
}

/// Read one native record: header word, then the declared length
async fn read_record(stream: &mut TcpStream) -> Vec<u8> {
    let mut record = vec![0u8; 4];
    timeout(DEADLINE, stream.read_exact(&mut record))
        .await
        .unwrap()
        .unwrap();
    let words = u16::from_be_bytes([record[2], record[3]]) as usize;
    record.resize(words * 4, 0);
    timeout(DEADLINE, stream.read_exact(&mut record[4..]))
        .await
        .unwrap()
        .unwrap();
    record
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    timeout(DEADLINE, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

fn flow() -> FlowRecord {
    let mut record = FlowRecord::flow();
    record.flow = Some(FlowKey::V4 {
        src: Ipv4Addr::new(192, 0, 2, 1),
        dst: Ipv4Addr::new(192, 0, 2, 2),
        proto: 6,
        sport: 1234,
        dport: 443,
        src_mask: 24,
        dst_mask: 24,
    });
    record
}

// ============================================================================
// Data channel
// ============================================================================

#[tokio::test]
async fn test_client_gets_start_record_then_flows() {
    let running = start(OutputManager::new(Channel::Data, config())).await;
    let mut client = TcpStream::connect(running.addr).await.unwrap();

    let first = read_record(&mut client).await;
    let (decoded, _) = decode_record(&first).unwrap();
    assert_eq!(decoded.record.cause, MAR_CAUSE_START);

    client.write_all(b"START:\n").await.unwrap();
    let manager = Arc::clone(&running.manager);
    wait_for(|| manager.sessions().lock().iter().any(|s| s.accepts_records())).await;

    running.manager.push(flow());
    let second = read_record(&mut client).await;
    let (decoded, _) = decode_record(&second).unwrap();
    assert_eq!(decoded.record.flow, flow().flow);

    running.stop().await;
    let last = read_record(&mut client).await;
    let (decoded, _) = decode_record(&last).unwrap();
    assert_eq!(decoded.record.cause, MAR_CAUSE_STOP);
}

#[tokio::test]
async fn test_max_clients_sends_error_record() {
    let running = start(OutputManager::new(Channel::Data, config().with_max_clients(1))).await;

    let mut first = TcpStream::connect(running.addr).await.unwrap();
    read_record(&mut first).await;

    let mut second = TcpStream::connect(running.addr).await.unwrap();
    let mut refused = Vec::new();
    timeout(DEADLINE, second.read_to_end(&mut refused))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(refused, vec![0x85, 0x41, 0x00, 0x01]);
    assert_eq!(running.manager.client_count(), 1);

    running.stop().await;
}

#[tokio::test]
async fn test_access_list_drops_peer() {
    let manager = OutputManager::new(Channel::Data, config())
        .with_access(AccessList::parse(["10.0.0.0/8"]).unwrap());
    let running = start(manager).await;

    let mut client = TcpStream::connect(running.addr).await.unwrap();
    let mut buf = Vec::new();
    let n = timeout(DEADLINE, client.read_to_end(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);
    assert_eq!(running.manager.client_count(), 0);

    running.stop().await;
}

#[tokio::test]
async fn test_disconnect_removes_session() {
    let running = start(OutputManager::new(Channel::Data, config())).await;
    let mut client = TcpStream::connect(running.addr).await.unwrap();
    read_record(&mut client).await;
    assert_eq!(running.manager.client_count(), 1);

    drop(client);
    let manager = Arc::clone(&running.manager);
    wait_for(|| manager.client_count() == 0).await;

    running.stop().await;
}

#[tokio::test]
async fn test_token_negotiation_before_streaming() {
    let manager = OutputManager::new(Channel::Data, config())
        .with_auth(AuthPolicy::new(Arc::new(TokenAuthenticator::new("s3cret"))));
    let running = start(manager).await;

    let mut client = TcpStream::connect(running.addr).await.unwrap();
    client.write_all(b"AUTH s3cret\n").await.unwrap();
    let mut ack = [0u8; 3];
    timeout(DEADLINE, client.read_exact(&mut ack))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&ack, b"OK\n");

    let first = read_record(&mut client).await;
    let (decoded, _) = decode_record(&first).unwrap();
    assert_eq!(decoded.record.cause, MAR_CAUSE_START);

    running.stop().await;
}

#[tokio::test]
async fn test_failed_negotiation_never_registers() {
    let manager = OutputManager::new(Channel::Data, config())
        .with_auth(AuthPolicy::new(Arc::new(TokenAuthenticator::new("s3cret"))));
    let running = start(manager).await;

    let mut client = TcpStream::connect(running.addr).await.unwrap();
    client.write_all(b"AUTH wrong\n").await.unwrap();
    let mut reply = Vec::new();
    timeout(DEADLINE, client.read_to_end(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert!(reply.starts_with(b"KO "));
    assert_eq!(running.manager.client_count(), 0);

    running.stop().await;
}

// ============================================================================
// Control channel
// ============================================================================

#[tokio::test]
async fn test_control_status_round_trip() {
    let running = start(OutputManager::new(Channel::Control, config())).await;
    let mut client = TcpStream::connect(running.addr).await.unwrap();

    client.write_all(b"STATUS:\n").await.unwrap();
    let mut text = Vec::new();
    timeout(DEADLINE, async {
        let mut chunk = [0u8; 512];
        while !text.ends_with(b"OK\n") {
            let n = client.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed early");
            text.extend_from_slice(&chunk[..n]);
        }
    })
    .await
    .unwrap();

    let text = String::from_utf8(text).unwrap();
    assert!(text.starts_with("channel control\n"));
    assert!(text.contains("clients 1\n"));

    running.stop().await;
}

// ============================================================================
// Bind
// ============================================================================

#[tokio::test]
async fn test_bind_conflict_is_fatal() {
    let manager = Arc::new(OutputManager::new(Channel::Data, config()));
    let spec = ListenerSpec::new("127.0.0.1:0".parse().unwrap(), V5);
    let first = EventLoop::bind(Arc::clone(&manager), &[spec]).await.unwrap();
    let taken = ListenerSpec::new(first.local_addrs()[0], V5);

    let second = EventLoop::bind(manager, &[taken]).await;
    assert!(matches!(second, Err(OutputError::Bind { .. })));
}
