//! Tests for authentication and access control

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use super::*;

/// Connect a client to a fresh loopback listener and return both ends
async fn pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).await.unwrap();
    let (server, _) = listener.accept().await.unwrap();
    (server, client)
}

async fn reply_line(client: &mut TcpStream) -> String {
    let mut line = String::new();
    BufReader::new(client).read_line(&mut line).await.unwrap();
    line
}

// ============================================================================
// Authenticators
// ============================================================================

#[tokio::test]
async fn test_no_auth_is_plaintext() {
    let (mut server, _client) = pair().await;
    let mut security = NoAuth.negotiate(&mut server).await.unwrap();
    assert_eq!(security.mechanism(), "none");

    let payload = Bytes::from_static(b"abc");
    assert_eq!(security.wrap(&payload), payload);
    assert!(!NoAuth.required());
}

#[tokio::test]
async fn test_token_accepts_matching_line() {
    let (mut server, mut client) = pair().await;
    let auth = TokenAuthenticator::new("s3cret");

    client.write_all(b"AUTH s3cret\r\nSTART:\n").await.unwrap();
    assert!(auth.negotiate(&mut server).await.is_ok());
    assert_eq!(reply_line(&mut client).await, "OK\n");

    // The command after the handshake is still unread
    let mut rest = [0u8; 7];
    server.read_exact(&mut rest).await.unwrap();
    assert_eq!(&rest, b"START:\n");
}

#[tokio::test]
async fn test_token_rejects_wrong_token() {
    let (mut server, mut client) = pair().await;
    let auth = TokenAuthenticator::new("s3cret");

    client.write_all(b"AUTH guess\n").await.unwrap();
    let err = auth.negotiate(&mut server).await.unwrap_err();
    assert!(matches!(err, AuthError::Rejected(_)));
    assert_eq!(reply_line(&mut client).await, "KO authentication failed\n");
}

#[tokio::test]
async fn test_token_rejects_missing_keyword() {
    let (mut server, mut client) = pair().await;
    client.write_all(b"START:\n").await.unwrap();
    let err = TokenAuthenticator::new("x")
        .negotiate(&mut server)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Rejected(reason) if reason == "expected AUTH"));
}

#[tokio::test]
async fn test_token_times_out() {
    let (mut server, _client) = pair().await;
    let auth = TokenAuthenticator::new("x").with_timeout(Duration::from_millis(50));
    assert!(matches!(
        auth.negotiate(&mut server).await,
        Err(AuthError::Timeout)
    ));
}

#[tokio::test]
async fn test_token_peer_closed() {
    let (mut server, client) = pair().await;
    drop(client);
    assert!(matches!(
        TokenAuthenticator::new("x").negotiate(&mut server).await,
        Err(AuthError::Closed)
    ));
}

// ============================================================================
// Policy
// ============================================================================

#[test]
fn test_policy_loopback_bypass() {
    let loopback: SocketAddr = "127.0.0.1:4000".parse().unwrap();
    let remote: SocketAddr = "192.0.2.9:4000".parse().unwrap();

    let strict = AuthPolicy::new(Arc::new(TokenAuthenticator::new("t")));
    assert!(strict.requires_negotiation(&loopback));
    assert!(strict.requires_negotiation(&remote));

    let trusting = strict.with_trust_loopback(true);
    assert!(!trusting.requires_negotiation(&loopback));
    assert!(trusting.requires_negotiation(&remote));

    assert!(!AuthPolicy::none().requires_negotiation(&remote));
}

#[test]
fn test_token_debug_redacts() {
    let debug = format!("{:?}", TokenAuthenticator::new("hunter2"));
    assert!(!debug.contains("hunter2"));
}

// ============================================================================
// Access list
// ============================================================================

#[test]
fn test_empty_access_list_permits_all() {
    let list = AccessList::allow_all();
    assert!(list.permits("203.0.113.1".parse().unwrap()));
}

#[test]
fn test_access_list_cidr_and_host() {
    let list = AccessList::parse(["10.0.0.0/8", "192.0.2.5", "2001:db8::/32"]).unwrap();
    assert!(list.permits("10.200.1.1".parse().unwrap()));
    assert!(list.permits("192.0.2.5".parse().unwrap()));
    assert!(!list.permits("192.0.2.6".parse().unwrap()));
    assert!(list.permits("2001:db8::1".parse().unwrap()));
    // IPv4-mapped peers are matched as IPv4
    assert!(list.permits("::ffff:10.1.2.3".parse().unwrap()));
}

#[test]
fn test_access_list_rejects_garbage() {
    assert!(AccessList::parse(["not-an-address"]).is_err());
}
