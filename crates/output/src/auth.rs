//! Session authentication and peer access control
//!
//! Authentication runs once per accepted connection, before the first
//! record is written. The engine only sees the `Authenticator` trait: it
//! hands over the raw stream and gets back a `SessionSecurity` that every
//! later payload passes through.
//!
//! Currently supported: `NoAuth`, `TokenAuthenticator`.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use ipnet::IpNet;
use subtle::ConstantTimeEq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{AuthError, OutputError};

/// Default time a peer has to complete negotiation
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest accepted handshake line
const MAX_AUTH_LINE: usize = 512;

/// Per-session transform applied to outgoing payloads
pub trait SessionSecurity: Send + fmt::Debug {
    /// Transform one payload before it is written
    fn wrap(&mut self, payload: &Bytes) -> Bytes;

    /// Mechanism name for logging
    fn mechanism(&self) -> &'static str;
}

/// No confidentiality or integrity layer
#[derive(Debug, Default, Clone, Copy)]
pub struct Plaintext;

impl SessionSecurity for Plaintext {
    #[inline]
    fn wrap(&mut self, payload: &Bytes) -> Bytes {
        payload.clone()
    }

    fn mechanism(&self) -> &'static str {
        "none"
    }
}

/// Authentication provider trait
///
/// Implement this trait to add new negotiation mechanisms.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Run the handshake on a freshly accepted stream
    ///
    /// Must not read past the end of the handshake; anything after it
    /// belongs to the command stream.
    async fn negotiate(&self, stream: &mut TcpStream)
    -> Result<Box<dyn SessionSecurity>, AuthError>;

    /// Provider name for logging
    fn name(&self) -> &'static str;

    /// Whether sessions must negotiate at all
    fn required(&self) -> bool {
        true
    }
}

/// Accept every peer without a handshake
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAuth;

#[async_trait]
impl Authenticator for NoAuth {
    async fn negotiate(
        &self,
        _stream: &mut TcpStream,
    ) -> Result<Box<dyn SessionSecurity>, AuthError> {
        Ok(Box::new(Plaintext))
    }

    fn name(&self) -> &'static str {
        "none"
    }

    fn required(&self) -> bool {
        false
    }
}

/// Shared-token handshake
///
/// The peer's first line must be `AUTH <token>`. The reply is `OK` or
/// `KO <reason>`, and the session closes on anything but a match.
pub struct TokenAuthenticator {
    token: Vec<u8>,
    timeout: Duration,
}

impl fmt::Debug for TokenAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenAuthenticator")
            .field("token", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl TokenAuthenticator {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into().into_bytes(),
            timeout: DEFAULT_AUTH_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Constant-time comparison against the configured token
    fn accepts(&self, presented: &str) -> bool {
        bool::from(presented.as_bytes().ct_eq(&self.token))
    }
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    async fn negotiate(
        &self,
        stream: &mut TcpStream,
    ) -> Result<Box<dyn SessionSecurity>, AuthError> {
        let line = tokio::time::timeout(self.timeout, read_line(stream))
            .await
            .map_err(|_| AuthError::Timeout)??;

        let verdict = match line.strip_prefix("AUTH ") {
            Some(presented) if self.accepts(presented.trim()) => Ok(()),
            Some(_) => Err("authentication failed"),
            None => Err("expected AUTH"),
        };

        match verdict {
            Ok(()) => {
                stream.write_all(b"OK\n").await?;
                Ok(Box::new(Plaintext))
            }
            Err(reason) => {
                let _ = stream.write_all(format!("KO {reason}\n").as_bytes()).await;
                debug!(reason, "token negotiation rejected");
                Err(AuthError::rejected(reason))
            }
        }
    }

    fn name(&self) -> &'static str {
        "token"
    }
}

/// Read one line byte by byte so nothing after it is consumed
async fn read_line(stream: &mut TcpStream) -> Result<String, AuthError> {
    let mut line = Vec::with_capacity(64);
    loop {
        let byte = match stream.read_u8().await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(AuthError::Closed);
            }
            Err(e) => return Err(e.into()),
        };
        match byte {
            b'\n' => break,
            b'\r' => {}
            b if line.len() < MAX_AUTH_LINE => line.push(b),
            _ => return Err(AuthError::rejected("handshake line too long")),
        }
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

/// Authenticator plus the loopback bypass
#[derive(Clone)]
pub struct AuthPolicy {
    authenticator: Arc<dyn Authenticator>,
    trust_loopback: bool,
}

impl AuthPolicy {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            authenticator,
            trust_loopback: false,
        }
    }

    /// Policy that never negotiates
    pub fn none() -> Self {
        Self::new(Arc::new(NoAuth))
    }

    /// Skip negotiation for loopback peers
    pub fn with_trust_loopback(mut self, trust: bool) -> Self {
        self.trust_loopback = trust;
        self
    }

    /// Whether a connection from `peer` must negotiate
    pub fn requires_negotiation(&self, peer: &SocketAddr) -> bool {
        if !self.authenticator.required() {
            return false;
        }
        !(self.trust_loopback && peer.ip().to_canonical().is_loopback())
    }

    #[inline]
    pub fn authenticator(&self) -> &Arc<dyn Authenticator> {
        &self.authenticator
    }
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Debug for AuthPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthPolicy")
            .field("authenticator", &self.authenticator.name())
            .field("trust_loopback", &self.trust_loopback)
            .finish()
    }
}

/// Peer allow-list checked at accept
///
/// An empty list admits everyone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessList {
    allow: Vec<IpNet>,
}

impl AccessList {
    /// Admit every peer
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Parse addresses and CIDR blocks
    pub fn parse<I, S>(entries: I) -> Result<Self, OutputError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allow = entries
            .into_iter()
            .map(|entry| {
                let entry = entry.as_ref().trim();
                entry
                    .parse::<IpNet>()
                    .or_else(|_| entry.parse::<IpAddr>().map(IpNet::from))
                    .map_err(|_| {
                        OutputError::InvalidConfig(format!("invalid access entry '{entry}'"))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { allow })
    }

    /// Check whether a peer address is admitted
    pub fn permits(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        self.allow.is_empty() || self.allow.iter().any(|net| net.contains(&ip))
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.allow.is_empty()
    }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
