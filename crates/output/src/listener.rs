//! Event Loop
//!
//! One instance per channel. Waits on every listening socket, every session
//! socket and the manager's wake signal, with a bounded timeout so the
//! reader set is re-scanned even when nothing happens.
//!
//! - Accept: access list, client limit, socket options, then either direct
//!   registration or a negotiation task that registers back when done.
//! - Client readable: bytes are forwarded to the Dispatch Loop and the
//!   socket is not read again until the Dispatch Loop wakes us.
//! - Wake or timeout: readers of sessions the Dispatch Loop removed are
//!   dropped.
//!
//! No encoding or filtering happens here.

use std::future::poll_fn;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use flowcast_protocol::wire::MAR_ERROR_MAXLISTENEXCD;
use flowcast_protocol::{WireFormat, WireVersion, encode_mar_error};

use crate::auth::SessionSecurity;
use crate::control::Reply;
use crate::error::{OutputError, Result};
use crate::manager::{Channel, ClientEvent, OutputManager};
use crate::session::{ClientSession, CloseReason};

/// Bytes read from a client socket at once
const READ_CHUNK: usize = 4096;

/// Keep-alive idle time on accepted and outbound TCP sockets
pub const TCP_KEEPALIVE: Duration = Duration::from_secs(60);

/// One listening socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerSpec {
    pub address: SocketAddr,
    /// Format sessions accepted here receive
    pub format: WireFormat,
}

impl ListenerSpec {
    pub fn new(address: SocketAddr, format: WireFormat) -> Self {
        Self { address, format }
    }
}

/// A client that finished accept (and negotiation, if any)
struct Registration {
    stream: TcpStream,
    peer: SocketAddr,
    format: WireFormat,
    security: Option<Box<dyn SessionSecurity>>,
}

struct Reader {
    id: u64,
    half: OwnedReadHalf,
    /// Input forwarded, Dispatch Loop has not woken us yet
    awaiting: bool,
}

enum Wake {
    Notified,
    Scan,
    Registered(Registration),
    Accepted(usize, io::Result<(TcpStream, SocketAddr)>),
    Read(u64, io::Result<usize>),
    Stop,
}

/// Readiness multiplexer for one channel
pub struct EventLoop {
    manager: Arc<OutputManager>,
    listeners: Vec<(TcpListener, WireFormat)>,
    readers: Vec<Reader>,
    read_buf: Box<[u8]>,
    events: mpsc::UnboundedSender<ClientEvent>,
    registrations_tx: mpsc::UnboundedSender<Registration>,
    registrations_rx: mpsc::UnboundedReceiver<Registration>,
    /// Negotiations in progress, counted against `max_clients`
    handshakes: Arc<AtomicUsize>,
}

impl EventLoop {
    /// Bind every listener; any failure is fatal
    pub async fn bind(manager: Arc<OutputManager>, specs: &[ListenerSpec]) -> Result<Self> {
        let mut listeners = Vec::with_capacity(specs.len());
        for spec in specs {
            let listener = TcpListener::bind(spec.address)
                .await
                .map_err(|e| OutputError::bind(spec.address, e))?;
            info!(
                channel = %manager.channel(),
                address = %listener.local_addr()?,
                format = %spec.format,
                "listening"
            );
            listeners.push((listener, spec.format));
        }

        let (registrations_tx, registrations_rx) = mpsc::unbounded_channel();
        Ok(Self {
            events: manager.events(),
            manager,
            listeners,
            readers: Vec::new(),
            read_buf: vec![0u8; READ_CHUNK].into_boxed_slice(),
            registrations_tx,
            registrations_rx,
            handshakes: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Bound addresses, in listener order
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|(listener, _)| listener.local_addr().ok())
            .collect()
    }

    /// Run until the Dispatch Loop reports it is done
    pub async fn run(mut self) {
        let done = self.manager.dispatch_done();
        let scan_interval = self.manager.config().scan_interval;
        let manager = Arc::clone(&self.manager);

        loop {
            let wake = tokio::select! {
                biased;
                _ = done.cancelled() => Wake::Stop,
                _ = manager.woken() => Wake::Notified,
                Some(registration) = self.registrations_rx.recv() => Wake::Registered(registration),
                (index, accepted) = poll_fn(|cx| poll_accept_any(&self.listeners, cx)) => {
                    Wake::Accepted(index, accepted)
                }
                (id, read) = poll_fn(|cx| poll_read_any(&mut self.readers, &mut self.read_buf, cx)) => {
                    Wake::Read(id, read)
                }
                _ = tokio::time::sleep(scan_interval) => Wake::Scan,
            };

            match wake {
                Wake::Stop => break,
                Wake::Notified | Wake::Scan => self.rescan(),
                Wake::Registered(registration) => self.register(registration),
                Wake::Accepted(index, Ok((stream, peer))) => {
                    let format = self.listeners[index].1;
                    self.accept(stream, peer, format);
                }
                Wake::Accepted(_, Err(e)) => warn!(error = %e, "accept failed"),
                Wake::Read(id, Ok(n)) if n > 0 => {
                    let data = Bytes::copy_from_slice(&self.read_buf[..n]);
                    if let Some(reader) = self.readers.iter_mut().find(|r| r.id == id) {
                        reader.awaiting = true;
                    }
                    let _ = self.events.send(ClientEvent::Input { id, data });
                }
                Wake::Read(id, result) => {
                    if let Err(e) = result {
                        debug!(session_id = id, error = %e, "client read failed");
                    }
                    self.readers.retain(|r| r.id != id);
                    let _ = self.events.send(ClientEvent::Disconnected { id });
                }
            }
        }

        info!(channel = %self.manager.channel(), "event loop stopped");
    }

    /// Resume reading and drop readers of removed sessions
    fn rescan(&mut self) {
        let sessions = self.manager.sessions().lock();
        self.readers.retain(|r| sessions.contains(r.id));
        drop(sessions);
        for reader in &mut self.readers {
            reader.awaiting = false;
        }
    }

    fn accept(&mut self, stream: TcpStream, peer: SocketAddr, format: WireFormat) {
        if !self.manager.access().permits(peer.ip()) {
            info!(peer = %peer, "peer not in access list, connection dropped");
            return;
        }

        let active = self.manager.client_count() + self.handshakes.load(Ordering::Relaxed);
        let max = self.manager.config().max_clients;
        if active >= max {
            warn!(peer = %peer, max, "maximum clients reached, connection refused");
            self.refuse(&stream, format);
            return;
        }

        tune_stream(&stream, &peer);

        if !self.manager.auth().requires_negotiation(&peer) {
            self.register(Registration {
                stream,
                peer,
                format,
                security: None,
            });
            return;
        }

        let authenticator = Arc::clone(self.manager.auth().authenticator());
        let registrations = self.registrations_tx.clone();
        let handshakes = Arc::clone(&self.handshakes);
        handshakes.fetch_add(1, Ordering::Relaxed);
        debug!(peer = %peer, authenticator = authenticator.name(), "negotiating");

        tokio::spawn(async move {
            let mut stream = stream;
            let result = authenticator.negotiate(&mut stream).await;
            handshakes.fetch_sub(1, Ordering::Relaxed);
            match result {
                Ok(security) => {
                    let _ = registrations.send(Registration {
                        stream,
                        peer,
                        format,
                        security: Some(security),
                    });
                }
                Err(e) => {
                    info!(peer = %peer, reason = %CloseReason::AuthFailed, error = %e, "session closed");
                }
            }
        });
    }

    /// Tell a refused client why, then drop the socket
    fn refuse(&self, stream: &TcpStream, format: WireFormat) {
        let payload = match self.manager.channel() {
            Channel::Control => Reply::ko("maximum clients reached").encode(),
            Channel::Data => {
                let version = match format {
                    WireFormat::Native(version) => version,
                    WireFormat::NetflowV5 => WireVersion::V5,
                };
                let mut out = BytesMut::new();
                encode_mar_error(version, MAR_ERROR_MAXLISTENEXCD, &mut out);
                out.freeze()
            }
        };
        if let Err(e) = stream.try_write(&payload) {
            debug!(error = %e, "refusal not delivered");
        }
    }

    fn register(&mut self, registration: Registration) {
        let Registration {
            stream,
            peer,
            format,
            security,
        } = registration;
        let manager = Arc::clone(&self.manager);
        let channel = manager.channel();
        let id = manager.next_session_id();
        let (read, write) = stream.into_split();

        let mut session = ClientSession::new(id, Box::new(write), format, manager.config().limits)
            .with_peer(peer)
            .with_drop_logger(Arc::clone(manager.drop_log()));
        if channel == Channel::Control {
            session = session.without_start();
        }
        match security {
            Some(security) => {
                session.begin_authentication();
                session.authenticated(security);
            }
            None => {
                session.activate();
            }
        }

        let mut sessions = manager.sessions().lock();
        if channel == Channel::Data {
            manager.queue_start_record(&mut session, &sessions);
        }
        sessions.insert(session);
        drop(sessions);

        self.readers.push(Reader {
            id,
            half: read,
            awaiting: false,
        });
        info!(session_id = id, peer = %peer, channel = %channel, format = %format, "client connected");
    }
}

/// Disable Nagle and enable keep-alive; failures are logged and ignored
pub(crate) fn tune_stream(stream: &TcpStream, peer: &SocketAddr) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer = %peer, error = %e, "failed to set TCP_NODELAY");
    }

    let keepalive = TcpKeepalive::new().with_time(TCP_KEEPALIVE);
    #[cfg(target_os = "linux")]
    let keepalive = keepalive.with_interval(TCP_KEEPALIVE);

    if let Err(e) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
        debug!(peer = %peer, error = %e, "failed to set TCP keep-alive");
    }
}

fn poll_accept_any(
    listeners: &[(TcpListener, WireFormat)],
    cx: &mut Context<'_>,
) -> Poll<(usize, io::Result<(TcpStream, SocketAddr)>)> {
    for (index, (listener, _)) in listeners.iter().enumerate() {
        if let Poll::Ready(result) = listener.poll_accept(cx) {
            return Poll::Ready((index, result));
        }
    }
    Poll::Pending
}

/// Poll every reader not waiting on the Dispatch Loop
fn poll_read_any(
    readers: &mut [Reader],
    buf: &mut [u8],
    cx: &mut Context<'_>,
) -> Poll<(u64, io::Result<usize>)> {
    for reader in readers.iter_mut().filter(|r| !r.awaiting) {
        let mut read_buf = ReadBuf::new(buf);
        match Pin::new(&mut reader.half).poll_read(cx, &mut read_buf) {
            Poll::Ready(Ok(())) => {
                trace!(session_id = reader.id, bytes = read_buf.filled().len(), "client readable");
                return Poll::Ready((reader.id, Ok(read_buf.filled().len())));
            }
            Poll::Ready(Err(e)) => return Poll::Ready((reader.id, Err(e))),
            Poll::Pending => {}
        }
    }
    Poll::Pending
}

#[cfg(test)]
#[path = "listener_test.rs"]
mod tests;
