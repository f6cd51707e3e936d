//! Client session state machine
//!
//! A `ClientSession` owns one consumer's transport, its queue of shared
//! wire buffers, the in-flight write cursor and the command ring.
//!
//! # States
//!
//! ```text
//! Connecting ──→ Authenticating ──→ Streaming ⇄ Backpressured
//!      │               │                │             │
//!      └───────────────┴────────────────┴─────────────┴──→ Closing ──→ Closed
//! ```
//!
//! - Queue depth over `max_queue_depth` drops the oldest queued buffers
//!   and enters `Backpressured`; depth under `resume_queue_depth` returns
//!   to `Streaming`.
//! - A buffer that is partially written is never dropped.
//! - `Closing` sessions take no new buffers; `teardown` releases what is
//!   left and moves to `Closed`.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::net::tcp::OwnedWriteHalf;
use tracing::{debug, info, trace};

use flowcast_protocol::WireFormat;

use crate::auth::{Plaintext, SessionSecurity};
use crate::control::ControlState;
use crate::filter::RecordFilter;
use crate::pool::WireBuffer;
use crate::ring::RingCommandBuffer;
use crate::util::RateLimitedLogger;

/// Non-blocking byte sink behind a session
pub trait OutputSink: Send {
    /// Write as much of `buf` as the transport accepts right now
    ///
    /// `WouldBlock` means try again next cycle.
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Transport name for logging
    fn kind(&self) -> &'static str;
}

impl OutputSink for OwnedWriteHalf {
    #[inline]
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        OwnedWriteHalf::try_write(self, buf)
    }

    fn kind(&self) -> &'static str {
        "tcp"
    }
}

/// Stands in for a transport after teardown
struct ClosedSink;

impl OutputSink for ClosedSink {
    fn try_write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::ErrorKind::NotConnected.into())
    }

    fn kind(&self) -> &'static str {
        "closed"
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Authenticating = 1,
    Streaming = 2,
    Backpressured = 3,
    Closing = 4,
    Closed = 5,
}

impl SessionState {
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Connecting),
            1 => Some(Self::Authenticating),
            2 => Some(Self::Streaming),
            3 => Some(Self::Backpressured),
            4 => Some(Self::Closing),
            5 => Some(Self::Closed),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Streaming => "streaming",
            Self::Backpressured => "backpressured",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }

    /// Not yet closing
    #[inline]
    pub const fn is_open(self) -> bool {
        !matches!(self, Self::Closing | Self::Closed)
    }

    /// Queued buffers may be written
    #[inline]
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::Streaming | Self::Backpressured | Self::Closing)
    }

    /// Whether `self → to` is a legal transition
    pub const fn can_transition(self, to: Self) -> bool {
        use SessionState::*;
        matches!(
            (self, to),
            (Connecting, Authenticating)
                | (Connecting, Streaming)
                | (Connecting, Closing)
                | (Authenticating, Streaming)
                | (Authenticating, Closing)
                | (Streaming, Backpressured)
                | (Streaming, Closing)
                | (Backpressured, Streaming)
                | (Backpressured, Closing)
                | (Closing, Closed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session left the open states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// Client sent `DONE:`
    PeerDone,
    /// Client socket reached EOF or failed on read
    PeerClosed,
    /// Write failed with a terminal error
    WriteError,
    /// Transport accepted zero bytes
    ZeroWrite,
    /// Too many consecutive would-block writes
    TooManyErrors,
    /// No `START:` within the startup timeout
    StartupTimeout,
    /// Negotiation failed
    AuthFailed,
    /// Data-channel `FILTER:` did not compile
    BadFilter,
    /// Engine shutdown
    Shutdown,
}

impl CloseReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PeerDone => "peer_done",
            Self::PeerClosed => "peer_closed",
            Self::WriteError => "write_error",
            Self::ZeroWrite => "zero_write",
            Self::TooManyErrors => "too_many_errors",
            Self::StartupTimeout => "startup_timeout",
            Self::AuthFailed => "auth_failed",
            Self::BadFilter => "bad_filter",
            Self::Shutdown => "shutdown",
        }
    }

    /// Whether the transport is still usable for a final flush
    pub const fn allows_flush(self) -> bool {
        matches!(self, Self::PeerDone | Self::StartupTimeout | Self::Shutdown)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-session queue and write limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    /// Queue depth that triggers backpressure drops
    pub max_queue_depth: usize,
    /// Depth below which a backpressured session resumes
    pub resume_queue_depth: usize,
    /// Oldest buffers dropped per overflow
    pub drop_batch: usize,
    /// Write attempts per dispatch cycle
    pub max_writes_per_cycle: usize,
    /// Consecutive would-block writes before the session is closed
    pub max_consecutive_errors: u32,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_queue_depth: 10_000,
            resume_queue_depth: 5_000,
            drop_batch: 128,
            max_writes_per_cycle: 64,
            max_consecutive_errors: 10_000,
        }
    }
}

impl SessionLimits {
    pub fn with_queue_depth(mut self, max: usize, resume: usize) -> Self {
        self.max_queue_depth = max.max(1);
        self.resume_queue_depth = resume.min(self.max_queue_depth);
        self
    }

    pub fn with_drop_batch(mut self, batch: usize) -> Self {
        self.drop_batch = batch.max(1);
        self
    }

    pub fn with_max_writes_per_cycle(mut self, writes: usize) -> Self {
        self.max_writes_per_cycle = writes.max(1);
        self
    }

    pub fn with_max_consecutive_errors(mut self, errors: u32) -> Self {
        self.max_consecutive_errors = errors.max(1);
        self
    }
}

/// Outcome of one `write_pending` pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// Buffers completely written and released
    pub completed: usize,
    /// Bytes accepted by the transport
    pub bytes: usize,
    /// Stopped on would-block
    pub blocked: bool,
}

struct InFlight {
    /// Held so the shared buffer stays alive until fully written
    _buffer: WireBuffer,
    /// Bytes after the security wrap
    payload: Bytes,
    sent: usize,
}

enum Step {
    Completed,
    Partial,
    Retry,
    Blocked,
    Close(CloseReason),
}

/// One connected consumer or static output
pub struct ClientSession {
    id: u64,
    peer: Option<SocketAddr>,
    label: String,
    format: WireFormat,
    state: SessionState,
    sink: Box<dyn OutputSink>,
    security: Box<dyn SessionSecurity>,
    queue: VecDeque<WireBuffer>,
    in_flight: Option<InFlight>,
    commands: RingCommandBuffer,
    control: ControlState,
    filter: Option<RecordFilter>,
    requires_start: bool,
    started: bool,
    accepted_at: Instant,
    error_count: u32,
    dropped: u64,
    limits: SessionLimits,
    close_reason: Option<CloseReason>,
    drop_log: Arc<RateLimitedLogger>,
}

impl ClientSession {
    /// Create a session in `Connecting`
    ///
    /// New sessions must receive `START:` before records are queued; see
    /// `without_start` for static outputs and the control channel.
    pub fn new(id: u64, sink: Box<dyn OutputSink>, format: WireFormat, limits: SessionLimits) -> Self {
        let label = format!("{}#{id}", sink.kind());
        Self {
            id,
            peer: None,
            label,
            format,
            state: SessionState::Connecting,
            sink,
            security: Box::new(Plaintext),
            queue: VecDeque::new(),
            in_flight: None,
            commands: RingCommandBuffer::new(),
            control: ControlState::default(),
            filter: None,
            requires_start: true,
            started: false,
            accepted_at: Instant::now(),
            error_count: 0,
            dropped: 0,
            limits,
            close_reason: None,
            drop_log: Arc::new(RateLimitedLogger::default()),
        }
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self.label = peer.to_string();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Stream immediately, without waiting for `START:`
    pub fn without_start(mut self) -> Self {
        self.requires_start = false;
        self.started = true;
        self
    }

    /// Share one backpressure logger across sessions
    pub fn with_drop_logger(mut self, logger: Arc<RateLimitedLogger>) -> Self {
        self.drop_log = logger;
        self
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[inline]
    pub fn format(&self) -> WireFormat {
        self.format
    }

    #[inline]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Buffers waiting, not counting a partially written one
    #[inline]
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn has_pending_writes(&self) -> bool {
        self.in_flight.is_some() || !self.queue.is_empty()
    }

    /// Buffers dropped by backpressure over the session's life
    #[inline]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    #[inline]
    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    #[inline]
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    #[inline]
    pub fn filter(&self) -> Option<&RecordFilter> {
        self.filter.as_ref()
    }

    pub fn set_filter(&mut self, filter: Option<RecordFilter>) {
        self.filter = filter;
    }

    #[inline]
    pub fn control(&self) -> &ControlState {
        &self.control
    }

    #[inline]
    pub fn control_mut(&mut self) -> &mut ControlState {
        &mut self.control
    }

    #[inline]
    pub fn commands_mut(&mut self) -> &mut RingCommandBuffer {
        &mut self.commands
    }

    /// Oldest buffer in the queue
    #[inline]
    pub fn front(&self) -> Option<&WireBuffer> {
        self.queue.front()
    }

    /// Whether flow records should be queued to this session
    #[inline]
    pub fn accepts_records(&self) -> bool {
        self.started && matches!(self.state, SessionState::Streaming | SessionState::Backpressured)
    }

    /// Whether the session has waited longer than `timeout` for `START:`
    pub fn startup_expired(&self, timeout: Duration, now: Instant) -> bool {
        self.requires_start
            && !self.started
            && self.state.is_open()
            && now.saturating_duration_since(self.accepted_at) >= timeout
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    fn transition(&mut self, to: SessionState) -> bool {
        if !self.state.can_transition(to) {
            trace!(session_id = self.id, from = %self.state, to = %to, "ignored state transition");
            return false;
        }
        debug!(session_id = self.id, from = %self.state, to = %to, "session state");
        self.state = to;
        true
    }

    /// `Connecting → Authenticating`
    pub fn begin_authentication(&mut self) -> bool {
        self.transition(SessionState::Authenticating)
    }

    /// `Authenticating → Streaming` with the negotiated security layer
    pub fn authenticated(&mut self, security: Box<dyn SessionSecurity>) -> bool {
        if self.state != SessionState::Authenticating {
            return false;
        }
        debug!(session_id = self.id, mechanism = security.mechanism(), "session authenticated");
        self.security = security;
        self.transition(SessionState::Streaming)
    }

    /// `Connecting → Streaming` when no negotiation is configured
    pub fn activate(&mut self) -> bool {
        self.transition(SessionState::Streaming)
    }

    /// Client acknowledged with `START:`
    pub fn start(&mut self) {
        if !self.started {
            debug!(session_id = self.id, "session started");
        }
        self.started = true;
    }

    /// Enter `Closing`; the first reason wins
    pub fn close(&mut self, reason: CloseReason) {
        if !self.state.is_open() {
            return;
        }
        self.close_reason = Some(reason);
        self.transition(SessionState::Closing);
    }

    // ------------------------------------------------------------------
    // Queue
    // ------------------------------------------------------------------

    /// Queue a shared buffer, dropping the oldest ones on overflow
    ///
    /// Returns the number of buffers dropped.
    pub fn enqueue(&mut self, buffer: WireBuffer) -> usize {
        if !self.state.is_open() {
            return 0;
        }
        self.queue.push_back(buffer);

        let depth = self.queue.len();
        if depth <= self.limits.max_queue_depth {
            return 0;
        }

        // Keep at least the buffer just queued
        let excess = depth - self.limits.max_queue_depth;
        let count = excess.max(self.limits.drop_batch).min(depth - 1);
        self.queue.drain(..count);
        self.dropped += count as u64;

        if self.state == SessionState::Streaming {
            self.transition(SessionState::Backpressured);
        }
        self.drop_log.warn(
            "slow consumer, dropped oldest queued buffers",
            &format_args!("session {} dropped {count}, depth {}", self.label, self.queue.len()),
        );
        count
    }

    /// Write queued buffers, at most `max_writes_per_cycle` attempts
    pub fn write_pending(&mut self) -> WriteReport {
        let mut report = WriteReport::default();
        if !self.state.is_writable() {
            return report;
        }

        for _ in 0..self.limits.max_writes_per_cycle {
            if self.in_flight.is_none() {
                let Some(buffer) = self.queue.pop_front() else {
                    break;
                };
                let payload = self.security.wrap(buffer.bytes());
                self.in_flight = Some(InFlight {
                    _buffer: buffer,
                    payload,
                    sent: 0,
                });
            }

            let step = {
                let Some(flight) = self.in_flight.as_mut() else {
                    break;
                };
                if flight.sent >= flight.payload.len() {
                    Step::Completed
                } else {
                    match self.sink.try_write(&flight.payload[flight.sent..]) {
                        Ok(0) => Step::Close(CloseReason::ZeroWrite),
                        Ok(n) => {
                            flight.sent += n;
                            report.bytes += n;
                            if flight.sent >= flight.payload.len() {
                                Step::Completed
                            } else {
                                Step::Partial
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Step::Blocked,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => Step::Retry,
                        Err(e) => {
                            debug!(session_id = self.id, error = %e, "write failed");
                            Step::Close(CloseReason::WriteError)
                        }
                    }
                }
            };

            match step {
                Step::Completed => {
                    self.in_flight = None;
                    self.error_count = 0;
                    report.completed += 1;
                }
                Step::Partial => self.error_count = 0,
                Step::Retry => {}
                Step::Blocked => {
                    self.error_count += 1;
                    report.blocked = true;
                    if self.error_count >= self.limits.max_consecutive_errors {
                        self.close(CloseReason::TooManyErrors);
                    }
                    break;
                }
                Step::Close(reason) => {
                    self.close(reason);
                    break;
                }
            }
        }

        if self.state == SessionState::Backpressured
            && self.queue.len() < self.limits.resume_queue_depth
        {
            self.transition(SessionState::Streaming);
        }
        report
    }

    /// `Closing → Closed`: final flush, release buffers, drop the transport
    ///
    /// A session still open is closed with `Shutdown` first. Returns the
    /// number of buffers released unwritten.
    pub fn teardown(&mut self) -> usize {
        if self.state == SessionState::Closed {
            return 0;
        }
        self.close(CloseReason::Shutdown);

        if self.close_reason.is_some_and(CloseReason::allows_flush) {
            self.write_pending();
        }

        let released = self.queue.len() + usize::from(self.in_flight.is_some());
        self.queue.clear();
        self.in_flight = None;
        self.sink = Box::new(ClosedSink);
        self.transition(SessionState::Closed);

        info!(
            session_id = self.id,
            peer = %self.label,
            reason = %self.close_reason.unwrap_or(CloseReason::Shutdown),
            dropped = self.dropped,
            released,
            "session closed"
        );
        released
    }
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("format", &self.format)
            .field("state", &self.state)
            .field("queue", &self.queue.len())
            .field("started", &self.started)
            .finish()
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
