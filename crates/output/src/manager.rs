//! Per-channel engine context
//!
//! `OutputManager` owns everything the Event Loop and Dispatch Loop of one
//! logical channel share: the session set, the input queue, the buffer
//! pool, counters and the wake signal. There is no process-wide state; the
//! binary builds one manager per channel and hands out `Arc`s.
//!
//! # Shared state
//!
//! ```text
//! producer ──push()──→ input queue ──→ Dispatch Loop ──┐
//!                                           │           │ lock
//! Event Loop ──ClientEvent──────────────────┘           ▼
//!      ▲                                          SessionSet
//!      └──────────── wake (Notify) ─────────────────────┘
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use flowcast_protocol::wire::{MAR_CAUSE_START, MAR_CAUSE_STATUS};
use flowcast_protocol::{
    FlowRecord, MarRecord, RecordEncoder, SourceIdentity, Timestamp, WireFormat,
};

use crate::auth::{AccessList, AuthPolicy};
use crate::pool::{DEFAULT_SCRATCH_BUFFERS, WireBufferPool};
use crate::session::{ClientSession, OutputSink, SessionLimits, SessionState};
use crate::util::RateLimitedLogger;

/// Logical channel served by a manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Binary record stream
    Data,
    /// Line-oriented command protocol
    Control,
}

impl Channel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Control => "control",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "data" => Ok(Self::Data),
            "control" => Ok(Self::Control),
            other => Err(format!("unknown channel: {other}")),
        }
    }
}

/// Runtime settings for one channel
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Status record interval; zero disables them
    pub mar_interval: Duration,
    /// Sessions allowed at once, static outputs included
    pub max_clients: usize,
    pub limits: SessionLimits,
    /// Time a data client has to send `START:`
    pub startup_timeout: Duration,
    /// Event Loop bounded readiness wait
    pub scan_interval: Duration,
    /// Dispatch Loop bounded wait on an empty input queue
    pub idle_wait: Duration,
    /// Identity carried in status records
    pub source_id: SourceIdentity,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            mar_interval: Duration::from_secs(60),
            max_clients: 32,
            limits: SessionLimits::default(),
            startup_timeout: Duration::from_secs(5),
            scan_interval: Duration::from_millis(50),
            idle_wait: Duration::from_millis(20),
            source_id: SourceIdentity::default(),
        }
    }
}

impl OutputConfig {
    pub fn with_mar_interval(mut self, interval: Duration) -> Self {
        self.mar_interval = interval;
        self
    }

    pub fn with_max_clients(mut self, max: usize) -> Self {
        self.max_clients = max.max(1);
        self
    }

    pub fn with_limits(mut self, limits: SessionLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    pub fn with_idle_wait(mut self, wait: Duration) -> Self {
        self.idle_wait = wait;
        self
    }

    pub fn with_source_id(mut self, source_id: SourceIdentity) -> Self {
        self.source_id = source_id;
        self
    }
}

/// Something a client socket did, forwarded by the Event Loop
#[derive(Debug)]
pub enum ClientEvent {
    /// Bytes read from the client
    Input { id: u64, data: Bytes },
    /// EOF or read error
    Disconnected { id: u64 },
}

/// Active sessions of one channel, in accept order
#[derive(Debug, Default)]
pub struct SessionSet {
    sessions: Vec<ClientSession>,
}

impl SessionSet {
    pub fn insert(&mut self, session: ClientSession) {
        self.sessions.push(session);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.sessions.iter().any(|s| s.id() == id)
    }

    pub fn get(&self, id: u64) -> Option<&ClientSession> {
        self.sessions.iter().find(|s| s.id() == id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut ClientSession> {
        self.sessions.iter_mut().find(|s| s.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientSession> {
        self.sessions.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ClientSession> {
        self.sessions.iter_mut()
    }

    /// Unlink every `Closing` session, tear it down and return how many
    pub fn purge_closing(&mut self) -> usize {
        let mut removed = 0;
        self.sessions.retain_mut(|session| {
            if session.state() == SessionState::Closing {
                session.teardown();
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    /// Tear down and remove every session
    pub fn drain_all(&mut self) -> usize {
        let count = self.sessions.len();
        for mut session in self.sessions.drain(..) {
            session.teardown();
        }
        count
    }
}

#[derive(Debug, Default)]
struct Counters {
    /// Records taken off the input queue
    records: AtomicU64,
    /// Records since the last status record
    since_status: AtomicU64,
    /// Records pushed but not yet dequeued
    pending: AtomicU64,
    /// Buffers dropped by backpressure
    dropped: AtomicU64,
    /// Sessions accepted over the manager's life
    accepted: AtomicU64,
    /// Status records emitted
    status_seq: AtomicU32,
}

/// Point-in-time view of a channel
#[derive(Debug, Clone, PartialEq)]
pub struct OutputStats {
    pub channel: Channel,
    pub uptime: Duration,
    pub records: u64,
    pub records_since_status: u64,
    pub input_depth: u64,
    pub queued: u64,
    pub dropped: u64,
    pub clients: usize,
    pub accepted: u64,
    pub live_buffers: u64,
    pub live_bytes: u64,
    pub next_seq: u32,
}

impl OutputStats {
    /// One-line form, used by the control `MAR` command
    pub fn summary_line(&self) -> String {
        format!(
            "MAR seq {} records {} since {} input {} queued {} dropped {} clients {} buffers {} bytes {}",
            self.next_seq,
            self.records,
            self.records_since_status,
            self.input_depth,
            self.queued,
            self.dropped,
            self.clients,
            self.live_buffers,
            self.live_bytes,
        )
    }

    /// Multi-line report, used by the control `STATUS` command
    pub fn report_lines(&self) -> Vec<String> {
        vec![
            format!("channel {}", self.channel),
            format!("uptime {}s", self.uptime.as_secs()),
            format!("records {}", self.records),
            format!("records_since_status {}", self.records_since_status),
            format!("input_depth {}", self.input_depth),
            format!("queued {}", self.queued),
            format!("dropped {}", self.dropped),
            format!("clients {}", self.clients),
            format!("accepted {}", self.accepted),
            format!("live_buffers {}", self.live_buffers),
            format!("live_bytes {}", self.live_bytes),
            format!("next_seq {}", self.next_seq),
        ]
    }
}

fn saturate(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// Shared context of one logical channel
pub struct OutputManager {
    channel: Channel,
    config: OutputConfig,
    pool: WireBufferPool,
    sessions: Mutex<SessionSet>,
    input_tx: mpsc::UnboundedSender<FlowRecord>,
    input_rx: Mutex<Option<mpsc::UnboundedReceiver<FlowRecord>>>,
    events_tx: mpsc::UnboundedSender<ClientEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<ClientEvent>>>,
    wake: Notify,
    shutdown: CancellationToken,
    dispatch_done: CancellationToken,
    next_session_id: AtomicU64,
    counters: Counters,
    started: Instant,
    start_time: Timestamp,
    auth: AuthPolicy,
    access: AccessList,
    /// Manager whose stats the control commands report
    status_source: Option<Arc<OutputManager>>,
    drop_log: Arc<RateLimitedLogger>,
}

impl OutputManager {
    pub fn new(channel: Channel, config: OutputConfig) -> Self {
        let start_time = Timestamp::now();
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            channel,
            config,
            pool: WireBufferPool::new(DEFAULT_SCRATCH_BUFFERS, RecordEncoder::new(start_time)),
            sessions: Mutex::new(SessionSet::default()),
            input_tx,
            input_rx: Mutex::new(Some(input_rx)),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            wake: Notify::new(),
            shutdown: CancellationToken::new(),
            dispatch_done: CancellationToken::new(),
            next_session_id: AtomicU64::new(1),
            counters: Counters::default(),
            started: Instant::now(),
            start_time,
            auth: AuthPolicy::default(),
            access: AccessList::allow_all(),
            status_source: None,
            drop_log: Arc::new(RateLimitedLogger::default()),
        }
    }

    pub fn with_auth(mut self, auth: AuthPolicy) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_access(mut self, access: AccessList) -> Self {
        self.access = access;
        self
    }

    /// Report another channel's stats from `MAR` and `STATUS`
    pub fn with_status_source(mut self, source: Arc<OutputManager>) -> Self {
        self.status_source = Some(source);
        self
    }

    /// Use a different encoder, e.g. with NetFlow engine ids set
    pub fn with_encoder(mut self, encoder: RecordEncoder) -> Self {
        self.pool = WireBufferPool::new(DEFAULT_SCRATCH_BUFFERS, encoder);
        self
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    #[inline]
    pub fn channel(&self) -> Channel {
        self.channel
    }

    #[inline]
    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    #[inline]
    pub fn pool(&self) -> &WireBufferPool {
        &self.pool
    }

    #[inline]
    pub fn auth(&self) -> &AuthPolicy {
        &self.auth
    }

    #[inline]
    pub fn access(&self) -> &AccessList {
        &self.access
    }

    #[inline]
    pub fn sessions(&self) -> &Mutex<SessionSet> {
        &self.sessions
    }

    #[inline]
    pub fn drop_log(&self) -> &Arc<RateLimitedLogger> {
        &self.drop_log
    }

    pub fn client_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub(crate) fn next_session_id(&self) -> u64 {
        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    // ------------------------------------------------------------------
    // Input queue
    // ------------------------------------------------------------------

    /// Hand a record to the Dispatch Loop
    ///
    /// Never blocks. Returns false once the Dispatch Loop has stopped.
    pub fn push(&self, record: FlowRecord) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        // Counted before the send so a concurrent dequeue never sees it missing
        self.counters.pending.fetch_add(1, Ordering::Relaxed);
        if self.input_tx.send(record).is_err() {
            self.counters.pending.fetch_sub(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    pub(crate) fn take_input(&self) -> Option<mpsc::UnboundedReceiver<FlowRecord>> {
        self.input_rx.lock().take()
    }

    pub(crate) fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ClientEvent>> {
        self.events_rx.lock().take()
    }

    pub(crate) fn events(&self) -> mpsc::UnboundedSender<ClientEvent> {
        self.events_tx.clone()
    }

    pub(crate) fn records_dequeued(&self, count: usize) {
        let count = count as u64;
        self.counters.records.fetch_add(count, Ordering::Relaxed);
        self.counters.since_status.fetch_add(count, Ordering::Relaxed);
        self.counters.pending.fetch_sub(count, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self, count: usize) {
        self.counters.dropped.fetch_add(count as u64, Ordering::Relaxed);
    }

    // ------------------------------------------------------------------
    // Wake and shutdown
    // ------------------------------------------------------------------

    /// Tell the Event Loop that client input was processed
    #[inline]
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub(crate) async fn woken(&self) {
        self.wake.notified().await;
    }

    /// Ask the Dispatch Loop to flush and tear down every session
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!(channel = %self.channel, "output shutdown requested");
        }
        self.shutdown.cancel();
    }

    #[inline]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancelled once the Dispatch Loop has finished tearing down
    #[inline]
    pub fn dispatch_done(&self) -> CancellationToken {
        self.dispatch_done.clone()
    }

    pub(crate) fn mark_dispatch_done(&self) {
        self.dispatch_done.cancel();
    }

    // ------------------------------------------------------------------
    // Stats and status records
    // ------------------------------------------------------------------

    /// Stats of this channel; takes the session lock
    pub fn stats(&self) -> OutputStats {
        let sessions = self.sessions.lock();
        self.snapshot_with(&sessions)
    }

    /// Stats reported to control clients
    ///
    /// Must not be called with another manager's session lock held.
    pub fn reported_stats(&self, sessions: &SessionSet) -> OutputStats {
        match &self.status_source {
            Some(source) => source.stats(),
            None => self.snapshot_with(sessions),
        }
    }

    /// Stats computed from an already locked session set
    pub fn snapshot_with(&self, sessions: &SessionSet) -> OutputStats {
        let pool = self.pool.metrics().snapshot();
        OutputStats {
            channel: self.channel,
            uptime: self.started.elapsed(),
            records: self.counters.records.load(Ordering::Relaxed),
            records_since_status: self.counters.since_status.load(Ordering::Relaxed),
            input_depth: self.counters.pending.load(Ordering::Relaxed),
            queued: sessions.iter().map(|s| s.queue_depth() as u64).sum(),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            clients: sessions.len(),
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            live_buffers: pool.live_buffers,
            live_bytes: pool.live_bytes,
            next_seq: self.counters.status_seq.load(Ordering::Relaxed),
        }
    }

    /// Build a status record and advance the status sequence
    ///
    /// A `STATUS` cause also resets the records-since-status counter.
    pub fn status_record(&self, cause: u8, sessions: &SessionSet) -> FlowRecord {
        let stats = self.snapshot_with(sessions);
        let seq = self.counters.status_seq.fetch_add(1, Ordering::Relaxed);
        if cause == MAR_CAUSE_STATUS {
            self.counters.since_status.store(0, Ordering::Relaxed);
        }

        let interval = u16::try_from(self.config.mar_interval.as_secs()).unwrap_or(u16::MAX);
        let mar = MarRecord {
            status: u32::from(cause),
            source: self.config.source_id,
            next_seq: seq.wrapping_add(1),
            start_time: self.start_time,
            now: Timestamp::now(),
            major_version: env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0),
            minor_version: env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
            report_interval: interval,
            status_interval: interval,
            records: saturate(stats.records_since_status),
            flows: saturate(stats.records),
            dropped: saturate(stats.dropped),
            queue: saturate(stats.input_depth),
            output: saturate(stats.queued),
            clients: saturate(stats.clients as u64),
            bufs: saturate(stats.live_buffers),
            bytes: saturate(stats.live_bytes),
            ..MarRecord::default()
        };
        FlowRecord::management(cause, mar)
    }

    // ------------------------------------------------------------------
    // Static outputs
    // ------------------------------------------------------------------

    /// Add an output that streams without a client handshake
    ///
    /// With `initial_mar`, a START status record is queued first. Returns
    /// the session id.
    pub fn attach(
        &self,
        sink: Box<dyn OutputSink>,
        format: WireFormat,
        label: impl Into<String>,
        initial_mar: bool,
    ) -> u64 {
        let id = self.next_session_id();
        let mut session = ClientSession::new(id, sink, format, self.config.limits)
            .with_label(label)
            .with_drop_logger(Arc::clone(&self.drop_log))
            .without_start();
        session.activate();

        let mut sessions = self.sessions.lock();
        if initial_mar {
            self.queue_start_record(&mut session, &sessions);
        }
        info!(session_id = id, output = %session.label(), format = %format, "static output attached");
        sessions.insert(session);
        id
    }

    /// Queue the START status record a new session receives first
    pub(crate) fn queue_start_record(&self, session: &mut ClientSession, sessions: &SessionSet) {
        let record = self.status_record(MAR_CAUSE_START, sessions);
        match self.pool.acquire(&record, session.format()) {
            Ok(buffer) => {
                session.enqueue(buffer);
            }
            Err(e) if e.is_fatal() => {
                warn!(session_id = session.id(), error = %e, "start record failed to encode");
            }
            Err(e) => {
                debug!(session_id = session.id(), format = %session.format(), error = %e, "no start record for format");
            }
        }
    }
}

impl fmt::Debug for OutputManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputManager")
            .field("channel", &self.channel)
            .field("config", &self.config)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "manager_test.rs"]
mod tests;
