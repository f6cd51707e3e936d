//! Dispatch Loop
//!
//! Moves records from the input queue to every session's output queue and
//! drives the outbound writes. One instance per channel.
//!
//! # Cycle
//!
//! 1. Drain pending input records.
//! 2. Per record, encode at most once per wire format in use.
//! 3. Per session, apply the filter and queue a shared reference.
//! 4. Write up to `max_writes_per_cycle` buffers per session.
//! 5. Emit a status record when `mar_interval` has elapsed.
//! 6. Unlink and tear down `Closing` sessions.
//!
//! Client input forwarded by the Event Loop is handled between cycles; the
//! Event Loop is woken afterwards.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use flowcast_protocol::wire::{MAR_CAUSE_STATUS, MAR_CAUSE_STOP};
use flowcast_protocol::{EncodeError, FlowRecord, RecordKind, WireFormat};

use crate::control::{self, Command};
use crate::error::{OutputError, Result};
use crate::manager::{Channel, ClientEvent, OutputManager, SessionSet};
use crate::pool::WireBuffer;
use crate::session::{ClientSession, CloseReason};
use crate::util::RateLimitedLogger;

/// Input records taken per wakeup
pub const INPUT_BATCH: usize = 256;

/// Input records handled per cycle before writes are driven
pub const MAX_RECORDS_PER_CYCLE: usize = 4096;

/// Buffers built for one record, indexed by `WireFormat::index`
///
/// `None` means not built yet; `Some(None)` means the format cannot carry
/// the record.
type FormatCache = [Option<Option<WireBuffer>>; 3];

/// What one cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub records: usize,
    pub enqueued: usize,
    pub dropped: usize,
    pub written: usize,
    pub closed: usize,
}

/// Record fan-out and write driver for one channel
pub struct DispatchLoop {
    manager: Arc<OutputManager>,
    input: mpsc::UnboundedReceiver<FlowRecord>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    pending: Vec<FlowRecord>,
    last_status: Instant,
    encode_log: RateLimitedLogger,
}

impl DispatchLoop {
    /// Take the manager's input and event queues
    ///
    /// Fails if a Dispatch Loop already runs for this manager.
    pub fn new(manager: Arc<OutputManager>) -> Result<Self> {
        let input = manager
            .take_input()
            .ok_or_else(|| OutputError::Fatal("dispatch loop already running".into()))?;
        let events = manager
            .take_events()
            .ok_or_else(|| OutputError::Fatal("dispatch loop already running".into()))?;
        Ok(Self {
            manager,
            input,
            events,
            pending: Vec::with_capacity(INPUT_BATCH),
            last_status: Instant::now(),
            encode_log: RateLimitedLogger::default(),
        })
    }

    /// Run until shutdown or a fatal encoder error
    ///
    /// Every session is flushed and torn down before this returns, and the
    /// manager's `dispatch_done` token is cancelled last.
    pub async fn run(mut self) -> Result<()> {
        let shutdown = self.manager.shutdown_token();
        let idle_wait = self.manager.config().idle_wait;
        let mut input_open = true;
        info!(channel = %self.manager.channel(), "dispatch loop started");

        let result = loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break Ok(()),
                Some(event) = self.events.recv() => {
                    self.handle_event(event);
                    self.process_events();
                }
                received = self.input.recv_many(&mut self.pending, INPUT_BATCH), if input_open => {
                    if received == 0 {
                        input_open = false;
                    }
                }
                _ = tokio::time::sleep(idle_wait) => {}
            }

            if let Err(e) = self.cycle() {
                break Err(e);
            }
        };

        // push() refuses from here on; distribute what was already queued
        shutdown.cancel();
        let result = result.and_then(|()| self.cycle().map(|_| ()));
        self.finish();
        self.manager.mark_dispatch_done();
        info!(channel = %self.manager.channel(), "dispatch loop stopped");
        result
    }

    /// One pass over input, writes, status and purge
    pub fn cycle(&mut self) -> Result<CycleReport> {
        while self.pending.len() < MAX_RECORDS_PER_CYCLE {
            match self.input.try_recv() {
                Ok(record) => self.pending.push(record),
                Err(_) => break,
            }
        }

        let manager = Arc::clone(&self.manager);
        let mut sessions = manager.sessions().lock();
        let mut report = CycleReport::default();

        let records = std::mem::take(&mut self.pending);
        manager.records_dequeued(records.len());
        report.records = records.len();
        for record in &records {
            let (enqueued, dropped) = self.distribute(&mut sessions, record)?;
            report.enqueued += enqueued;
            report.dropped += dropped;
        }
        self.pending = records;
        self.pending.clear();

        let interval = manager.config().mar_interval;
        if manager.channel() == Channel::Data
            && !interval.is_zero()
            && self.last_status.elapsed() >= interval
        {
            self.last_status = Instant::now();
            let status = manager.status_record(MAR_CAUSE_STATUS, &sessions);
            let (enqueued, dropped) = self.distribute(&mut sessions, &status)?;
            report.enqueued += enqueued;
            report.dropped += dropped;
            trace!(channel = %manager.channel(), sessions = enqueued, "status record queued");
        }

        let now = Instant::now();
        let startup_timeout = manager.config().startup_timeout;
        for session in sessions.iter_mut() {
            if session.startup_expired(startup_timeout, now) {
                debug!(session_id = session.id(), "no START within startup timeout");
                session.close(CloseReason::StartupTimeout);
            }
        }

        for session in sessions.iter_mut() {
            report.written += session.write_pending().completed;
        }

        report.closed = sessions.purge_closing();
        if report.dropped > 0 {
            manager.record_dropped(report.dropped);
        }
        Ok(report)
    }

    /// Queue one record to every interested session
    ///
    /// Returns (sessions enqueued, buffers dropped by backpressure).
    fn distribute(
        &self,
        sessions: &mut SessionSet,
        record: &FlowRecord,
    ) -> Result<(usize, usize)> {
        let mut built: FormatCache = Default::default();
        let mut enqueued = 0;
        let mut dropped = 0;

        for session in sessions.iter_mut() {
            if !session.accepts_records() || !passes_filter(session, record) {
                continue;
            }
            let format = session.format();
            let slot = &mut built[format.index()];
            if slot.is_none() {
                *slot = Some(self.build(record, format)?);
            }
            if let Some(Some(buffer)) = slot {
                dropped += session.enqueue(buffer.share());
                enqueued += 1;
            }
        }
        Ok((enqueued, dropped))
    }

    /// Encode for one format; a fatal encoder error stops the loop
    fn build(&self, record: &FlowRecord, format: WireFormat) -> Result<Option<WireBuffer>> {
        match self.manager.pool().acquire(record, format) {
            Ok(buffer) => Ok(Some(buffer)),
            Err(e) if e.is_fatal() => Err(OutputError::Fatal(e.to_string())),
            Err(EncodeError::UnsupportedKind { .. }) => {
                trace!(format = %format, kind = %record.kind, "record not representable in format");
                Ok(None)
            }
            Err(e) => {
                self.encode_log
                    .warn("record skipped for format", &format_args!("{format}: {e}"));
                Ok(None)
            }
        }
    }

    /// Handle every queued client event, then wake the Event Loop
    ///
    /// Returns the number of events handled.
    pub fn process_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        self.manager.wake();
        handled
    }

    fn handle_event(&mut self, event: ClientEvent) {
        let manager = Arc::clone(&self.manager);
        let mut sessions = manager.sessions().lock();

        match event {
            ClientEvent::Input { id, data } => {
                let stats = manager.reported_stats(&sessions);
                let Some(session) = sessions.get_mut(id) else {
                    trace!(session_id = id, "input for unknown session");
                    return;
                };
                for line in feed_commands(session, &data) {
                    let command = Command::parse(&line);
                    let Some(reply) = control::execute(command, manager.channel(), session, &stats)
                    else {
                        continue;
                    };
                    let buffer = manager.pool().wrap(reply.encode_for(manager.channel()), None);
                    session.enqueue(buffer);
                }
            }
            ClientEvent::Disconnected { id } => {
                if let Some(session) = sessions.get_mut(id) {
                    session.close(CloseReason::PeerClosed);
                }
            }
        }
    }

    /// Final STOP record, best-effort flush and teardown of every session
    fn finish(&mut self) {
        let manager = Arc::clone(&self.manager);
        let mut sessions = manager.sessions().lock();

        if manager.channel() == Channel::Data {
            let stop = manager.status_record(MAR_CAUSE_STOP, &sessions);
            if let Err(e) = self.distribute(&mut sessions, &stop) {
                debug!(error = %e, "stop record not sent");
            }
        }
        for session in sessions.iter_mut() {
            session.close(CloseReason::Shutdown);
        }
        let closed = sessions.drain_all();
        info!(channel = %manager.channel(), sessions = closed, "sessions torn down");
    }
}

/// Status records bypass filters
fn passes_filter(session: &ClientSession, record: &FlowRecord) -> bool {
    if record.kind == RecordKind::Management {
        return true;
    }
    session.filter().is_none_or(|filter| filter.matches(record))
}

/// Push client bytes through the session's ring and collect complete lines
///
/// Chunks larger than the free space are fed in pieces, dequeuing between
/// them; a buffer that fills without a terminator is discarded.
fn feed_commands(session: &mut ClientSession, data: &[u8]) -> Vec<String> {
    let id = session.id();
    let ring = session.commands_mut();
    let mut lines = Vec::new();
    let mut rest = data;

    loop {
        let take = rest.len().min(ring.available());
        if take > 0 {
            // take <= available, so enqueue cannot fail
            let _ = ring.enqueue(&rest[..take]);
            rest = &rest[take..];
        }
        loop {
            match ring.dequeue() {
                Ok(Some(line)) => lines.push(line),
                Ok(None) => break,
                Err(e) => {
                    debug!(session_id = id, error = %e, "command discarded");
                    break;
                }
            }
        }
        if rest.is_empty() {
            break;
        }
    }
    lines
}

#[cfg(test)]
#[path = "dispatch_test.rs"]
mod tests;
