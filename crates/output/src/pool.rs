//! Reference-counted wire buffer pool
//!
//! Each record is encoded once per wire format into a pooled scratch
//! buffer, then frozen into an immutable `WireBuffer` that any number of
//! sessions can queue. Sharing is an `Arc` clone; the buffer is freed when
//! the last session releases it.
//!
//! # Architecture
//!
//! ```text
//! acquire(record, format)
//!     │
//!     ├──→ scratch = queue.pop() or allocate MAX_RECORD_SIZE
//!     ├──→ encoder.encode(record, format, scratch)
//!     ├──→ small payload: copy out, scratch back to the queue
//!     │    large payload: freeze scratch itself
//!     ▼
//! WireBuffer (refcount 1) ──share()──→ refcount n ──drop×n──→ freed
//! ```
//!
//! Live buffer and byte totals are tracked in `PoolMetrics` and reported
//! in status records.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};
use crossbeam::queue::ArrayQueue;

use flowcast_protocol::{EncodeError, FlowRecord, MAX_RECORD_SIZE, RecordEncoder, WireFormat};

/// Default number of pooled scratch buffers
pub const DEFAULT_SCRATCH_BUFFERS: usize = 8;

/// Payloads up to this size are copied out of the scratch buffer
pub const SHRINK_THRESHOLD: usize = MAX_RECORD_SIZE / 2;

/// Pool counters
#[derive(Debug, Default)]
pub struct PoolMetrics {
    /// Scratch buffer reused
    pub hits: AtomicU64,
    /// Scratch buffer allocated because the queue was empty
    pub misses: AtomicU64,
    /// Wire buffers created
    pub acquired: AtomicU64,
    /// Wire buffers freed (last reference dropped)
    pub released: AtomicU64,
    /// Encodings that produced no buffer
    pub failed: AtomicU64,
    /// Wire buffers currently alive
    pub live_buffers: AtomicU64,
    /// Payload bytes held by live wire buffers
    pub live_bytes: AtomicU64,
}

impl PoolMetrics {
    pub const fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            live_buffers: AtomicU64::new(0),
            live_bytes: AtomicU64::new(0),
        }
    }

    #[inline]
    fn record_alloc(&self, len: usize) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
        self.live_buffers.fetch_add(1, Ordering::Relaxed);
        self.live_bytes.fetch_add(len as u64, Ordering::Relaxed);
    }

    #[inline]
    fn record_free(&self, len: usize) {
        self.released.fetch_add(1, Ordering::Relaxed);
        self.live_buffers.fetch_sub(1, Ordering::Relaxed);
        self.live_bytes.fetch_sub(len as u64, Ordering::Relaxed);
    }

    /// Get snapshot of metrics
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            acquired: self.acquired.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            live_buffers: self.live_buffers.load(Ordering::Relaxed),
            live_bytes: self.live_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of pool metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub acquired: u64,
    pub released: u64,
    pub failed: u64,
    pub live_buffers: u64,
    pub live_bytes: u64,
}

impl PoolSnapshot {
    /// Scratch reuse rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            1.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Inner {
    bytes: Bytes,
    /// `None` for control channel text
    format: Option<WireFormat>,
    metrics: Arc<PoolMetrics>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.metrics.record_free(self.bytes.len());
    }
}

/// Immutable encoded payload shared between sessions
///
/// Cloning is `share()`: it adds a reference to the same bytes.
#[derive(Clone)]
pub struct WireBuffer {
    inner: Arc<Inner>,
}

impl WireBuffer {
    /// Add a reference to the same encoded bytes
    #[inline]
    pub fn share(&self) -> Self {
        self.clone()
    }

    /// Drop this reference; the bytes are freed with the last one
    #[inline]
    pub fn release(self) {}

    /// Number of live references
    #[inline]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Whether two handles point at the same buffer
    #[inline]
    pub fn same_buffer(&self, other: &WireBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    #[inline]
    pub fn bytes(&self) -> &Bytes {
        &self.inner.bytes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.bytes.is_empty()
    }

    #[inline]
    pub fn format(&self) -> Option<WireFormat> {
        self.inner.format
    }
}

impl fmt::Debug for WireBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WireBuffer")
            .field("len", &self.len())
            .field("format", &self.format())
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// Encoder plus a lock-free queue of scratch buffers
pub struct WireBufferPool {
    scratch: ArrayQueue<BytesMut>,
    encoder: RecordEncoder,
    metrics: Arc<PoolMetrics>,
}

impl WireBufferPool {
    /// Create a pool with `scratch_buffers` pre-allocated encode buffers
    pub fn new(scratch_buffers: usize, encoder: RecordEncoder) -> Self {
        let scratch = ArrayQueue::new(scratch_buffers.max(1));
        for _ in 0..scratch.capacity() {
            let _ = scratch.push(BytesMut::with_capacity(MAX_RECORD_SIZE));
        }
        Self {
            scratch,
            encoder,
            metrics: Arc::new(PoolMetrics::new()),
        }
    }

    /// Encode `record` in `format` and wrap it with refcount 1
    ///
    /// An encoding failure allocates nothing.
    pub fn acquire(
        &self,
        record: &FlowRecord,
        format: WireFormat,
    ) -> Result<WireBuffer, EncodeError> {
        let mut scratch = self.take_scratch();
        if let Err(e) = self.encoder.encode(record, format, &mut scratch) {
            self.metrics.failed.fetch_add(1, Ordering::Relaxed);
            self.return_scratch(scratch);
            return Err(e);
        }

        let bytes = if scratch.len() <= SHRINK_THRESHOLD {
            let bytes = Bytes::copy_from_slice(&scratch);
            self.return_scratch(scratch);
            bytes
        } else {
            scratch.freeze()
        };
        Ok(self.wrap(bytes, Some(format)))
    }

    /// Wrap already-formatted bytes (control replies, error records)
    pub fn wrap(&self, bytes: Bytes, format: Option<WireFormat>) -> WireBuffer {
        self.metrics.record_alloc(bytes.len());
        WireBuffer {
            inner: Arc::new(Inner {
                bytes,
                format,
                metrics: Arc::clone(&self.metrics),
            }),
        }
    }

    /// The encoder used for every acquisition
    #[inline]
    pub fn encoder(&self) -> &RecordEncoder {
        &self.encoder
    }

    #[inline]
    pub fn metrics(&self) -> &PoolMetrics {
        &self.metrics
    }

    /// Scratch buffers currently idle in the queue
    #[inline]
    pub fn available_scratch(&self) -> usize {
        self.scratch.len()
    }

    fn take_scratch(&self) -> BytesMut {
        match self.scratch.pop() {
            Some(buf) => {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                BytesMut::with_capacity(MAX_RECORD_SIZE)
            }
        }
    }

    fn return_scratch(&self, mut buf: BytesMut) {
        buf.clear();
        // Only full-size buffers go back
        if buf.capacity() >= MAX_RECORD_SIZE {
            let _ = self.scratch.push(buf);
        }
    }
}

impl fmt::Debug for WireBufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WireBufferPool")
            .field("scratch", &self.scratch.len())
            .field("metrics", &self.metrics.snapshot())
            .finish()
    }
}

#[cfg(test)]
#[path = "pool_test.rs"]
mod tests;
