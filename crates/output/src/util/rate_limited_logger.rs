//! Rate-limited logging for hot-path warnings
//!
//! A slow consumer can trigger a backpressure drop on every dispatch cycle,
//! and an unencodable record stream can fail on every record. Both would
//! flood the log. `RateLimitedLogger` emits at most once per interval and
//! reports how many events were folded into the line.
//!
//! # Example
//!
//! ```ignore
//! use flowcast_output::util::RateLimitedLogger;
//!
//! let logger = RateLimitedLogger::new(Duration::from_secs(10));
//! for _ in 0..1000 {
//!     logger.warn("dropped oldest buffers", &"queue over limit");
//! }
//! ```

use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Default interval between emitted lines
pub const DEFAULT_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Logger that folds repeated events into one line per interval
#[derive(Debug)]
pub struct RateLimitedLogger {
    min_interval: Duration,
    last_emit: Mutex<Option<Instant>>,
    /// Events since the last emitted line
    pending: AtomicU64,
    total: AtomicU64,
}

impl RateLimitedLogger {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_emit: Mutex::new(None),
            pending: AtomicU64::new(0),
            total: AtomicU64::new(0),
        }
    }

    /// Record an event; log a warning if the interval has passed
    ///
    /// Returns true if a line was emitted.
    pub fn warn(&self, message: &str, detail: &dyn Display) -> bool {
        let Some(suppressed) = self.record() else {
            return false;
        };
        let total = self.total.load(Ordering::Relaxed);
        if suppressed > 0 {
            tracing::warn!(detail = %detail, suppressed, total, "{message} (rate-limited)");
        } else {
            tracing::warn!(detail = %detail, total, "{message}");
        }
        true
    }

    /// Record an event; log an error if the interval has passed
    pub fn error(&self, message: &str, error: &dyn Display) -> bool {
        let Some(suppressed) = self.record() else {
            return false;
        };
        let total = self.total.load(Ordering::Relaxed);
        if suppressed > 0 {
            tracing::error!(error = %error, suppressed, total, "{message} (rate-limited)");
        } else {
            tracing::error!(error = %error, total, "{message}");
        }
        true
    }

    /// Count the event and decide whether to emit
    ///
    /// Returns the number of events suppressed since the previous line.
    fn record(&self) -> Option<u64> {
        self.pending.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);

        let mut last = self.last_emit.lock();
        let now = Instant::now();
        let due = match *last {
            None => true,
            Some(at) => now.duration_since(at) >= self.min_interval,
        };
        if !due {
            return None;
        }
        *last = Some(now);
        let pending = self.pending.swap(0, Ordering::Relaxed);
        Some(pending.saturating_sub(1))
    }

    /// Events recorded since the last emitted line
    pub fn pending_count(&self) -> u64 {
        self.pending.load(Ordering::Relaxed)
    }

    /// Events recorded over the logger's lifetime
    pub fn total_count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

impl Default for RateLimitedLogger {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_event_always_logs() {
        let logger = RateLimitedLogger::new(Duration::from_secs(10));
        assert!(logger.warn("queue over limit", &"session 1"));
        assert_eq!(logger.total_count(), 1);
        assert_eq!(logger.pending_count(), 0);
    }

    #[test]
    fn test_rapid_events_suppressed() {
        let logger = RateLimitedLogger::new(Duration::from_secs(10));
        assert!(logger.error("encode failed", &"v3"));
        for _ in 0..10 {
            assert!(!logger.error("encode failed", &"v3"));
        }
        assert_eq!(logger.total_count(), 11);
        assert_eq!(logger.pending_count(), 10);
    }

    #[test]
    fn test_zero_interval_never_suppresses() {
        let logger = RateLimitedLogger::new(Duration::ZERO);
        for _ in 0..3 {
            assert!(logger.warn("drop", &"x"));
        }
        assert_eq!(logger.pending_count(), 0);
    }
}
