//! Distribution engine tuning
//!
//! Queue limits, timers, and the source identity stamped on status records.
//! All fields have defaults; a deployment normally only sets `source_id`.

use std::time::Duration;

use serde::Deserialize;

/// Engine configuration
///
/// # Example
///
/// ```toml
/// [engine]
/// source_id = "192.0.2.1"
/// mar_interval = "60s"
/// max_clients = 32
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Source identity for status records: integer, IPv4, IPv6, UUID,
    /// or a string of at most four characters
    /// Default: none (integer 0)
    pub source_id: Option<String>,

    /// Interval between periodic status records; zero disables them
    /// Default: 60s
    #[serde(with = "humantime_serde")]
    pub mar_interval: Duration,

    /// Maximum concurrently connected clients per channel
    /// Default: 32
    pub max_clients: usize,

    /// Per-session queue depth that triggers drop-oldest
    /// Default: 10000
    pub max_queue_depth: usize,

    /// Queue depth below which a backpressured session resumes streaming
    /// Default: 5000
    pub resume_queue_depth: usize,

    /// Minimum number of oldest buffers dropped per overflow
    /// Default: 128
    pub drop_batch: usize,

    /// Writes attempted per session per dispatch cycle
    /// Default: 64
    pub max_writes_per_cycle: usize,

    /// Consecutive would-block writes tolerated before a session is closed
    /// Default: 10000
    pub max_consecutive_errors: u32,

    /// Time a data client has to send START
    /// Default: 5s
    #[serde(with = "humantime_serde")]
    pub startup_timeout: Duration,

    /// Bounded readiness wait of the Event Loop
    /// Default: 50ms
    #[serde(with = "humantime_serde")]
    pub scan_interval: Duration,

    /// Bounded wait of the Dispatch Loop when input is empty
    /// Default: 20ms
    #[serde(with = "humantime_serde")]
    pub idle_wait: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            source_id: None,
            mar_interval: Duration::from_secs(60),
            max_clients: 32,
            max_queue_depth: 10_000,
            resume_queue_depth: 5_000,
            drop_batch: 128,
            max_writes_per_cycle: 64,
            max_consecutive_errors: 10_000,
            startup_timeout: Duration::from_secs(5),
            scan_interval: Duration::from_millis(50),
            idle_wait: Duration::from_millis(20),
        }
    }
}

#[cfg(test)]
#[path = "engine_test.rs"]
mod tests;
