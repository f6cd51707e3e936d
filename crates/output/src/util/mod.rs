//! Shared helpers for the output engine

mod rate_limited_logger;

pub use rate_limited_logger::{DEFAULT_LOG_INTERVAL, RateLimitedLogger};
