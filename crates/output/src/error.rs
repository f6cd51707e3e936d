//! Error types for the output engine

use std::io;

use thiserror::Error;

use flowcast_protocol::EncodeError;

/// Errors that can occur in the output engine
#[derive(Error, Debug)]
pub enum OutputError {
    /// I/O error on a socket or file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A listening socket could not be bound
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Maximum clients reached
    #[error("maximum clients reached ({max})")]
    MaxClients { max: usize },

    /// Record could not be encoded
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// An internal invariant was violated; the engine must stop
    #[error("fatal: {0}")]
    Fatal(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Static output sink could not be opened
    #[error(transparent)]
    Sink(#[from] SinkError),
}

impl OutputError {
    /// Create a bind error
    pub fn bind(address: impl ToString, source: io::Error) -> Self {
        Self::Bind {
            address: address.to_string(),
            source,
        }
    }
}

/// Ring command buffer errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    /// The chunk does not fit in the free space; nothing was written
    #[error("ring buffer full: {requested} bytes requested, {available} available")]
    Capacity { requested: usize, available: usize },

    /// The buffer filled without a terminator and was discarded
    #[error("command exceeds ring buffer, {discarded} bytes discarded")]
    Overflow { discarded: usize },
}

/// Session authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("I/O error during negotiation: {0}")]
    Io(#[from] io::Error),

    #[error("authentication rejected: {0}")]
    Rejected(String),

    #[error("negotiation timed out")]
    Timeout,

    #[error("peer closed during negotiation")]
    Closed,
}

impl AuthError {
    #[inline]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }
}

/// Record filter compile errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("empty filter expression")]
    Empty,

    #[error("unknown filter term '{0}'")]
    UnknownTerm(String),

    #[error("'{term}' expects a value")]
    MissingValue { term: &'static str },

    #[error("invalid value '{value}' for '{term}'")]
    InvalidValue { term: &'static str, value: String },
}

impl FilterError {
    #[inline]
    pub fn invalid(term: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            term,
            value: value.into(),
        }
    }
}

/// Static output target errors
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("invalid output target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("failed to open output {target}: {source}")]
    Open {
        target: String,
        #[source]
        source: io::Error,
    },
}

impl SinkError {
    pub fn invalid(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTarget {
            target: target.into(),
            reason: reason.into(),
        }
    }

    pub fn open(target: impl ToString, source: io::Error) -> Self {
        Self::Open {
            target: target.to_string(),
            source,
        }
    }
}

/// Result type for output operations
pub type Result<T> = std::result::Result<T, OutputError>;
