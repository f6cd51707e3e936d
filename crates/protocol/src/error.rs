//! Protocol error types
//!
//! Two families live here: `EncodeError` for the wire encoders and
//! `ProtocolError` for the reference decoder.

use thiserror::Error;

/// Errors that can occur while encoding a record
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// The record kind cannot be expressed in the requested format
    #[error("unsupported record kind {kind:#04x} for {format}")]
    UnsupportedKind { kind: u8, format: &'static str },

    /// A record or sub-record does not fit its length field
    #[error("length overflow in {field}: {size} exceeds maximum {max}")]
    LengthOverflow {
        field: &'static str,
        size: usize,
        max: usize,
    },

    /// Computed word count and bytes written disagree
    #[error("length mismatch: header declares {declared_words} words, wrote {written_bytes} bytes")]
    LengthMismatch {
        declared_words: usize,
        written_bytes: usize,
    },
}

impl EncodeError {
    /// Create an unsupported kind error
    #[inline]
    pub fn unsupported(kind: u8, format: &'static str) -> Self {
        Self::UnsupportedKind { kind, format }
    }

    /// Create a length overflow error
    #[inline]
    pub fn overflow(field: &'static str, size: usize, max: usize) -> Self {
        Self::LengthOverflow { field, size, max }
    }

    /// Whether continuing after this error would be unsafe
    ///
    /// A length mismatch means the sizing and writing paths disagree, which
    /// invalidates every later record on the same stream.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::LengthMismatch { .. })
    }
}

/// Errors that can occur while decoding wire records
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Message is too short to contain required fields
    #[error("message too short: expected at least {expected} bytes, got {actual}")]
    MessageTooShort { expected: usize, actual: usize },

    /// Record header carries an unknown kind or version
    #[error("invalid record type: {0:#04x}")]
    InvalidRecordType(u8),

    /// A sub-record is malformed
    #[error("invalid sub-record {dsr_type:#04x}: {reason}")]
    InvalidSubRecord { dsr_type: u8, reason: String },

    /// Record length field is zero or not word aligned
    #[error("invalid record length: {0} words")]
    InvalidLength(u16),
}

impl ProtocolError {
    /// Create a message too short error
    #[inline]
    pub fn too_short(expected: usize, actual: usize) -> Self {
        Self::MessageTooShort { expected, actual }
    }

    /// Create an invalid sub-record error
    #[inline]
    pub fn invalid_subrecord(dsr_type: u8, reason: impl Into<String>) -> Self {
        Self::InvalidSubRecord {
            dsr_type,
            reason: reason.into(),
        }
    }

    /// Check if the reader can skip this record and continue with the stream
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InvalidSubRecord { .. })
    }
}
