//! Flowcast Protocol - flow record model and versioned wire encoders
//!
//! This crate provides the types that flow through the distribution engine:
//! - `FlowRecord` - canonical parsed record with optional typed sub-records
//! - `MarRecord` - fixed-size engine status payload
//! - `WireVersion` / `WireFormat` - the native V3/V5 layouts and NetFlow v5
//! - `encode_record` / `RecordEncoder` - record to wire bytes, no I/O
//! - `decode_record` - reference decoder for the native layouts
//!
//! # Design Principles
//!
//! - **Pure encoders**: bytes out, nothing else; callers own the buffer
//! - **Two length paths**: sub-records report their size before writing and
//!   the encoder checks the sum against what was written
//! - **Network order**: every multi-byte field is big-endian

mod decode;
mod encode;
mod error;
mod mar;
mod record;
mod source;
mod version;
pub mod wire;

pub use decode::{DecodedRecord, decode_all, decode_record};
pub use encode::{
    MetricDirection, MetricShape, MetricWidth, NETFLOW_HEADER_LEN, NETFLOW_RECORD_LEN,
    NETFLOW_VERSION, NetflowContext, RecordEncoder, TCP_INIT_WORDS, TCP_PERF_WORDS,
    TCP_STATUS_WORDS, TimeEncoding, WIDE_SRCID_WORDS, classify_times, encode_mar_error,
    encode_netflow_v5, encode_record, pack_histogram, quantize_histogram, select_shape,
    unpack_histogram,
};
pub use error::{EncodeError, ProtocolError};
pub use mar::{MAR_WORDS_V3, MAR_WORDS_V5, MarRecord};
pub use record::{
    DirectionMetrics, FlowKey, FlowRecord, FlowTimes, GeoPoint, Geolocation, IpAttributes,
    IpSide, Jitter, JitterStats, Metrics, Mpls, Network, NetworkVariant, PacketSize, RecordKind,
    TcpDirection, TcpObject, Timestamp, Transport,
};
pub use source::{ParseSourceIdError, SourceIdentity};
pub use version::{WireFormat, WireVersion};
pub use wire::{MAX_RECORD_SIZE, WORD_SIZE};

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

/// Result type for decode operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Default TCP port for native record streams
pub const DEFAULT_MONITOR_PORT: u16 = 561;

/// Default UDP port for NetFlow collectors
pub const DEFAULT_NETFLOW_PORT: u16 = 2055;

// Test modules - only compiled during testing
#[cfg(test)]
mod decode_test;
#[cfg(test)]
mod source_test;
