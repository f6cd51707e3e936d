//! Wire constants shared by the encoders and the reference decoder
//!
//! All multi-byte fields are big-endian. Lengths are counted in 32-bit words.
//!
//! # Record header
//!
//! ```text
//! ┌──────────────┬──────────┬───────────────┐
//! │ kind|version │  cause   │  len (words)  │
//! │    1 byte    │  1 byte  │    u16 BE     │
//! └──────────────┴──────────┴───────────────┘
//! ```
//!
//! # Sub-record (DSR) header
//!
//! ```text
//! ┌──────────┬──────────┬───────────┬─────────────┐
//! │   type   │ subtype  │ qualifier │ len (words) │
//! └──────────┴──────────┴───────────┴─────────────┘
//! ```

/// Size of one length unit in bytes
pub const WORD_SIZE: usize = 4;

/// Largest encoded record in bytes
pub const MAX_RECORD_SIZE: usize = 0x10000;

/// Largest sub-record length in words (u8 length field)
pub const MAX_DSR_WORDS: usize = u8::MAX as usize;

// Record kinds (high nibble of the type byte)
pub const KIND_FAR: u8 = 0x10;
pub const KIND_EVENT: u8 = 0x40;
pub const KIND_MAR: u8 = 0x80;
pub const KIND_MASK: u8 = 0xF0;
pub const VERSION_MASK: u8 = 0x0F;

// MAR causes
pub const MAR_CAUSE_START: u8 = 0x10;
pub const MAR_CAUSE_STATUS: u8 = 0x20;
pub const MAR_CAUSE_STOP: u8 = 0x30;
pub const MAR_CAUSE_ERROR: u8 = 0x40;
/// Error detail: listener refused because the client limit was reached
pub const MAR_ERROR_MAXLISTENEXCD: u8 = 0x01;

// Flow causes
pub const FAR_CAUSE_START: u8 = 0x10;
pub const FAR_CAUSE_STATUS: u8 = 0x20;
pub const FAR_CAUSE_STOP: u8 = 0x30;

// Sub-record types, in canonical emission order
pub const DSR_FILLER: u8 = 0x00;
pub const DSR_TRANSPORT: u8 = 0x01;
pub const DSR_FLOW: u8 = 0x02;
pub const DSR_NETWORK: u8 = 0x10;
pub const DSR_TIME: u8 = 0x03;
pub const DSR_METRICS: u8 = 0x04;
pub const DSR_PSIZE: u8 = 0x05;
pub const DSR_MPLS: u8 = 0x0C;
pub const DSR_JITTER: u8 = 0x0E;
pub const DSR_IPATTR: u8 = 0x08;
pub const DSR_LABEL: u8 = 0x12;
pub const DSR_GEO: u8 = 0x14;

// Transport subtype flags
pub const TRANSPORT_SRCID: u8 = 0x01;
pub const TRANSPORT_SEQ: u8 = 0x02;

// Source identity types (transport qualifier)
pub const ID_TYPE_INT: u8 = 0;
pub const ID_TYPE_IPV4: u8 = 1;
pub const ID_TYPE_IPV6: u8 = 2;
pub const ID_TYPE_STRING: u8 = 4;
pub const ID_TYPE_UUID: u8 = 5;

// Flow key
pub const FLOW_CLASSIC5TUPLE: u8 = 0x01;
pub const FLOW_QUAL_IPV4: u8 = 0x01;
pub const FLOW_QUAL_IPV6: u8 = 0x02;

// Network subtypes
pub const NETWORK_TCP_INIT: u8 = 0x03;
pub const NETWORK_TCP_STATUS: u8 = 0x04;
pub const NETWORK_TCP_PERF: u8 = 0x05;

// Time presence mask (subtype)
pub const TIME_SRC_START: u8 = 0x01;
pub const TIME_SRC_END: u8 = 0x02;
pub const TIME_DST_START: u8 = 0x04;
pub const TIME_DST_END: u8 = 0x08;

/// Span above which every timestamp is written absolute
pub const TIME_RANGE_THRESHOLD_USEC: u64 = 1_000_000_000;

// Metrics subtypes
pub const METER_PKTS_BYTES: u8 = 0x01;
pub const METER_PKTS_BYTES_APP: u8 = 0x02;

// Packet size flags
pub const PSIZE_SRC_MAXMIN: u8 = 0x01;
pub const PSIZE_DST_MAXMIN: u8 = 0x02;
pub const PSIZE_SRC_HISTO: u8 = 0x04;
pub const PSIZE_DST_HISTO: u8 = 0x08;

// Jitter flags
pub const JITTER_SRC_ACTIVE: u8 = 0x01;
pub const JITTER_SRC_IDLE: u8 = 0x02;
pub const JITTER_DST_ACTIVE: u8 = 0x04;
pub const JITTER_DST_IDLE: u8 = 0x08;

// IP attribute flags
pub const IPATTR_SRC: u8 = 0x01;
pub const IPATTR_DST: u8 = 0x02;
pub const IPATTR_SRC_OPTIONS: u8 = 0x04;
pub const IPATTR_DST_OPTIONS: u8 = 0x08;

// Geolocation flags
pub const GEO_SRC: u8 = 0x01;
pub const GEO_DST: u8 = 0x02;

/// Labels per direction that fit in the MPLS qualifier nibble
pub const MAX_MPLS_LABELS: usize = 0x0F;

/// Longest label body that fits a sub-record
pub const MAX_LABEL_BYTES: usize = (MAX_DSR_WORDS - 1) * WORD_SIZE;

/// Build a record type byte
#[inline]
pub const fn record_type(kind: u8, version: u8) -> u8 {
    (kind & KIND_MASK) | (version & VERSION_MASK)
}

/// Round a byte count up to whole words
#[inline]
pub const fn words_for(bytes: usize) -> usize {
    bytes.div_ceil(WORD_SIZE)
}
