//! Record encoders
//!
//! Pure functions from a `FlowRecord` to wire bytes. Nothing here does I/O.
//!
//! # Native layout
//!
//! ```text
//! [record header][transport][flow][network][time][metrics][psize]
//!                [mpls][jitter][ipattr][label][geo][filler...]
//! ```
//!
//! Each sub-record first reports its layout (subtype, qualifier, body
//! words) and then writes its body. The header length is the sum of the
//! reported layouts; after writing, that sum must equal the bytes actually
//! written or the encoder returns `EncodeError::LengthMismatch`.
//!
//! # Usage
//!
//! ```ignore
//! use flowcast_protocol::{encode_record, WireVersion};
//!
//! let mut out = BytesMut::with_capacity(MAX_RECORD_SIZE);
//! let len = encode_record(&record, WireVersion::V5, &mut out)?;
//! ```

mod metrics;
mod netflow;
mod subrecord;
mod time;

pub use metrics::{MetricDirection, MetricShape, MetricWidth, select_shape};
pub use netflow::{
    NETFLOW_HEADER_LEN, NETFLOW_RECORD_LEN, NETFLOW_VERSION, NetflowContext, encode_netflow_v5,
};
pub use subrecord::{
    TCP_INIT_WORDS, TCP_PERF_WORDS, TCP_STATUS_WORDS, WIDE_SRCID_WORDS, pack_histogram,
    quantize_histogram, unpack_histogram,
};
pub use time::{TimeEncoding, classify_times};

pub(crate) use time::SLOT_BITS;

use std::sync::atomic::{AtomicU32, Ordering};

use bytes::{BufMut, BytesMut};

use crate::error::EncodeError;
use crate::mar::MarRecord;
use crate::record::{FlowRecord, RecordKind, Timestamp};
use crate::version::{WireFormat, WireVersion};
use crate::wire::{
    KIND_MAR, MAX_DSR_WORDS, MAX_RECORD_SIZE, MAR_CAUSE_ERROR, WORD_SIZE, record_type,
};

/// Layout a sub-record reports before its body is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DsrLayout {
    pub subtype: u8,
    pub qualifier: u8,
    pub body_words: usize,
}

/// One optional sub-record of a flow record
pub(crate) trait SubRecord {
    /// Sub-record type byte
    const TYPE: u8;

    /// Header fields and body size, or `None` when nothing is emitted
    fn layout(&self, version: WireVersion) -> Result<Option<DsrLayout>, EncodeError>;

    /// Append exactly `layout.body_words` words
    fn write_body(&self, layout: &DsrLayout, version: WireVersion, buf: &mut BytesMut);
}

/// Append one sub-record, returning the words it declared
fn append<S: SubRecord + ?Sized>(
    out: &mut BytesMut,
    sub: &S,
    version: WireVersion,
) -> Result<usize, EncodeError> {
    let Some(layout) = sub.layout(version)? else {
        return Ok(0);
    };
    let words = layout.body_words + 1;
    if words > MAX_DSR_WORDS {
        return Err(EncodeError::overflow("sub-record", words, MAX_DSR_WORDS));
    }

    out.put_u8(S::TYPE);
    out.put_u8(layout.subtype);
    out.put_u8(layout.qualifier);
    out.put_u8(words as u8);
    sub.write_body(&layout, version, out);
    Ok(words)
}

#[inline]
fn put_record_header(out: &mut BytesMut, kind: u8, version: WireVersion, cause: u8, words: u16) {
    out.put_u8(record_type(kind, version.as_u8()));
    out.put_u8(cause);
    out.put_u16(words);
}

fn check_length(declared_words: usize, written_bytes: usize) -> Result<(), EncodeError> {
    if declared_words * WORD_SIZE != written_bytes {
        return Err(EncodeError::LengthMismatch {
            declared_words,
            written_bytes,
        });
    }
    Ok(())
}

/// Encode one record in a native layout
///
/// Appends to `out` and returns the number of bytes written. Correlated
/// records are merged first. On error `out` is truncated back to its
/// original length.
pub fn encode_record(
    record: &FlowRecord,
    version: WireVersion,
    out: &mut BytesMut,
) -> Result<usize, EncodeError> {
    let start = out.len();
    let record = record.merged();
    let result = match record.kind {
        RecordKind::Management => encode_mar(&record, version, out),
        RecordKind::Flow | RecordKind::Event => encode_flow(&record, version, out),
        RecordKind::Unknown => Err(EncodeError::unsupported(record.kind.as_u8(), "native")),
    };
    if result.is_err() {
        out.truncate(start);
    }
    result
}

fn encode_mar(
    record: &FlowRecord,
    version: WireVersion,
    out: &mut BytesMut,
) -> Result<usize, EncodeError> {
    let mar = record
        .mar
        .as_ref()
        .ok_or_else(|| EncodeError::unsupported(KIND_MAR, "native"))?;
    let start = out.len();
    let words = MarRecord::encoded_words(version);

    put_record_header(out, KIND_MAR, version, record.cause, words as u16);
    mar.write_body(version, out);

    let written = out.len() - start;
    check_length(words, written)?;
    Ok(written)
}

fn encode_flow(
    record: &FlowRecord,
    version: WireVersion,
    out: &mut BytesMut,
) -> Result<usize, EncodeError> {
    let start = out.len();
    out.put_u32(0);
    let mut words = 1;

    if let Some(ref v) = record.transport {
        words += append(out, v, version)?;
    }
    if let Some(ref v) = record.flow {
        words += append(out, v, version)?;
    }
    if let Some(ref v) = record.network {
        words += append(out, v, version)?;
    }
    if let Some(ref v) = record.time {
        words += append(out, v, version)?;
    }
    if let Some(ref v) = record.metrics {
        words += append(out, v, version)?;
    }
    if let Some(ref v) = record.packet_size {
        words += append(out, v, version)?;
    }
    if let Some(ref v) = record.mpls {
        words += append(out, v, version)?;
    }
    if let Some(ref v) = record.jitter {
        words += append(out, v, version)?;
    }
    if let Some(ref v) = record.ip_attrs {
        words += append(out, v, version)?;
    }
    if let Some(ref v) = record.label {
        words += append(out, &subrecord::Label(v), version)?;
    }
    if let Some(ref v) = record.geo {
        words += append(out, v, version)?;
    }

    // Unmodified records keep the length they were parsed with
    if !record.modified
        && let Some(declared) = record.declared_len
        && usize::from(declared) > words
    {
        let filler = usize::from(declared) - words;
        out.put_bytes(0, filler * WORD_SIZE);
        words += filler;
    }

    let written = out.len() - start;
    if written > MAX_RECORD_SIZE || words > usize::from(u16::MAX) {
        return Err(EncodeError::overflow("record", written, MAX_RECORD_SIZE));
    }
    check_length(words, written)?;

    let header = &mut out[start..start + WORD_SIZE];
    header[0] = record_type(record.kind.as_u8(), version.as_u8());
    header[1] = record.cause;
    header[2..4].copy_from_slice(&(words as u16).to_be_bytes());
    Ok(written)
}

/// Encode the one-word error record sent when a listener refuses a client
pub fn encode_mar_error(version: WireVersion, detail: u8, out: &mut BytesMut) -> usize {
    put_record_header(out, KIND_MAR, version, MAR_CAUSE_ERROR | (detail & 0x0F), 1);
    WORD_SIZE
}

/// Stateful front end over every supported format
///
/// Holds the NetFlow export context (boot time, engine ids and the running
/// flow sequence). Native encodings are stateless and go straight through
/// to `encode_record`.
#[derive(Debug)]
pub struct RecordEncoder {
    boot_time: Timestamp,
    engine_type: u8,
    engine_id: u8,
    flow_sequence: AtomicU32,
}

impl RecordEncoder {
    /// Create an encoder whose NetFlow uptime starts at `boot_time`
    pub fn new(boot_time: Timestamp) -> Self {
        Self {
            boot_time,
            engine_type: 0,
            engine_id: 0,
            flow_sequence: AtomicU32::new(0),
        }
    }

    /// Set NetFlow engine type and id
    pub fn with_engine(mut self, engine_type: u8, engine_id: u8) -> Self {
        self.engine_type = engine_type;
        self.engine_id = engine_id;
        self
    }

    /// Flows exported in NetFlow so far
    pub fn flow_sequence(&self) -> u32 {
        self.flow_sequence.load(Ordering::Relaxed)
    }

    /// Encode `record` in `format`, appending to `out`
    pub fn encode(
        &self,
        record: &FlowRecord,
        format: WireFormat,
        out: &mut BytesMut,
    ) -> Result<usize, EncodeError> {
        match format {
            WireFormat::Native(version) => encode_record(record, version, out),
            WireFormat::NetflowV5 => {
                let ctx = NetflowContext {
                    boot_time: self.boot_time,
                    engine_type: self.engine_type,
                    engine_id: self.engine_id,
                    sampling_interval: 0,
                    flow_sequence: self.flow_sequence(),
                };
                let written = encode_netflow_v5(record, &ctx, out)?;
                let flows = (written - NETFLOW_HEADER_LEN) / NETFLOW_RECORD_LEN;
                self.flow_sequence
                    .fetch_add(flows as u32, Ordering::Relaxed);
                Ok(written)
            }
        }
    }
}
