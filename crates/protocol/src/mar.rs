//! Management (MAR) status payload
//!
//! Status records have a fixed size per wire version. Encoding writes the
//! same payload for every version and only patches the type and cause bytes
//! and the width of the source identity slot.
//!
//! # Layout (after the record header)
//!
//! ```text
//!  0  status | local net | netmask | next sequence
//! 16  start time (sec, usec) | current time (sec, usec)
//! 32  major | minor | if type | if status
//! 36  report interval u16 | status interval u16
//! 40  packets rcvd u64 | bytes rcvd u64 | drift i64
//! 64  records | flows | dropped | queue | output | clients | bufs | bytes
//! 96  id type | pad[3]
//! 100 source id: V3 one word, V5 sixteen bytes + interface tag
//! ```

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;
use crate::record::Timestamp;
use crate::source::SourceIdentity;
use crate::version::WireVersion;
use crate::wire::{ID_TYPE_IPV6, ID_TYPE_UUID, WORD_SIZE};

/// Words in an encoded V3 status record, header included
pub const MAR_WORDS_V3: usize = 27;

/// Words in an encoded V5 status record, header included
pub const MAR_WORDS_V5: usize = 31;

/// Engine status payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarRecord {
    pub status: u32,
    pub source: SourceIdentity,
    pub interface: [u8; 4],
    pub local_net: u32,
    pub netmask: u32,
    pub next_seq: u32,
    pub start_time: Timestamp,
    pub now: Timestamp,
    pub major_version: u8,
    pub minor_version: u8,
    pub interface_type: u8,
    pub interface_status: u8,
    pub report_interval: u16,
    pub status_interval: u16,
    pub pkts_rcvd: u64,
    pub bytes_rcvd: u64,
    pub drift: i64,
    pub records: u32,
    pub flows: u32,
    pub dropped: u32,
    pub queue: u32,
    pub output: u32,
    pub clients: u32,
    pub bufs: u32,
    pub bytes: u32,
}

impl MarRecord {
    /// Encoded size in words for a version, header included
    #[inline]
    pub const fn encoded_words(version: WireVersion) -> usize {
        match version {
            WireVersion::V3 => MAR_WORDS_V3,
            WireVersion::V5 => MAR_WORDS_V5,
        }
    }

    /// Append the payload (without record header)
    pub(crate) fn write_body(&self, version: WireVersion, buf: &mut BytesMut) {
        buf.put_u32(self.status);
        buf.put_u32(self.local_net);
        buf.put_u32(self.netmask);
        buf.put_u32(self.next_seq);
        put_time(buf, self.start_time);
        put_time(buf, self.now);
        buf.put_u8(self.major_version);
        buf.put_u8(self.minor_version);
        buf.put_u8(self.interface_type);
        buf.put_u8(self.interface_status);
        buf.put_u16(self.report_interval);
        buf.put_u16(self.status_interval);
        buf.put_u64(self.pkts_rcvd);
        buf.put_u64(self.bytes_rcvd);
        buf.put_i64(self.drift);
        for v in [
            self.records,
            self.flows,
            self.dropped,
            self.queue,
            self.output,
            self.clients,
            self.bufs,
            self.bytes,
        ] {
            buf.put_u32(v);
        }

        match version {
            WireVersion::V3 => {
                let id = self.source.narrowed();
                buf.put_u8(id.id_type());
                buf.put_bytes(0, 3);
                buf.put_slice(&id.word());
            }
            WireVersion::V5 => {
                buf.put_u8(self.source.id_type());
                buf.put_bytes(0, 3);
                match self.source.wide_bytes() {
                    Some(wide) => buf.put_slice(&wide),
                    None => {
                        buf.put_slice(&self.source.word());
                        buf.put_bytes(0, 12);
                    }
                }
                buf.put_slice(&self.interface);
            }
        }
    }

    /// Parse the payload (without record header)
    pub(crate) fn read_body(version: WireVersion, mut body: &[u8]) -> Result<Self, ProtocolError> {
        let expected = (Self::encoded_words(version) - 1) * WORD_SIZE;
        if body.len() < expected {
            return Err(ProtocolError::too_short(expected, body.len()));
        }

        let mut mar = MarRecord {
            status: body.get_u32(),
            local_net: body.get_u32(),
            netmask: body.get_u32(),
            next_seq: body.get_u32(),
            start_time: get_time(&mut body),
            now: get_time(&mut body),
            major_version: body.get_u8(),
            minor_version: body.get_u8(),
            interface_type: body.get_u8(),
            interface_status: body.get_u8(),
            report_interval: body.get_u16(),
            status_interval: body.get_u16(),
            pkts_rcvd: body.get_u64(),
            bytes_rcvd: body.get_u64(),
            drift: body.get_i64(),
            records: body.get_u32(),
            flows: body.get_u32(),
            dropped: body.get_u32(),
            queue: body.get_u32(),
            output: body.get_u32(),
            clients: body.get_u32(),
            bufs: body.get_u32(),
            bytes: body.get_u32(),
            ..Default::default()
        };

        let id_type = body.get_u8();
        body.advance(3);
        let id_len = match version {
            WireVersion::V3 => 4,
            WireVersion::V5 if matches!(id_type, ID_TYPE_IPV6 | ID_TYPE_UUID) => 16,
            WireVersion::V5 => 4,
        };
        mar.source = SourceIdentity::from_wire(id_type, &body[..id_len])
            .ok_or_else(|| ProtocolError::invalid_subrecord(0, format!("bad MAR id type {id_type}")))?;
        if version == WireVersion::V5 {
            body.advance(16);
            mar.interface.copy_from_slice(&body[..4]);
        }
        Ok(mar)
    }
}

#[inline]
pub(crate) fn put_time(buf: &mut BytesMut, t: Timestamp) {
    buf.put_u32(t.sec);
    buf.put_u32(t.usec);
}

#[inline]
pub(crate) fn get_time(buf: &mut &[u8]) -> Timestamp {
    Timestamp::new(buf.get_u32(), buf.get_u32())
}
