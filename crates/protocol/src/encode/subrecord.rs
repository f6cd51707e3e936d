//! Fixed-layout sub-record encoders

use bytes::{BufMut, BytesMut};

use super::{DsrLayout, SubRecord};
use crate::error::EncodeError;
use crate::mar::put_time;
use crate::record::{
    FlowKey, Geolocation, IpAttributes, IpSide, Jitter, JitterStats, Mpls, Network,
    NetworkVariant, PacketSize, TcpDirection, Transport,
};
use crate::version::WireVersion;
use crate::wire::*;

/// Words of a verbatim TCP object body
pub const TCP_PERF_WORDS: usize = 29;
pub const TCP_INIT_WORDS: usize = 4;
pub const TCP_STATUS_WORDS: usize = 2;

/// Words of a wide source id: sixteen id bytes plus the interface tag
pub const WIDE_SRCID_WORDS: usize = 5;

impl SubRecord for Transport {
    const TYPE: u8 = DSR_TRANSPORT;

    fn layout(&self, version: WireVersion) -> Result<Option<DsrLayout>, EncodeError> {
        if self.source.is_none() && self.sequence.is_none() {
            return Ok(None);
        }

        let mut subtype = 0;
        let mut qualifier = 0;
        let mut body_words = 0;
        if let Some(source) = self.source {
            let source = match version {
                WireVersion::V3 => source.narrowed(),
                WireVersion::V5 => source,
            };
            subtype |= TRANSPORT_SRCID;
            qualifier = source.id_type();
            body_words += if source.is_wide() { WIDE_SRCID_WORDS } else { 1 };
        }
        if self.sequence.is_some() {
            subtype |= TRANSPORT_SEQ;
            body_words += 1;
        }

        Ok(Some(DsrLayout {
            subtype,
            qualifier,
            body_words,
        }))
    }

    fn write_body(&self, _layout: &DsrLayout, version: WireVersion, buf: &mut BytesMut) {
        if let Some(source) = self.source {
            match (version, source.wide_bytes()) {
                (WireVersion::V5, Some(wide)) => {
                    buf.put_slice(&wide);
                    buf.put_slice(&self.interface);
                }
                _ => buf.put_slice(&source.word()),
            }
        }
        if let Some(seq) = self.sequence {
            buf.put_u32(seq);
        }
    }
}

impl SubRecord for FlowKey {
    const TYPE: u8 = DSR_FLOW;

    fn layout(&self, _version: WireVersion) -> Result<Option<DsrLayout>, EncodeError> {
        let (qualifier, body_words) = match self {
            FlowKey::V4 { .. } => (FLOW_QUAL_IPV4, 4),
            FlowKey::V6 { .. } => (FLOW_QUAL_IPV6, 10),
        };
        Ok(Some(DsrLayout {
            subtype: FLOW_CLASSIC5TUPLE,
            qualifier,
            body_words,
        }))
    }

    fn write_body(&self, _layout: &DsrLayout, _version: WireVersion, buf: &mut BytesMut) {
        match *self {
            FlowKey::V4 {
                src,
                dst,
                proto,
                sport,
                dport,
                src_mask,
                dst_mask,
            } => {
                buf.put_slice(&src.octets());
                buf.put_slice(&dst.octets());
                buf.put_u16(sport);
                buf.put_u16(dport);
                buf.put_u8(proto);
                buf.put_u8(src_mask);
                buf.put_u8(dst_mask);
                buf.put_u8(0);
            }
            FlowKey::V6 {
                src,
                dst,
                proto,
                sport,
                dport,
                flow_label,
            } => {
                buf.put_slice(&src.octets());
                buf.put_slice(&dst.octets());
                buf.put_u16(sport);
                buf.put_u16(dport);
                buf.put_u32((u32::from(proto) << 24) | (flow_label & 0x000F_FFFF));
            }
        }
    }
}

impl SubRecord for Network {
    const TYPE: u8 = DSR_NETWORK;

    fn layout(&self, _version: WireVersion) -> Result<Option<DsrLayout>, EncodeError> {
        let (subtype, body_words) = match self.variant {
            NetworkVariant::TcpInit => (NETWORK_TCP_INIT, TCP_INIT_WORDS),
            NetworkVariant::TcpStatus => (NETWORK_TCP_STATUS, TCP_STATUS_WORDS),
            NetworkVariant::TcpPerf => (NETWORK_TCP_PERF, TCP_PERF_WORDS),
        };
        Ok(Some(DsrLayout {
            subtype,
            qualifier: 0,
            body_words,
        }))
    }

    fn write_body(&self, _layout: &DsrLayout, _version: WireVersion, buf: &mut BytesMut) {
        let tcp = &self.tcp;
        match self.variant {
            NetworkVariant::TcpInit => {
                buf.put_u32(tcp.status);
                buf.put_u32(tcp.src.seq_base);
                buf.put_u32(tcp.options);
                buf.put_u16(tcp.src.win);
                buf.put_u8(tcp.src.flags);
                buf.put_u8(tcp.src.win_shift);
            }
            NetworkVariant::TcpStatus => {
                buf.put_u32(tcp.status);
                buf.put_u8(tcp.src.flags);
                buf.put_u8(tcp.dst.flags);
                buf.put_u16(0);
            }
            NetworkVariant::TcpPerf => {
                buf.put_u32(tcp.status);
                buf.put_u32(tcp.state);
                buf.put_u32(tcp.options);
                buf.put_u32(tcp.syn_ack_usecs);
                buf.put_u32(tcp.ack_data_usecs);
                put_tcp_direction(buf, &tcp.src);
                put_tcp_direction(buf, &tcp.dst);
            }
        }
    }
}

fn put_tcp_direction(buf: &mut BytesMut, d: &TcpDirection) {
    put_time(buf, d.last_time);
    for v in [
        d.status,
        d.seq_base,
        d.seq,
        d.ack,
        d.win_num,
        d.bytes,
        d.retrans,
        d.ack_bytes,
        d.win_bytes,
    ] {
        buf.put_u32(v);
    }
    buf.put_u16(d.win);
    buf.put_u8(d.flags);
    buf.put_u8(d.win_shift);
}

/// Quantize raw bucket counts to 4-bit relative frequencies
///
/// Each nonzero bucket becomes `max(1, round(count * 15 / max))`, empty
/// buckets stay zero.
pub fn quantize_histogram(counts: &[u32; 8]) -> [u8; 8] {
    let max = counts.iter().copied().max().unwrap_or(0);
    let mut out = [0u8; 8];
    if max == 0 {
        return out;
    }
    for (slot, &count) in out.iter_mut().zip(counts) {
        if count > 0 {
            let scaled = (f64::from(count) * 15.0 / f64::from(max)).round() as u8;
            *slot = scaled.max(1);
        }
    }
    out
}

/// Pack eight nibbles into a word, bucket 0 in the high nibble
#[inline]
pub fn pack_histogram(values: &[u8; 8]) -> u32 {
    values
        .iter()
        .enumerate()
        .fold(0u32, |acc, (i, v)| acc | (u32::from(v & 0x0F) << (28 - 4 * i)))
}

/// Split a packed histogram word back into nibbles
#[inline]
pub fn unpack_histogram(word: u32) -> [u8; 8] {
    let mut out = [0u8; 8];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = ((word >> (28 - 4 * i)) & 0x0F) as u8;
    }
    out
}

fn histogram_present(h: &Option<[u32; 8]>) -> bool {
    h.is_some_and(|h| h.iter().any(|c| *c > 0))
}

impl SubRecord for PacketSize {
    const TYPE: u8 = DSR_PSIZE;

    fn layout(&self, _version: WireVersion) -> Result<Option<DsrLayout>, EncodeError> {
        let mut subtype = 0;
        if self.src_min_max.is_some() {
            subtype |= PSIZE_SRC_MAXMIN;
        }
        if self.dst_min_max.is_some() {
            subtype |= PSIZE_DST_MAXMIN;
        }
        if histogram_present(&self.src_histogram) {
            subtype |= PSIZE_SRC_HISTO;
        }
        if histogram_present(&self.dst_histogram) {
            subtype |= PSIZE_DST_HISTO;
        }
        if subtype == 0 {
            return Ok(None);
        }
        Ok(Some(DsrLayout {
            subtype,
            qualifier: 0,
            body_words: subtype.count_ones() as usize,
        }))
    }

    fn write_body(&self, layout: &DsrLayout, _version: WireVersion, buf: &mut BytesMut) {
        for (flag, pair) in [
            (PSIZE_SRC_MAXMIN, self.src_min_max),
            (PSIZE_DST_MAXMIN, self.dst_min_max),
        ] {
            if layout.subtype & flag != 0
                && let Some((min, max)) = pair
            {
                buf.put_u16(min);
                buf.put_u16(max);
            }
        }
        for (flag, histogram) in [
            (PSIZE_SRC_HISTO, self.src_histogram),
            (PSIZE_DST_HISTO, self.dst_histogram),
        ] {
            if layout.subtype & flag != 0
                && let Some(counts) = histogram
            {
                buf.put_u32(pack_histogram(&quantize_histogram(&counts)));
            }
        }
    }
}

impl SubRecord for Mpls {
    const TYPE: u8 = DSR_MPLS;

    fn layout(&self, _version: WireVersion) -> Result<Option<DsrLayout>, EncodeError> {
        let (src, dst) = (self.src_labels.len(), self.dst_labels.len());
        if src == 0 && dst == 0 {
            return Ok(None);
        }
        if src > MAX_MPLS_LABELS {
            return Err(EncodeError::overflow("mpls.src_labels", src, MAX_MPLS_LABELS));
        }
        if dst > MAX_MPLS_LABELS {
            return Err(EncodeError::overflow("mpls.dst_labels", dst, MAX_MPLS_LABELS));
        }
        Ok(Some(DsrLayout {
            subtype: 0,
            qualifier: ((src as u8) << 4) | dst as u8,
            body_words: src + dst,
        }))
    }

    fn write_body(&self, _layout: &DsrLayout, _version: WireVersion, buf: &mut BytesMut) {
        for label in self.src_labels.iter().chain(&self.dst_labels) {
            buf.put_u32(*label);
        }
    }
}

impl Jitter {
    fn slots(&self) -> [(u8, Option<JitterStats>); 4] {
        [
            (JITTER_SRC_ACTIVE, self.src_active),
            (JITTER_SRC_IDLE, self.src_idle),
            (JITTER_DST_ACTIVE, self.dst_active),
            (JITTER_DST_IDLE, self.dst_idle),
        ]
    }
}

impl SubRecord for Jitter {
    const TYPE: u8 = DSR_JITTER;

    fn layout(&self, _version: WireVersion) -> Result<Option<DsrLayout>, EncodeError> {
        let subtype = self
            .slots()
            .iter()
            .filter(|(_, s)| s.is_some())
            .fold(0u8, |acc, (flag, _)| acc | flag);
        if subtype == 0 {
            return Ok(None);
        }
        Ok(Some(DsrLayout {
            subtype,
            qualifier: 0,
            body_words: subtype.count_ones() as usize * 5,
        }))
    }

    fn write_body(&self, _layout: &DsrLayout, _version: WireVersion, buf: &mut BytesMut) {
        for stats in self.slots().into_iter().filter_map(|(_, s)| s) {
            buf.put_i32(stats.n);
            // XDR floats are big-endian IEEE-754 singles
            buf.put_f32(stats.min);
            buf.put_f32(stats.mean);
            buf.put_f32(stats.stdev);
            buf.put_f32(stats.max);
        }
    }
}

impl SubRecord for IpAttributes {
    const TYPE: u8 = DSR_IPATTR;

    fn layout(&self, _version: WireVersion) -> Result<Option<DsrLayout>, EncodeError> {
        let mut qualifier = 0;
        let mut body_words = 0;
        for (side, flag, options_flag) in [
            (&self.src, IPATTR_SRC, IPATTR_SRC_OPTIONS),
            (&self.dst, IPATTR_DST, IPATTR_DST_OPTIONS),
        ] {
            if let Some(side) = side {
                qualifier |= flag;
                body_words += 1;
                if side.options.is_some() {
                    qualifier |= options_flag;
                    body_words += 1;
                }
            }
        }
        if qualifier == 0 {
            return Ok(None);
        }
        Ok(Some(DsrLayout {
            subtype: 0,
            qualifier,
            body_words,
        }))
    }

    fn write_body(&self, _layout: &DsrLayout, _version: WireVersion, buf: &mut BytesMut) {
        for side in [&self.src, &self.dst].into_iter().flatten() {
            put_ip_side(buf, side);
        }
    }
}

fn put_ip_side(buf: &mut BytesMut, side: &IpSide) {
    buf.put_u8(side.ttl);
    buf.put_u8(side.tos);
    buf.put_u16(side.ip_id);
    if let Some(options) = side.options {
        buf.put_u32(options);
    }
}

/// Free-text label, NUL padded to a word
pub(crate) struct Label<'a>(pub &'a str);

impl SubRecord for Label<'_> {
    const TYPE: u8 = DSR_LABEL;

    fn layout(&self, _version: WireVersion) -> Result<Option<DsrLayout>, EncodeError> {
        let len = self.0.len();
        if len == 0 {
            return Ok(None);
        }
        if len > MAX_LABEL_BYTES {
            return Err(EncodeError::overflow("label", len, MAX_LABEL_BYTES));
        }
        Ok(Some(DsrLayout {
            subtype: 0,
            qualifier: 0,
            body_words: words_for(len),
        }))
    }

    fn write_body(&self, layout: &DsrLayout, _version: WireVersion, buf: &mut BytesMut) {
        buf.put_slice(self.0.as_bytes());
        buf.put_bytes(0, layout.body_words * WORD_SIZE - self.0.len());
    }
}

impl SubRecord for Geolocation {
    const TYPE: u8 = DSR_GEO;

    fn layout(&self, version: WireVersion) -> Result<Option<DsrLayout>, EncodeError> {
        // V3 has no geolocation sub-record
        if version == WireVersion::V3 {
            return Ok(None);
        }
        let mut qualifier = 0;
        if self.src.is_some() {
            qualifier |= GEO_SRC;
        }
        if self.dst.is_some() {
            qualifier |= GEO_DST;
        }
        if qualifier == 0 {
            return Ok(None);
        }
        Ok(Some(DsrLayout {
            subtype: 0,
            qualifier,
            body_words: qualifier.count_ones() as usize * 2,
        }))
    }

    fn write_body(&self, _layout: &DsrLayout, _version: WireVersion, buf: &mut BytesMut) {
        for point in [self.src, self.dst].into_iter().flatten() {
            buf.put_f32(point.lat);
            buf.put_f32(point.lon);
        }
    }
}
