//! Reference decoder for the native layouts
//!
//! Parses what `encode_record` writes. Used by the replay input and by the
//! round-trip tests; unknown sub-record types are skipped by length so
//! newer writers stay readable.
//!
//! # Usage
//!
//! ```ignore
//! use flowcast_protocol::decode_record;
//!
//! let mut input = &bytes[..];
//! while !input.is_empty() {
//!     let (decoded, used) = decode_record(input)?;
//!     input = &input[used..];
//! }
//! ```

use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::Buf;

use crate::encode::{MetricDirection, MetricShape, MetricWidth, SLOT_BITS, TimeEncoding, unpack_histogram};
use crate::error::ProtocolError;
use crate::mar::{MarRecord, get_time};
use crate::record::{
    DirectionMetrics, FlowKey, FlowRecord, FlowTimes, GeoPoint, Geolocation, IpAttributes,
    IpSide, Jitter, JitterStats, Metrics, Mpls, Network, NetworkVariant, PacketSize,
    RecordKind, TcpDirection, TcpObject, Timestamp, Transport,
};
use crate::source::SourceIdentity;
use crate::version::WireVersion;
use crate::wire::*;

/// A parsed record and the version it was written in
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    pub version: WireVersion,
    pub record: FlowRecord,
}

/// Decode the first record in `input`
///
/// Returns the record and the number of bytes it occupied. The decoded
/// record carries its wire length in `declared_len` and is not marked
/// modified.
pub fn decode_record(input: &[u8]) -> Result<(DecodedRecord, usize), ProtocolError> {
    if input.len() < WORD_SIZE {
        return Err(ProtocolError::too_short(WORD_SIZE, input.len()));
    }

    let type_byte = input[0];
    let cause = input[1];
    let words = u16::from_be_bytes([input[2], input[3]]);
    let version = WireVersion::from_u8(type_byte & VERSION_MASK)
        .ok_or(ProtocolError::InvalidRecordType(type_byte))?;
    let kind = RecordKind::from_type_byte(type_byte);
    if kind == RecordKind::Unknown {
        return Err(ProtocolError::InvalidRecordType(type_byte));
    }
    if words == 0 {
        return Err(ProtocolError::InvalidLength(words));
    }

    let total = usize::from(words) * WORD_SIZE;
    if input.len() < total {
        return Err(ProtocolError::too_short(total, input.len()));
    }
    let body = &input[WORD_SIZE..total];

    let mut record = FlowRecord::new(kind);
    record.cause = cause;
    record.declared_len = Some(words);

    match kind {
        RecordKind::Management => {
            // One-word error records have no payload
            if !body.is_empty() {
                record.mar = Some(MarRecord::read_body(version, body)?);
            }
        }
        _ => decode_subrecords(version, body, &mut record)?,
    }

    Ok((DecodedRecord { version, record }, total))
}

/// Decode every record in a buffer
pub fn decode_all(mut input: &[u8]) -> Result<Vec<DecodedRecord>, ProtocolError> {
    let mut out = Vec::new();
    while !input.is_empty() {
        let (decoded, used) = decode_record(input)?;
        out.push(decoded);
        input = &input[used..];
    }
    Ok(out)
}

fn decode_subrecords(
    version: WireVersion,
    mut body: &[u8],
    record: &mut FlowRecord,
) -> Result<(), ProtocolError> {
    while body.len() >= WORD_SIZE {
        let (dsr_type, subtype, qualifier, words) = (body[0], body[1], body[2], body[3]);

        // Zero words are fillers
        if dsr_type == DSR_FILLER && words == 0 {
            body.advance(WORD_SIZE);
            continue;
        }
        if words == 0 {
            return Err(ProtocolError::invalid_subrecord(dsr_type, "zero length"));
        }
        let len = usize::from(words) * WORD_SIZE;
        if body.len() < len {
            return Err(ProtocolError::invalid_subrecord(
                dsr_type,
                format!("declares {len} bytes, {} remain", body.len()),
            ));
        }
        let mut dsr = &body[WORD_SIZE..len];
        let h = Header {
            dsr_type,
            subtype,
            qualifier,
        };

        match dsr_type {
            DSR_TRANSPORT => record.transport = Some(read_transport(version, &h, &mut dsr)?),
            DSR_FLOW => record.flow = Some(read_flow(&h, &mut dsr)?),
            DSR_NETWORK => record.network = Some(read_network(&h, &mut dsr)?),
            DSR_TIME => record.time = Some(read_time(&h, &mut dsr)?),
            DSR_METRICS => record.metrics = Some(read_metrics(&h, &mut dsr)?),
            DSR_PSIZE => record.packet_size = Some(read_packet_size(&h, &mut dsr)?),
            DSR_MPLS => record.mpls = Some(read_mpls(&h, &mut dsr)?),
            DSR_JITTER => record.jitter = Some(read_jitter(&h, &mut dsr)?),
            DSR_IPATTR => record.ip_attrs = Some(read_ip_attrs(&h, &mut dsr)?),
            DSR_LABEL => record.label = Some(read_label(dsr)),
            DSR_GEO => record.geo = Some(read_geo(&h, &mut dsr)?),
            _ => {}
        }
        body.advance(len);
    }
    Ok(())
}

struct Header {
    dsr_type: u8,
    subtype: u8,
    qualifier: u8,
}

impl Header {
    fn need(&self, dsr: &[u8], bytes: usize) -> Result<(), ProtocolError> {
        if dsr.len() < bytes {
            return Err(ProtocolError::invalid_subrecord(
                self.dsr_type,
                format!("body needs {bytes} bytes, has {}", dsr.len()),
            ));
        }
        Ok(())
    }
}

fn read_transport(
    version: WireVersion,
    h: &Header,
    dsr: &mut &[u8],
) -> Result<Transport, ProtocolError> {
    let mut transport = Transport::default();
    if h.subtype & TRANSPORT_SRCID != 0 {
        let wide = version == WireVersion::V5 && matches!(h.qualifier, ID_TYPE_IPV6 | ID_TYPE_UUID);
        let id_len = if wide { 16 } else { 4 };
        h.need(dsr, id_len + if wide { 4 } else { 0 })?;
        transport.source = Some(
            SourceIdentity::from_wire(h.qualifier, &dsr[..id_len])
                .ok_or_else(|| ProtocolError::invalid_subrecord(h.dsr_type, "bad id type"))?,
        );
        dsr.advance(id_len);
        if wide {
            transport.interface.copy_from_slice(&dsr[..4]);
            dsr.advance(4);
        }
    }
    if h.subtype & TRANSPORT_SEQ != 0 {
        h.need(dsr, 4)?;
        transport.sequence = Some(dsr.get_u32());
    }
    Ok(transport)
}

fn read_flow(h: &Header, dsr: &mut &[u8]) -> Result<FlowKey, ProtocolError> {
    match h.qualifier {
        FLOW_QUAL_IPV4 => {
            h.need(dsr, 16)?;
            let src = Ipv4Addr::from(dsr.get_u32());
            let dst = Ipv4Addr::from(dsr.get_u32());
            let sport = dsr.get_u16();
            let dport = dsr.get_u16();
            Ok(FlowKey::V4 {
                src,
                dst,
                sport,
                dport,
                proto: dsr.get_u8(),
                src_mask: dsr.get_u8(),
                dst_mask: dsr.get_u8(),
            })
        }
        FLOW_QUAL_IPV6 => {
            h.need(dsr, 40)?;
            let src = Ipv6Addr::from(dsr.get_u128());
            let dst = Ipv6Addr::from(dsr.get_u128());
            let sport = dsr.get_u16();
            let dport = dsr.get_u16();
            let word = dsr.get_u32();
            Ok(FlowKey::V6 {
                src,
                dst,
                sport,
                dport,
                proto: (word >> 24) as u8,
                flow_label: word & 0x000F_FFFF,
            })
        }
        q => Err(ProtocolError::invalid_subrecord(
            h.dsr_type,
            format!("unknown flow qualifier {q}"),
        )),
    }
}

fn read_network(h: &Header, dsr: &mut &[u8]) -> Result<Network, ProtocolError> {
    let mut tcp = TcpObject::default();
    let variant = match h.subtype {
        NETWORK_TCP_INIT => {
            h.need(dsr, 16)?;
            tcp.status = dsr.get_u32();
            tcp.src.seq_base = dsr.get_u32();
            tcp.options = dsr.get_u32();
            tcp.src.win = dsr.get_u16();
            tcp.src.flags = dsr.get_u8();
            tcp.src.win_shift = dsr.get_u8();
            NetworkVariant::TcpInit
        }
        NETWORK_TCP_STATUS => {
            h.need(dsr, 8)?;
            tcp.status = dsr.get_u32();
            tcp.src.flags = dsr.get_u8();
            tcp.dst.flags = dsr.get_u8();
            NetworkVariant::TcpStatus
        }
        NETWORK_TCP_PERF => {
            h.need(dsr, crate::encode::TCP_PERF_WORDS * WORD_SIZE)?;
            tcp.status = dsr.get_u32();
            tcp.state = dsr.get_u32();
            tcp.options = dsr.get_u32();
            tcp.syn_ack_usecs = dsr.get_u32();
            tcp.ack_data_usecs = dsr.get_u32();
            tcp.src = read_tcp_direction(dsr);
            tcp.dst = read_tcp_direction(dsr);
            NetworkVariant::TcpPerf
        }
        s => {
            return Err(ProtocolError::invalid_subrecord(
                h.dsr_type,
                format!("unknown network subtype {s}"),
            ));
        }
    };
    Ok(Network { variant, tcp })
}

fn read_tcp_direction(dsr: &mut &[u8]) -> TcpDirection {
    TcpDirection {
        last_time: get_time(dsr),
        status: dsr.get_u32(),
        seq_base: dsr.get_u32(),
        seq: dsr.get_u32(),
        ack: dsr.get_u32(),
        win_num: dsr.get_u32(),
        bytes: dsr.get_u32(),
        retrans: dsr.get_u32(),
        ack_bytes: dsr.get_u32(),
        win_bytes: dsr.get_u32(),
        win: dsr.get_u16(),
        flags: dsr.get_u8(),
        win_shift: dsr.get_u8(),
    }
}

fn read_time(h: &Header, dsr: &mut &[u8]) -> Result<FlowTimes, ProtocolError> {
    let encoding = TimeEncoding::from_u8(h.qualifier).ok_or_else(|| {
        ProtocolError::invalid_subrecord(h.dsr_type, format!("unknown time encoding {}", h.qualifier))
    })?;
    let present = (h.subtype & 0x0F).count_ones() as usize;
    h.need(dsr, encoding.body_words(present) * WORD_SIZE)?;

    let values: Vec<Timestamp> = match encoding {
        TimeEncoding::AbsoluteTimestamp | TimeEncoding::AbsoluteRange => {
            (0..present).map(|_| get_time(dsr)).collect()
        }
        TimeEncoding::AbsoluteRelativeRange => {
            let start = get_time(dsr);
            let end = start.as_micros() + u64::from(dsr.get_u32());
            vec![start, Timestamp::from_micros(end)]
        }
        TimeEncoding::RelativeTimestamp => {
            let src = get_time(dsr);
            let dst = src.as_micros() as i64 + i64::from(dsr.get_i32());
            vec![src, Timestamp::from_micros(dst.max(0) as u64)]
        }
        TimeEncoding::RelativeRange => {
            let base = get_time(dsr).as_micros();
            (0..present)
                .map(|_| Timestamp::from_micros(base + u64::from(dsr.get_u32())))
                .collect()
        }
    };

    let mut slots = [None; 4];
    let mut values = values.into_iter();
    for (slot, bit) in slots.iter_mut().zip(SLOT_BITS) {
        if h.subtype & bit != 0 {
            *slot = values.next();
        }
    }
    Ok(FlowTimes {
        src_start: slots[0],
        src_end: slots[1],
        dst_start: slots[2],
        dst_end: slots[3],
    })
}

fn read_metrics(h: &Header, dsr: &mut &[u8]) -> Result<Metrics, ProtocolError> {
    let shape = MetricShape::from_code(h.qualifier, h.subtype).ok_or_else(|| {
        ProtocolError::invalid_subrecord(h.dsr_type, format!("unknown metric shape {}", h.qualifier))
    })?;
    h.need(dsr, shape.body_bytes())?;

    let read_side = |dsr: &mut &[u8]| DirectionMetrics {
        pkts: get_width(dsr, shape.width),
        bytes: get_width(dsr, shape.width),
        app_bytes: if shape.app { get_width(dsr, shape.width) } else { 0 },
    };

    let mut metrics = Metrics::default();
    match shape.direction {
        MetricDirection::SrcDst => {
            metrics.src = read_side(dsr);
            metrics.dst = read_side(dsr);
        }
        MetricDirection::Src => metrics.src = read_side(dsr),
        MetricDirection::Dst => metrics.dst = read_side(dsr),
    }
    Ok(metrics)
}

fn get_width(dsr: &mut &[u8], width: MetricWidth) -> u64 {
    match width {
        MetricWidth::Byte => u64::from(dsr.get_u8()),
        MetricWidth::Short => u64::from(dsr.get_u16()),
        MetricWidth::Int => u64::from(dsr.get_u32()),
        MetricWidth::LongLong => dsr.get_u64(),
    }
}

fn read_packet_size(h: &Header, dsr: &mut &[u8]) -> Result<PacketSize, ProtocolError> {
    h.need(dsr, (h.subtype & 0x0F).count_ones() as usize * WORD_SIZE)?;
    let mut psize = PacketSize::default();
    if h.subtype & PSIZE_SRC_MAXMIN != 0 {
        psize.src_min_max = Some((dsr.get_u16(), dsr.get_u16()));
    }
    if h.subtype & PSIZE_DST_MAXMIN != 0 {
        psize.dst_min_max = Some((dsr.get_u16(), dsr.get_u16()));
    }
    if h.subtype & PSIZE_SRC_HISTO != 0 {
        psize.src_histogram = Some(unpack_histogram(dsr.get_u32()).map(u32::from));
    }
    if h.subtype & PSIZE_DST_HISTO != 0 {
        psize.dst_histogram = Some(unpack_histogram(dsr.get_u32()).map(u32::from));
    }
    Ok(psize)
}

fn read_mpls(h: &Header, dsr: &mut &[u8]) -> Result<Mpls, ProtocolError> {
    let src = usize::from(h.qualifier >> 4);
    let dst = usize::from(h.qualifier & 0x0F);
    h.need(dsr, (src + dst) * WORD_SIZE)?;
    Ok(Mpls {
        src_labels: (0..src).map(|_| dsr.get_u32()).collect(),
        dst_labels: (0..dst).map(|_| dsr.get_u32()).collect(),
    })
}

fn read_jitter(h: &Header, dsr: &mut &[u8]) -> Result<Jitter, ProtocolError> {
    h.need(dsr, (h.subtype & 0x0F).count_ones() as usize * 5 * WORD_SIZE)?;
    let read = |flag: u8, dsr: &mut &[u8]| {
        (h.subtype & flag != 0).then(|| JitterStats {
            n: dsr.get_i32(),
            min: dsr.get_f32(),
            mean: dsr.get_f32(),
            stdev: dsr.get_f32(),
            max: dsr.get_f32(),
        })
    };
    Ok(Jitter {
        src_active: read(JITTER_SRC_ACTIVE, dsr),
        src_idle: read(JITTER_SRC_IDLE, dsr),
        dst_active: read(JITTER_DST_ACTIVE, dsr),
        dst_idle: read(JITTER_DST_IDLE, dsr),
    })
}

fn read_ip_attrs(h: &Header, dsr: &mut &[u8]) -> Result<IpAttributes, ProtocolError> {
    h.need(dsr, (h.qualifier & 0x0F).count_ones() as usize * WORD_SIZE)?;
    let read = |flag: u8, options_flag: u8, dsr: &mut &[u8]| {
        (h.qualifier & flag != 0).then(|| IpSide {
            ttl: dsr.get_u8(),
            tos: dsr.get_u8(),
            ip_id: dsr.get_u16(),
            options: (h.qualifier & options_flag != 0).then(|| dsr.get_u32()),
        })
    };
    Ok(IpAttributes {
        src: read(IPATTR_SRC, IPATTR_SRC_OPTIONS, dsr),
        dst: read(IPATTR_DST, IPATTR_DST_OPTIONS, dsr),
    })
}

fn read_label(dsr: &[u8]) -> String {
    let end = dsr.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    String::from_utf8_lossy(&dsr[..end]).into_owned()
}

fn read_geo(h: &Header, dsr: &mut &[u8]) -> Result<Geolocation, ProtocolError> {
    h.need(dsr, (h.qualifier & 0x03).count_ones() as usize * 2 * WORD_SIZE)?;
    let read = |flag: u8, dsr: &mut &[u8]| {
        (h.qualifier & flag != 0).then(|| GeoPoint {
            lat: dsr.get_f32(),
            lon: dsr.get_f32(),
        })
    };
    Ok(Geolocation {
        src: read(GEO_SRC, dsr),
        dst: read(GEO_DST, dsr),
    })
}
