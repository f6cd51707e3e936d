//! Legacy NetFlow v5 export encoding
//!
//! One export packet per record: a 24-byte header followed by one 48-byte
//! flow entry per direction that carried traffic. Bidirectional records
//! become two unidirectional entries with the key reversed for the second.
//!
//! ```text
//! header: version | count | sys_uptime | unix_secs | unix_nsecs
//!         | flow_sequence | engine_type | engine_id | sampling_interval
//! entry:  srcaddr | dstaddr | nexthop | input | output | dPkts | dOctets
//!         | first | last | srcport | dstport | pad1 | tcp_flags | prot | tos
//!         | src_as | dst_as | src_mask | dst_mask | pad2
//! ```

use std::net::Ipv4Addr;

use bytes::{BufMut, BytesMut};

use crate::error::EncodeError;
use crate::record::{FlowKey, FlowRecord, RecordKind, Timestamp};

pub const NETFLOW_VERSION: u16 = 5;
pub const NETFLOW_HEADER_LEN: usize = 24;
pub const NETFLOW_RECORD_LEN: usize = 48;

/// Export state that is not part of the record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetflowContext {
    /// Uptime zero; `first`/`last` are milliseconds since this instant
    pub boot_time: Timestamp,
    pub engine_type: u8,
    pub engine_id: u8,
    pub sampling_interval: u16,
    /// Flows exported before this packet
    pub flow_sequence: u32,
}

struct Entry {
    src: Ipv4Addr,
    dst: Ipv4Addr,
    sport: u16,
    dport: u16,
    src_mask: u8,
    dst_mask: u8,
    pkts: u64,
    bytes: u64,
    first: Timestamp,
    last: Timestamp,
    tcp_flags: u8,
    tos: u8,
}

/// Encode a flow record as a NetFlow v5 export packet
///
/// Only IPv4 flow records can be represented; anything else is
/// `EncodeError::UnsupportedKind`.
pub fn encode_netflow_v5(
    record: &FlowRecord,
    ctx: &NetflowContext,
    out: &mut BytesMut,
) -> Result<usize, EncodeError> {
    let record = record.merged();
    if record.kind != RecordKind::Flow {
        return Err(EncodeError::unsupported(record.kind.as_u8(), "netflow"));
    }
    let Some(FlowKey::V4 {
        src,
        dst,
        proto,
        sport,
        dport,
        src_mask,
        dst_mask,
    }) = record.flow
    else {
        return Err(EncodeError::unsupported(record.kind.as_u8(), "netflow"));
    };

    let metrics = record.metrics.unwrap_or_default();
    let times = record.time.unwrap_or_default();
    let fallback = times.first().unwrap_or(ctx.boot_time);
    let tcp = record.network.map(|n| n.tcp);
    let ip = record.ip_attrs.unwrap_or_default();

    let src_first = times.src_start.unwrap_or(fallback);
    let mut entries = vec![Entry {
        src,
        dst,
        sport,
        dport,
        src_mask,
        dst_mask,
        pkts: metrics.src.pkts,
        bytes: metrics.src.bytes,
        first: src_first,
        last: times.src_end.unwrap_or(src_first),
        tcp_flags: tcp.map(|t| t.src.flags).unwrap_or(0),
        tos: ip.src.map(|s| s.tos).unwrap_or(0),
    }];

    if metrics.dst.pkts > 0 || metrics.dst.bytes > 0 {
        let dst_first = times.dst_start.unwrap_or(src_first);
        entries.push(Entry {
            src: dst,
            dst: src,
            sport: dport,
            dport: sport,
            src_mask: dst_mask,
            dst_mask: src_mask,
            pkts: metrics.dst.pkts,
            bytes: metrics.dst.bytes,
            first: dst_first,
            last: times.dst_end.unwrap_or(dst_first),
            tcp_flags: tcp.map(|t| t.dst.flags).unwrap_or(0),
            tos: ip.dst.map(|s| s.tos).unwrap_or(0),
        });
    }

    let export = times.last().unwrap_or(ctx.boot_time);
    let start = out.len();

    out.put_u16(NETFLOW_VERSION);
    out.put_u16(entries.len() as u16);
    out.put_u32(uptime_ms(ctx.boot_time, export));
    out.put_u32(export.sec);
    out.put_u32(export.usec.saturating_mul(1000));
    out.put_u32(ctx.flow_sequence);
    out.put_u8(ctx.engine_type);
    out.put_u8(ctx.engine_id);
    out.put_u16(ctx.sampling_interval);

    for e in &entries {
        out.put_slice(&e.src.octets());
        out.put_slice(&e.dst.octets());
        out.put_u32(0); // nexthop
        out.put_u16(0); // input ifindex
        out.put_u16(0); // output ifindex
        out.put_u32(saturate_u32(e.pkts));
        out.put_u32(saturate_u32(e.bytes));
        out.put_u32(uptime_ms(ctx.boot_time, e.first));
        out.put_u32(uptime_ms(ctx.boot_time, e.last));
        out.put_u16(e.sport);
        out.put_u16(e.dport);
        out.put_u8(0);
        out.put_u8(e.tcp_flags);
        out.put_u8(proto);
        out.put_u8(e.tos);
        out.put_u16(0); // src_as
        out.put_u16(0); // dst_as
        out.put_u8(e.src_mask);
        out.put_u8(e.dst_mask);
        out.put_u16(0);
    }

    Ok(out.len() - start)
}

#[inline]
fn uptime_ms(boot: Timestamp, t: Timestamp) -> u32 {
    saturate_u32(t.as_micros().saturating_sub(boot.as_micros()) / 1000)
}

#[inline]
fn saturate_u32(v: u64) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}
