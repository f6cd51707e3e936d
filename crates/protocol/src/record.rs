//! Canonical flow record model
//!
//! A `FlowRecord` is the already-parsed form of one emitted record. Every
//! sub-record is optional; the encoders walk the present ones in a fixed
//! order. Records are produced upstream and only read by the encoders.

use std::borrow::Cow;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::mar::MarRecord;
use crate::source::SourceIdentity;
use crate::wire::{KIND_EVENT, KIND_FAR, KIND_MAR};

/// Discriminated record kind (high nibble of the record type byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordKind {
    /// Not representable by any encoder
    Unknown = 0,
    /// Flow record
    Flow = KIND_FAR,
    /// Event record
    Event = KIND_EVENT,
    /// Management / status record
    Management = KIND_MAR,
}

impl RecordKind {
    /// Parse the kind from a record type byte
    #[inline]
    pub const fn from_type_byte(value: u8) -> Self {
        match value & crate::wire::KIND_MASK {
            KIND_FAR => Self::Flow,
            KIND_EVENT => Self::Event,
            KIND_MAR => Self::Management,
            _ => Self::Unknown,
        }
    }

    /// Convert to the raw kind nibble
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Get the string name of this kind
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Flow => "far",
            Self::Event => "event",
            Self::Management => "mar",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Seconds and microseconds since the Unix epoch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    pub sec: u32,
    pub usec: u32,
}

impl Timestamp {
    pub const fn new(sec: u32, usec: u32) -> Self {
        Self { sec, usec }
    }

    /// Total microseconds
    #[inline]
    pub const fn as_micros(&self) -> u64 {
        self.sec as u64 * 1_000_000 + self.usec as u64
    }

    /// Build from total microseconds, saturating the seconds field
    #[inline]
    pub fn from_micros(us: u64) -> Self {
        let sec = u32::try_from(us / 1_000_000).unwrap_or(u32::MAX);
        Self {
            sec,
            usec: (us % 1_000_000) as u32,
        }
    }

    /// Current wall clock time
    pub fn now() -> Self {
        let elapsed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            sec: u32::try_from(elapsed.as_secs()).unwrap_or(u32::MAX),
            usec: elapsed.subsec_micros(),
        }
    }
}

/// Transport sub-record: who produced the record and its sequence number
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transport {
    pub source: Option<SourceIdentity>,
    /// Interface tag carried with wide ids
    pub interface: [u8; 4],
    pub sequence: Option<u32>,
}

/// Classic 5-tuple flow key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowKey {
    V4 {
        src: Ipv4Addr,
        dst: Ipv4Addr,
        proto: u8,
        sport: u16,
        dport: u16,
        src_mask: u8,
        dst_mask: u8,
    },
    V6 {
        src: Ipv6Addr,
        dst: Ipv6Addr,
        proto: u8,
        sport: u16,
        dport: u16,
        /// Low 20 bits are significant
        flow_label: u32,
    },
}

impl FlowKey {
    #[inline]
    pub fn proto(&self) -> u8 {
        match self {
            Self::V4 { proto, .. } | Self::V6 { proto, .. } => *proto,
        }
    }

    #[inline]
    pub fn ports(&self) -> (u16, u16) {
        match self {
            Self::V4 { sport, dport, .. } | Self::V6 { sport, dport, .. } => (*sport, *dport),
        }
    }
}

/// One direction of TCP state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpDirection {
    pub last_time: Timestamp,
    pub status: u32,
    pub seq_base: u32,
    pub seq: u32,
    pub ack: u32,
    pub win_num: u32,
    pub bytes: u32,
    pub retrans: u32,
    pub ack_bytes: u32,
    pub win_bytes: u32,
    pub win: u16,
    pub flags: u8,
    pub win_shift: u8,
}

/// Full TCP state object
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpObject {
    pub status: u32,
    pub state: u32,
    pub options: u32,
    pub syn_ack_usecs: u32,
    pub ack_data_usecs: u32,
    pub src: TcpDirection,
    pub dst: TcpDirection,
}

/// Which network sub-variant to emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkVariant {
    /// Connection setup: status, base sequence, options, window
    TcpInit,
    /// Status and per-direction flags only
    TcpStatus,
    /// The whole TCP object, verbatim
    TcpPerf,
}

/// Network / TCP state sub-record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Network {
    pub variant: NetworkVariant,
    pub tcp: TcpObject,
}

/// Start/end timestamps of each direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowTimes {
    pub src_start: Option<Timestamp>,
    pub src_end: Option<Timestamp>,
    pub dst_start: Option<Timestamp>,
    pub dst_end: Option<Timestamp>,
}

impl FlowTimes {
    /// Slots in canonical order with degenerate end points removed
    ///
    /// An end equal to its start collapses into the start alone.
    pub fn normalized(&self) -> [Option<Timestamp>; 4] {
        let src_end = match (self.src_start, self.src_end) {
            (Some(s), Some(e)) if s == e => None,
            (_, e) => e,
        };
        let dst_end = match (self.dst_start, self.dst_end) {
            (Some(s), Some(e)) if s == e => None,
            (_, e) => e,
        };
        [self.src_start, src_end, self.dst_start, dst_end]
    }

    /// Earliest present timestamp
    pub fn first(&self) -> Option<Timestamp> {
        self.normalized().into_iter().flatten().min()
    }

    /// Latest present timestamp
    pub fn last(&self) -> Option<Timestamp> {
        self.normalized().into_iter().flatten().max()
    }

    fn extend(&mut self, other: &FlowTimes) {
        self.src_start = min_opt(self.src_start, other.src_start);
        self.dst_start = min_opt(self.dst_start, other.dst_start);
        self.src_end = max_opt(self.src_end, other.src_end);
        self.dst_end = max_opt(self.dst_end, other.dst_end);
    }
}

fn min_opt<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn max_opt<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// Counters of one direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectionMetrics {
    pub pkts: u64,
    pub bytes: u64,
    pub app_bytes: u64,
}

impl DirectionMetrics {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pkts == 0 && self.bytes == 0 && self.app_bytes == 0
    }
}

/// Packet and byte counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metrics {
    pub src: DirectionMetrics,
    pub dst: DirectionMetrics,
}

/// Packet size bounds and histograms
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketSize {
    pub src_min_max: Option<(u16, u16)>,
    pub dst_min_max: Option<(u16, u16)>,
    /// Raw bucket counts; the wire carries 4-bit relative frequencies
    pub src_histogram: Option<[u32; 8]>,
    pub dst_histogram: Option<[u32; 8]>,
}

/// MPLS label stacks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mpls {
    pub src_labels: Vec<u32>,
    pub dst_labels: Vec<u32>,
}

/// Inter-packet arrival statistics
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JitterStats {
    pub n: i32,
    pub min: f32,
    pub mean: f32,
    pub stdev: f32,
    pub max: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Jitter {
    pub src_active: Option<JitterStats>,
    pub src_idle: Option<JitterStats>,
    pub dst_active: Option<JitterStats>,
    pub dst_idle: Option<JitterStats>,
}

/// IP header attributes of one direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IpSide {
    pub ttl: u8,
    pub tos: u8,
    pub ip_id: u16,
    pub options: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IpAttributes {
    pub src: Option<IpSide>,
    pub dst: Option<IpSide>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GeoPoint {
    pub lat: f32,
    pub lon: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Geolocation {
    pub src: Option<GeoPoint>,
    pub dst: Option<GeoPoint>,
}

/// One emitted record
///
/// `declared_len` is the word length the record had when it was parsed.
/// When the record is re-emitted unmodified and encodes shorter, the encoder
/// pads it back to that length.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowRecord {
    pub kind: RecordKind,
    pub cause: u8,
    /// Status payload of management records
    pub mar: Option<MarRecord>,
    pub transport: Option<Transport>,
    pub flow: Option<FlowKey>,
    pub network: Option<Network>,
    pub time: Option<FlowTimes>,
    pub metrics: Option<Metrics>,
    pub packet_size: Option<PacketSize>,
    pub mpls: Option<Mpls>,
    pub jitter: Option<Jitter>,
    pub ip_attrs: Option<IpAttributes>,
    pub label: Option<String>,
    pub geo: Option<Geolocation>,
    /// Set when the caller changed the record after it was parsed
    pub modified: bool,
    pub declared_len: Option<u16>,
    /// Records to fold into this one before encoding
    pub correlated: Vec<FlowRecord>,
}

impl FlowRecord {
    /// Create an empty record of the given kind
    pub fn new(kind: RecordKind) -> Self {
        Self {
            kind,
            cause: 0,
            mar: None,
            transport: None,
            flow: None,
            network: None,
            time: None,
            metrics: None,
            packet_size: None,
            mpls: None,
            jitter: None,
            ip_attrs: None,
            label: None,
            geo: None,
            modified: false,
            declared_len: None,
            correlated: Vec::new(),
        }
    }

    /// Create an empty flow record
    pub fn flow() -> Self {
        Self::new(RecordKind::Flow)
    }

    /// Create a management record carrying a status payload
    pub fn management(cause: u8, mar: MarRecord) -> Self {
        Self {
            cause,
            mar: Some(mar),
            ..Self::new(RecordKind::Management)
        }
    }

    /// Fold correlated records into this one
    ///
    /// Counters are summed, time bounds widened and packet size bounds
    /// combined. The result is marked modified so no length padding is
    /// applied. Returns `self` unchanged when nothing is correlated.
    pub fn merged(&self) -> Cow<'_, FlowRecord> {
        if self.correlated.is_empty() {
            return Cow::Borrowed(self);
        }

        let mut out = self.clone();
        out.correlated.clear();
        out.modified = true;

        for other in &self.correlated {
            let other = other.merged();
            if let Some(m) = other.metrics {
                let mine = out.metrics.get_or_insert_with(Metrics::default);
                add_direction(&mut mine.src, &m.src);
                add_direction(&mut mine.dst, &m.dst);
            }
            if let Some(t) = other.time {
                out.time.get_or_insert_with(FlowTimes::default).extend(&t);
            }
            if let Some(p) = other.packet_size {
                let mine = out.packet_size.get_or_insert_with(PacketSize::default);
                mine.src_min_max = combine_min_max(mine.src_min_max, p.src_min_max);
                mine.dst_min_max = combine_min_max(mine.dst_min_max, p.dst_min_max);
                mine.src_histogram = combine_histogram(mine.src_histogram, p.src_histogram);
                mine.dst_histogram = combine_histogram(mine.dst_histogram, p.dst_histogram);
            }
        }

        Cow::Owned(out)
    }
}

fn add_direction(into: &mut DirectionMetrics, from: &DirectionMetrics) {
    into.pkts = into.pkts.saturating_add(from.pkts);
    into.bytes = into.bytes.saturating_add(from.bytes);
    into.app_bytes = into.app_bytes.saturating_add(from.app_bytes);
}

fn combine_min_max(a: Option<(u16, u16)>, b: Option<(u16, u16)>) -> Option<(u16, u16)> {
    match (a, b) {
        (Some((amin, amax)), Some((bmin, bmax))) => Some((amin.min(bmin), amax.max(bmax))),
        (a, b) => a.or(b),
    }
}

fn combine_histogram(a: Option<[u32; 8]>, b: Option<[u32; 8]>) -> Option<[u32; 8]> {
    match (a, b) {
        (Some(mut a), Some(b)) => {
            for (slot, add) in a.iter_mut().zip(b) {
                *slot = slot.saturating_add(add);
            }
            Some(a)
        }
        (a, b) => a.or(b),
    }
}
