//! Metrics sub-record width selection
//!
//! Twelve shapes: three direction sets (both, src only, dst only) times four
//! integer widths. The width is the smallest one that holds the largest
//! counter in play.

use bytes::{BufMut, BytesMut};

use super::{DsrLayout, SubRecord};
use crate::error::EncodeError;
use crate::record::{DirectionMetrics, Metrics};
use crate::version::WireVersion;
use crate::wire::{DSR_METRICS, METER_PKTS_BYTES, METER_PKTS_BYTES_APP, words_for};

/// Integer width of every counter in the sub-record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricWidth {
    Byte,
    Short,
    Int,
    LongLong,
}

impl MetricWidth {
    /// Smallest width holding `value`
    #[inline]
    pub const fn for_value(value: u64) -> Self {
        if value <= 0xFF {
            Self::Byte
        } else if value <= 0xFFFF {
            Self::Short
        } else if value <= 0xFFFF_FFFF {
            Self::Int
        } else {
            Self::LongLong
        }
    }

    /// Bytes per counter
    #[inline]
    pub const fn bytes(self) -> usize {
        match self {
            Self::Byte => 1,
            Self::Short => 2,
            Self::Int => 4,
            Self::LongLong => 8,
        }
    }

    const fn rank(self) -> u8 {
        match self {
            Self::Byte => 1,
            Self::Short => 2,
            Self::Int => 3,
            Self::LongLong => 4,
        }
    }
}

/// Which directions are carried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricDirection {
    SrcDst,
    Src,
    Dst,
}

impl MetricDirection {
    const fn base(self) -> u8 {
        match self {
            Self::SrcDst => 0,
            Self::Src => 4,
            Self::Dst => 8,
        }
    }

    #[inline]
    pub const fn sides(self) -> usize {
        match self {
            Self::SrcDst => 2,
            Self::Src | Self::Dst => 1,
        }
    }
}

/// Direction set plus width, carried in the qualifier byte (1..=12)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetricShape {
    pub direction: MetricDirection,
    pub width: MetricWidth,
    /// Application byte counters follow packets and bytes
    pub app: bool,
}

impl MetricShape {
    /// Qualifier code: SRCDST_BYTE = 1 .. DST_LONGLONG = 12
    #[inline]
    pub const fn code(&self) -> u8 {
        self.direction.base() + self.width.rank()
    }

    /// Rebuild from the qualifier code and subtype
    pub fn from_code(code: u8, subtype: u8) -> Option<Self> {
        if !(1..=12).contains(&code) {
            return None;
        }
        let direction = match (code - 1) / 4 {
            0 => MetricDirection::SrcDst,
            1 => MetricDirection::Src,
            _ => MetricDirection::Dst,
        };
        let width = match (code - 1) % 4 {
            0 => MetricWidth::Byte,
            1 => MetricWidth::Short,
            2 => MetricWidth::Int,
            _ => MetricWidth::LongLong,
        };
        Some(Self {
            direction,
            width,
            app: subtype == METER_PKTS_BYTES_APP,
        })
    }

    /// Counters per direction
    #[inline]
    pub const fn values_per_side(&self) -> usize {
        if self.app { 3 } else { 2 }
    }

    /// Body length in bytes before word padding
    #[inline]
    pub const fn body_bytes(&self) -> usize {
        self.direction.sides() * self.values_per_side() * self.width.bytes()
    }
}

/// Pick the shape for a metrics sub-record
///
/// A direction is present when any of its counters is nonzero. When
/// neither is, both are carried at byte width.
pub fn select_shape(m: &Metrics) -> MetricShape {
    let direction = match (m.src.is_empty(), m.dst.is_empty()) {
        (false, true) => MetricDirection::Src,
        (true, false) => MetricDirection::Dst,
        _ => MetricDirection::SrcDst,
    };
    let sides: &[&DirectionMetrics] = match direction {
        MetricDirection::SrcDst => &[&m.src, &m.dst],
        MetricDirection::Src => &[&m.src],
        MetricDirection::Dst => &[&m.dst],
    };

    let app = sides.iter().any(|s| s.app_bytes != 0);
    let largest = sides
        .iter()
        .map(|s| s.pkts.max(s.bytes).max(if app { s.app_bytes } else { 0 }))
        .max()
        .unwrap_or(0);

    MetricShape {
        direction,
        width: MetricWidth::for_value(largest),
        app,
    }
}

impl SubRecord for Metrics {
    const TYPE: u8 = DSR_METRICS;

    fn layout(&self, _version: WireVersion) -> Result<Option<DsrLayout>, EncodeError> {
        let shape = select_shape(self);
        Ok(Some(DsrLayout {
            subtype: if shape.app {
                METER_PKTS_BYTES_APP
            } else {
                METER_PKTS_BYTES
            },
            qualifier: shape.code(),
            body_words: words_for(shape.body_bytes()),
        }))
    }

    fn write_body(&self, layout: &DsrLayout, _version: WireVersion, buf: &mut BytesMut) {
        let Some(shape) = MetricShape::from_code(layout.qualifier, layout.subtype) else {
            return;
        };
        let sides: &[&DirectionMetrics] = match shape.direction {
            MetricDirection::SrcDst => &[&self.src, &self.dst],
            MetricDirection::Src => &[&self.src],
            MetricDirection::Dst => &[&self.dst],
        };

        let start = buf.len();
        for side in sides {
            put_width(buf, shape.width, side.pkts);
            put_width(buf, shape.width, side.bytes);
            if shape.app {
                put_width(buf, shape.width, side.app_bytes);
            }
        }
        let written = buf.len() - start;
        buf.put_bytes(0, words_for(written) * crate::wire::WORD_SIZE - written);
    }
}

#[inline]
fn put_width(buf: &mut BytesMut, width: MetricWidth, value: u64) {
    match width {
        MetricWidth::Byte => buf.put_u8(value as u8),
        MetricWidth::Short => buf.put_u16(value as u16),
        MetricWidth::Int => buf.put_u32(value as u32),
        MetricWidth::LongLong => buf.put_u64(value),
    }
}
