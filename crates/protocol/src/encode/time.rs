//! Time sub-record encoding selection
//!
//! The encoding is picked from which of the four timestamps are present
//! (after collapsing `end == start`) and from the total span:
//!
//! ```text
//! present == 1                                   -> AbsoluteTimestamp
//! span > 1e9 us                                  -> AbsoluteRange
//! mask == {SRC_START,SRC_END} or {DST_START,DST_END}
//!     and end >= start                           -> AbsoluteRelativeRange
//! mask == {SRC_START,DST_START}                  -> RelativeTimestamp
//! otherwise                                      -> RelativeRange
//! ```

use bytes::{BufMut, BytesMut};

use super::{DsrLayout, SubRecord};
use crate::error::EncodeError;
use crate::mar::put_time;
use crate::record::{FlowTimes, Timestamp};
use crate::version::WireVersion;
use crate::wire::{
    DSR_TIME, TIME_DST_END, TIME_DST_START, TIME_RANGE_THRESHOLD_USEC, TIME_SRC_END,
    TIME_SRC_START,
};

/// Time sub-record encodings (the qualifier byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TimeEncoding {
    /// One absolute timestamp
    AbsoluteTimestamp = 1,
    /// Every present timestamp absolute
    AbsoluteRange = 2,
    /// Start absolute, end as an unsigned offset
    AbsoluteRelativeRange = 3,
    /// Source start absolute, destination start as a signed offset
    RelativeTimestamp = 4,
    /// Earliest timestamp absolute, all present ones as unsigned offsets
    RelativeRange = 5,
}

impl TimeEncoding {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::AbsoluteTimestamp),
            2 => Some(Self::AbsoluteRange),
            3 => Some(Self::AbsoluteRelativeRange),
            4 => Some(Self::RelativeTimestamp),
            5 => Some(Self::RelativeRange),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Body length in words for `present` timestamps
    pub const fn body_words(self, present: usize) -> usize {
        match self {
            Self::AbsoluteTimestamp => 2,
            Self::AbsoluteRange => 2 * present,
            Self::AbsoluteRelativeRange | Self::RelativeTimestamp => 3,
            Self::RelativeRange => 2 + present,
        }
    }
}

/// Presence mask bit of each canonical slot
pub(crate) const SLOT_BITS: [u8; 4] = [TIME_SRC_START, TIME_SRC_END, TIME_DST_START, TIME_DST_END];

/// Pick the encoding and presence mask for a set of times
///
/// Returns `None` when no timestamp is present.
pub fn classify_times(times: &FlowTimes) -> Option<(TimeEncoding, u8)> {
    let slots = times.normalized();
    let mut mask = 0u8;
    let mut min = u64::MAX;
    let mut max = 0u64;
    let mut present = 0usize;

    for (slot, bit) in slots.iter().zip(SLOT_BITS) {
        if let Some(t) = slot {
            mask |= bit;
            present += 1;
            min = min.min(t.as_micros());
            max = max.max(t.as_micros());
        }
    }

    let encoding = match present {
        0 => return None,
        1 => TimeEncoding::AbsoluteTimestamp,
        _ if max - min > TIME_RANGE_THRESHOLD_USEC => TimeEncoding::AbsoluteRange,
        _ if mask == TIME_SRC_START | TIME_SRC_END && slots[1] >= slots[0] => {
            TimeEncoding::AbsoluteRelativeRange
        }
        _ if mask == TIME_DST_START | TIME_DST_END && slots[3] >= slots[2] => {
            TimeEncoding::AbsoluteRelativeRange
        }
        _ if mask == TIME_SRC_START | TIME_DST_START => TimeEncoding::RelativeTimestamp,
        _ => TimeEncoding::RelativeRange,
    };
    Some((encoding, mask))
}

impl SubRecord for FlowTimes {
    const TYPE: u8 = DSR_TIME;

    fn layout(&self, _version: WireVersion) -> Result<Option<DsrLayout>, EncodeError> {
        Ok(classify_times(self).map(|(encoding, mask)| DsrLayout {
            subtype: mask,
            qualifier: encoding.as_u8(),
            body_words: encoding.body_words(mask.count_ones() as usize),
        }))
    }

    fn write_body(&self, layout: &DsrLayout, _version: WireVersion, buf: &mut BytesMut) {
        let present: Vec<Timestamp> = self.normalized().into_iter().flatten().collect();
        let Some(encoding) = TimeEncoding::from_u8(layout.qualifier) else {
            return;
        };

        match encoding {
            TimeEncoding::AbsoluteTimestamp | TimeEncoding::AbsoluteRange => {
                for t in &present {
                    put_time(buf, *t);
                }
            }
            TimeEncoding::AbsoluteRelativeRange => {
                let (start, end) = (present[0], present[1]);
                put_time(buf, start);
                buf.put_u32(offset_u32(start, end));
            }
            TimeEncoding::RelativeTimestamp => {
                let (src, dst) = (present[0], present[1]);
                put_time(buf, src);
                let delta = dst.as_micros() as i64 - src.as_micros() as i64;
                buf.put_i32(delta as i32);
            }
            TimeEncoding::RelativeRange => {
                let base = present.iter().copied().min().unwrap_or_default();
                put_time(buf, base);
                for t in &present {
                    buf.put_u32(offset_u32(base, *t));
                }
            }
        }
    }
}

/// Offset of `t` from `base`; callers guarantee it fits under the threshold
#[inline]
fn offset_u32(base: Timestamp, t: Timestamp) -> u32 {
    t.as_micros().saturating_sub(base.as_micros()) as u32
}
