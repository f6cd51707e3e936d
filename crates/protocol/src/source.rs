//! Source identity of the probe that produced a record
//!
//! The wire union is one word for integer, IPv4 and short string ids, and
//! four words (plus an interface tag) for IPv6 and UUID ids. V3 cannot carry
//! the wide forms, so they are narrowed to their trailing four octets.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::wire::{ID_TYPE_INT, ID_TYPE_IPV4, ID_TYPE_IPV6, ID_TYPE_STRING, ID_TYPE_UUID};

/// Identity of the probe or engine that emitted a record
///
/// # Example
///
/// ```
/// use flowcast_protocol::SourceIdentity;
///
/// let id: SourceIdentity = "192.0.2.7".parse().unwrap();
/// assert_eq!(id, SourceIdentity::Ipv4("192.0.2.7".parse().unwrap()));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceIdentity {
    Int(u32),
    Ipv4(Ipv4Addr),
    /// Up to four ASCII bytes, NUL padded
    Str([u8; 4]),
    Ipv6(Ipv6Addr),
    Uuid([u8; 16]),
}

impl SourceIdentity {
    /// Wire id type carried in the transport qualifier
    #[inline]
    pub const fn id_type(&self) -> u8 {
        match self {
            Self::Int(_) => ID_TYPE_INT,
            Self::Ipv4(_) => ID_TYPE_IPV4,
            Self::Str(_) => ID_TYPE_STRING,
            Self::Ipv6(_) => ID_TYPE_IPV6,
            Self::Uuid(_) => ID_TYPE_UUID,
        }
    }

    /// Whether this id needs the wide (16 byte) union slot
    #[inline]
    pub const fn is_wide(&self) -> bool {
        matches!(self, Self::Ipv6(_) | Self::Uuid(_))
    }

    /// Narrow a wide id to the one-word form
    ///
    /// IPv6 becomes IPv4 and UUID becomes an integer, both built from the
    /// trailing four octets. Narrow ids are returned unchanged.
    pub fn narrowed(&self) -> Self {
        match self {
            Self::Ipv6(addr) => {
                let o = addr.octets();
                Self::Ipv4(Ipv4Addr::new(o[12], o[13], o[14], o[15]))
            }
            Self::Uuid(bytes) => {
                Self::Int(u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]))
            }
            other => *other,
        }
    }

    /// The one-word wire value of a narrow id
    ///
    /// Wide ids are narrowed first.
    pub fn word(&self) -> [u8; 4] {
        match self.narrowed() {
            Self::Int(v) => v.to_be_bytes(),
            Self::Ipv4(addr) => addr.octets(),
            Self::Str(bytes) => bytes,
            Self::Ipv6(_) | Self::Uuid(_) => [0; 4],
        }
    }

    /// The 16-byte wire value of a wide id
    pub fn wide_bytes(&self) -> Option<[u8; 16]> {
        match self {
            Self::Ipv6(addr) => Some(addr.octets()),
            Self::Uuid(bytes) => Some(*bytes),
            _ => None,
        }
    }

    /// Rebuild an id from its wire type and value
    pub fn from_wire(id_type: u8, value: &[u8]) -> Option<Self> {
        match (id_type, value.len()) {
            (ID_TYPE_INT, 4) => Some(Self::Int(u32::from_be_bytes(value.try_into().ok()?))),
            (ID_TYPE_IPV4, 4) => Some(Self::Ipv4(Ipv4Addr::new(
                value[0], value[1], value[2], value[3],
            ))),
            (ID_TYPE_STRING, 4) => Some(Self::Str(value.try_into().ok()?)),
            (ID_TYPE_IPV6, 16) => {
                let octets: [u8; 16] = value.try_into().ok()?;
                Some(Self::Ipv6(Ipv6Addr::from(octets)))
            }
            (ID_TYPE_UUID, 16) => Some(Self::Uuid(value.try_into().ok()?)),
            _ => None,
        }
    }
}

impl Default for SourceIdentity {
    fn default() -> Self {
        Self::Int(0)
    }
}

impl fmt::Display for SourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Ipv4(addr) => write!(f, "{addr}"),
            Self::Ipv6(addr) => write!(f, "{addr}"),
            Self::Str(bytes) => {
                let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
                write!(f, "{}", String::from_utf8_lossy(&bytes[..end]))
            }
            Self::Uuid(b) => write!(
                f,
                "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
                b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], b[8], b[9], b[10], b[11], b[12],
                b[13], b[14], b[15]
            ),
        }
    }
}

/// Error returned when a source id string cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSourceIdError(pub String);

impl fmt::Display for ParseSourceIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid source id: {}", self.0)
    }
}

impl std::error::Error for ParseSourceIdError {}

impl FromStr for SourceIdentity {
    type Err = ParseSourceIdError;

    /// Accepts an integer, IPv4, IPv6, a hyphenated UUID, or a string of at
    /// most four ASCII characters.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseSourceIdError(s.to_string()));
        }
        if let Ok(v) = s.parse::<u32>() {
            return Ok(Self::Int(v));
        }
        if let Ok(addr) = s.parse::<Ipv4Addr>() {
            return Ok(Self::Ipv4(addr));
        }
        if let Ok(addr) = s.parse::<Ipv6Addr>() {
            return Ok(Self::Ipv6(addr));
        }
        if let Some(uuid) = parse_uuid(s) {
            return Ok(Self::Uuid(uuid));
        }
        if s.len() <= 4 && s.is_ascii() {
            let mut bytes = [0u8; 4];
            bytes[..s.len()].copy_from_slice(s.as_bytes());
            return Ok(Self::Str(bytes));
        }
        Err(ParseSourceIdError(s.to_string()))
    }
}

fn parse_uuid(s: &str) -> Option<[u8; 16]> {
    let groups: Vec<&str> = s.split('-').collect();
    let lens: Vec<usize> = groups.iter().map(|g| g.len()).collect();
    if lens != [8, 4, 4, 4, 12] {
        return None;
    }
    let hex: String = groups.concat();
    let mut out = [0u8; 16];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = u8::from_str_radix(hex.get(i * 2..i * 2 + 2)?, 16).ok()?;
    }
    Some(out)
}
