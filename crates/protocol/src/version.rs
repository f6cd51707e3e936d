//! Wire versions and output formats

use std::fmt;
use std::str::FromStr;

/// Native binary record layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum WireVersion {
    V3 = 3,
    V5 = 5,
}

impl WireVersion {
    /// Parse from the low nibble of a record type byte
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            3 => Some(Self::V3),
            5 => Some(Self::V5),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl Default for WireVersion {
    fn default() -> Self {
        Self::V5
    }
}

impl fmt::Display for WireVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.as_u8())
    }
}

/// Everything a session can ask the encoder for
///
/// At most one buffer per format is built for any record, whatever the
/// number of sessions asking for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WireFormat {
    /// Native layout of the given version
    Native(WireVersion),
    /// Legacy NetFlow v5 export packet
    NetflowV5,
}

impl WireFormat {
    /// All formats, in a stable order
    pub const ALL: [WireFormat; 3] = [
        WireFormat::Native(WireVersion::V3),
        WireFormat::Native(WireVersion::V5),
        WireFormat::NetflowV5,
    ];

    /// Dense index for per-format tables
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Self::Native(WireVersion::V3) => 0,
            Self::Native(WireVersion::V5) => 1,
            Self::NetflowV5 => 2,
        }
    }

    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Native(WireVersion::V3) => "v3",
            Self::Native(WireVersion::V5) => "v5",
            Self::NetflowV5 => "netflow",
        }
    }
}

impl Default for WireFormat {
    fn default() -> Self {
        Self::Native(WireVersion::V5)
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "v3" | "3" => Ok(Self::Native(WireVersion::V3)),
            "v5" | "5" => Ok(Self::Native(WireVersion::V5)),
            "netflow" | "netflow5" | "nfv5" => Ok(Self::NetflowV5),
            other => Err(format!("unknown wire format: {other}")),
        }
    }
}
