//! MMDB-specific Type Definitions

use crate::error::MmdbError;
use serde::Serialize;

/// MMDB metadata marker: "\xAB\xCD\xEFMaxMind.com"
pub const METADATA_MARKER: &[u8] = b"\xAB\xCD\xEFMaxMind.com";

/// The marker is searched for only within this many bytes of the end of file
pub const METADATA_MAX_SIZE: usize = 128 * 1024;

/// Zero bytes between the search tree and the data section
pub const DATA_SECTION_SEPARATOR_SIZE: usize = 16;

/// IP version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IpVersion {
    /// IPv4 only
    V4,
    /// IPv6 (IPv4 addresses live in the ::/96 subtree)
    V6,
}

impl IpVersion {
    /// Create from the metadata `ip_version` number
    pub fn from_number(n: u64) -> Result<Self, MmdbError> {
        match n {
            4 => Ok(IpVersion::V4),
            6 => Ok(IpVersion::V6),
            _ => Err(MmdbError::InvalidDatabase(format!(
                "Unsupported IP version: {}",
                n
            ))),
        }
    }

    /// The metadata number for this version (4 or 6)
    pub fn number(self) -> u8 {
        match self {
            IpVersion::V4 => 4,
            IpVersion::V6 => 6,
        }
    }
}

/// Record size in bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordSize {
    /// 24-bit records (3 bytes per record, 6 bytes per node)
    Bits24 = 24,
    /// 28-bit records (3.5 bytes per record, 7 bytes per node)
    Bits28 = 28,
    /// 32-bit records (4 bytes per record, 8 bytes per node)
    Bits32 = 32,
}

impl RecordSize {
    /// Get the size of a node (2 records) in bytes
    pub fn node_bytes(self) -> usize {
        self.bits() as usize / 4
    }

    /// Record width in bits
    pub fn bits(self) -> u16 {
        self as u16
    }

    /// Create from bit size
    pub fn from_bits(bits: u64) -> Result<Self, MmdbError> {
        match bits {
            24 => Ok(RecordSize::Bits24),
            28 => Ok(RecordSize::Bits28),
            32 => Ok(RecordSize::Bits32),
            _ => Err(MmdbError::InvalidDatabase(format!(
                "Unsupported record size: {}",
                bits
            ))),
        }
    }
}
