//! MMDB Search Tree Traversal
//!
//! The search tree is a binary trie over address bits. Each node holds two
//! records (left for a 0 bit, right for a 1 bit) and each record is either:
//! - Another node index (`< node_count`, continue traversal)
//! - The "no match" marker (`== node_count`)
//! - A data section pointer (`> node_count`, found)

use super::format::Metadata;
use super::types::{IpVersion, RecordSize, DATA_SECTION_SEPARATOR_SIZE};
use crate::error::{MmdbError, Result};
use crate::source::ByteSource;
use std::net::IpAddr;

/// IPv4 addresses live under `::/96` in an IPv6 tree
const IPV4_SUBTREE_DEPTH: usize = 96;

/// Tree parameters derived from the metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmdbHeader {
    /// Number of nodes in the search tree
    pub node_count: u32,
    /// Record size in bits
    pub record_size: RecordSize,
    /// IP version of the tree
    pub ip_version: IpVersion,
    /// Size of the search tree in bytes
    pub tree_size: usize,
    /// Node at which IPv4 lookups start (0 for IPv4 trees)
    pub ipv4_start: u32,
}

impl MmdbHeader {
    /// Derive the header from decoded metadata
    ///
    /// The IPv4 start node is resolved here, once, by walking the left
    /// records of an IPv6 tree.
    pub fn new(source: &dyn ByteSource, metadata: &Metadata) -> Result<Self> {
        let mut header = MmdbHeader {
            node_count: metadata.node_count,
            record_size: metadata.record_size,
            ip_version: metadata.ip_version,
            tree_size: metadata.search_tree_size(),
            ipv4_start: 0,
        };

        if header.ip_version == IpVersion::V6 {
            let ipv4_start = SearchTree::new(source, &header).find_ipv4_start()?;
            header.ipv4_start = ipv4_start;
        }
        Ok(header)
    }

    /// Offset of the first byte of the data section
    pub fn data_section_start(&self) -> usize {
        self.tree_size + DATA_SECTION_SEPARATOR_SIZE
    }
}

/// Read-only view of the search tree of one database
pub struct SearchTree<'a> {
    source: &'a dyn ByteSource,
    header: &'a MmdbHeader,
}

impl<'a> SearchTree<'a> {
    /// Create a new search tree view
    pub fn new(source: &'a dyn ByteSource, header: &'a MmdbHeader) -> Self {
        Self { source, header }
    }

    /// Look up an IP address
    ///
    /// Returns the raw record value (0 when nothing matched) and the number
    /// of address bits consulted. Callers are responsible for rejecting IPv6
    /// addresses against an IPv4 tree.
    pub fn lookup(&self, ip: IpAddr) -> Result<(u32, u8)> {
        match ip {
            IpAddr::V4(addr) => self.find(&addr.octets(), 32),
            IpAddr::V6(addr) => self.find(&addr.octets(), 128),
        }
    }

    /// Walk the tree over the first `bit_count` bits of `address`
    ///
    /// A 4-byte address against an IPv6 tree starts at the IPv4 subtree, so
    /// its depth is counted in IPv4 bits.
    pub fn find(&self, address: &[u8], bit_count: usize) -> Result<(u32, u8)> {
        let node_count = self.header.node_count;
        let bit_count = bit_count.min(address.len() * 8);

        let mut node = if address.len() == 4 {
            self.header.ipv4_start
        } else {
            0
        };
        let mut depth = 0usize;

        while depth < bit_count && node < node_count {
            let bit = (address[depth >> 3] >> (7 - (depth & 7))) & 1;
            node = self.read_node(node, bit as usize)?;
            depth += 1;
        }

        if node == node_count {
            Ok((0, depth as u8))
        } else if node > node_count {
            Ok((node, depth as u8))
        } else {
            Err(MmdbError::InvalidDatabase(
                "Invalid node in search tree".to_string(),
            ))
        }
    }

    /// Read child `side` (0 = left, 1 = right) of `node`
    pub fn read_node(&self, node: u32, side: usize) -> Result<u32> {
        let node_bytes = self.header.record_size.node_bytes();
        let bytes = self.source.read(node as usize * node_bytes, node_bytes)?;

        let record = match self.header.record_size {
            RecordSize::Bits24 => {
                let b = &bytes[side * 3..side * 3 + 3];
                be24(b)
            }
            RecordSize::Bits28 => {
                // The middle byte carries the high nibble of both records
                if side == 0 {
                    (((bytes[3] & 0xF0) as u32) << 20) | be24(&bytes[0..3])
                } else {
                    (((bytes[3] & 0x0F) as u32) << 24) | be24(&bytes[4..7])
                }
            }
            RecordSize::Bits32 => {
                let b = &bytes[side * 4..side * 4 + 4];
                u32::from_be_bytes([b[0], b[1], b[2], b[3]])
            }
        };
        Ok(record)
    }

    /// Translate a data pointer record into an absolute file offset
    pub fn data_offset(&self, pointer: u32) -> usize {
        (pointer - self.header.node_count) as usize + self.header.tree_size
    }

    fn find_ipv4_start(&self) -> Result<u32> {
        let mut node = 0u32;
        for _ in 0..IPV4_SUBTREE_DEPTH {
            if node >= self.header.node_count {
                break;
            }
            node = self.read_node(node, 0)?;
        }
        Ok(node)
    }
}

fn be24(b: &[u8]) -> u32 {
    ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | (b[2] as u32)
}
