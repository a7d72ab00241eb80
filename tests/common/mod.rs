//! Test-only MMDB writer
//!
//! Assembles small databases in memory so the reader can be exercised
//! without shipping binary fixtures. Networks are inserted into an arena
//! trie, records are packed at 24/28/32 bits, and values are encoded with
//! the same control-byte scheme the reader decodes.

#![allow(dead_code)]

use mmdb_reader::mmdb::METADATA_MARKER;
use mmdb_reader::DataValue;
use std::collections::HashMap;
use std::io::Write;
use std::net::IpAddr;
use tempfile::NamedTempFile;

/// Child of a trie node
#[derive(Debug, Clone, Copy, PartialEq)]
enum NodePointer {
    Empty,
    Node(usize),
    Data(usize),
}

/// Builds an MMDB file from CIDR -> value entries
pub struct MmdbWriter {
    ip_version: u8,
    record_size: u16,
    database_type: String,
    entries: Vec<(Vec<u8>, u8, DataValue)>,
}

impl MmdbWriter {
    pub fn new(ip_version: u8, record_size: u16) -> Self {
        Self {
            ip_version,
            record_size,
            database_type: "Test".to_string(),
            entries: Vec::new(),
        }
    }

    pub fn database_type(mut self, database_type: &str) -> Self {
        self.database_type = database_type.to_string();
        self
    }

    /// Add a network such as "1.1.1.2/31" or "::2:0:40/124"
    ///
    /// IPv4 networks in an IPv6 database are stored under `::/96`.
    pub fn insert(&mut self, cidr: &str, value: DataValue) {
        let (addr, prefix) = cidr.split_once('/').unwrap_or((cidr, ""));
        let addr: IpAddr = addr.parse().expect("valid network address");

        let (bytes, max_prefix) = match addr {
            IpAddr::V4(v4) if self.ip_version == 6 => {
                let mut bytes = vec![0u8; 12];
                bytes.extend_from_slice(&v4.octets());
                (bytes, 128u8)
            }
            IpAddr::V4(v4) => (v4.octets().to_vec(), 32u8),
            IpAddr::V6(v6) => {
                assert_eq!(self.ip_version, 6, "IPv6 network in an IPv4 database");
                (v6.octets().to_vec(), 128u8)
            }
        };

        let mut prefix_len = if prefix.is_empty() {
            max_prefix
        } else {
            prefix.parse::<u8>().expect("valid prefix length")
        };
        if addr.is_ipv4() && self.ip_version == 6 {
            prefix_len += 96;
        }
        assert!(prefix_len > 0 && prefix_len <= max_prefix);

        self.entries.push((bytes, prefix_len, value));
    }

    /// Encode the whole database
    pub fn build(&self) -> Vec<u8> {
        let mut nodes: Vec<[NodePointer; 2]> = vec![[NodePointer::Empty; 2]];
        let mut data = Vec::new();

        // Shorter prefixes first so more specific networks split them
        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_by_key(|(_, prefix_len, _)| *prefix_len);

        for (bytes, prefix_len, value) in entries {
            let offset = data.len();
            encode_value(value, &mut data);
            insert_network(&mut nodes, bytes, *prefix_len as usize, offset);
        }

        let tree = pack_tree(&nodes, self.record_size);
        let metadata = metadata_bytes(
            nodes.len() as u32,
            self.record_size,
            self.ip_version,
            &self.database_type,
        );
        assemble(&tree, &data, &metadata)
    }
}

fn bit_at(bytes: &[u8], depth: usize) -> usize {
    ((bytes[depth >> 3] >> (7 - (depth & 7))) & 1) as usize
}

fn insert_network(
    nodes: &mut Vec<[NodePointer; 2]>,
    bytes: &[u8],
    prefix_len: usize,
    data_offset: usize,
) {
    let mut node = 0;
    for depth in 0..prefix_len - 1 {
        let bit = bit_at(bytes, depth);
        node = match nodes[node][bit] {
            NodePointer::Node(next) => next,
            existing => {
                // Empty, or a shorter network that now has to be split
                let fill = match existing {
                    NodePointer::Data(_) => existing,
                    _ => NodePointer::Empty,
                };
                nodes.push([fill, fill]);
                let next = nodes.len() - 1;
                nodes[node][bit] = NodePointer::Node(next);
                next
            }
        };
    }
    let bit = bit_at(bytes, prefix_len - 1);
    nodes[node][bit] = NodePointer::Data(data_offset);
}

fn record_value(pointer: NodePointer, node_count: usize) -> u32 {
    match pointer {
        NodePointer::Empty => node_count as u32,
        NodePointer::Node(n) => n as u32,
        NodePointer::Data(offset) => (node_count + 16 + offset) as u32,
    }
}

/// Pack trie nodes into search tree bytes
fn pack_tree(nodes: &[[NodePointer; 2]], record_size: u16) -> Vec<u8> {
    let node_count = nodes.len();
    let mut out = Vec::new();
    for node in nodes {
        let left = record_value(node[0], node_count);
        let right = record_value(node[1], node_count);
        out.extend_from_slice(&pack_node(left, right, record_size));
    }
    out
}

/// Encode one node's two records
pub fn pack_node(left: u32, right: u32, record_size: u16) -> Vec<u8> {
    match record_size {
        24 => {
            let mut out = left.to_be_bytes()[1..].to_vec();
            out.extend_from_slice(&right.to_be_bytes()[1..]);
            out
        }
        28 => {
            let mut out = left.to_be_bytes()[1..].to_vec();
            out.push((((left >> 24) & 0x0F) << 4) as u8 | ((right >> 24) & 0x0F) as u8);
            out.extend_from_slice(&right.to_be_bytes()[1..]);
            out
        }
        32 => {
            let mut out = left.to_be_bytes().to_vec();
            out.extend_from_slice(&right.to_be_bytes());
            out
        }
        other => panic!("unsupported record size {}", other),
    }
}

/// Join the sections of a database file
pub fn assemble(tree: &[u8], data: &[u8], metadata: &[u8]) -> Vec<u8> {
    let mut out = tree.to_vec();
    out.extend_from_slice(&[0u8; 16]);
    out.extend_from_slice(data);
    out.extend_from_slice(METADATA_MARKER);
    out.extend_from_slice(metadata);
    out
}

/// Encode a standard metadata map
pub fn metadata_bytes(node_count: u32, record_size: u16, ip_version: u8, database_type: &str) -> Vec<u8> {
    let mut description = HashMap::new();
    description.insert("en".to_string(), s("Test Database"));

    let metadata = map(vec![
        ("node_count", DataValue::Uint32(node_count)),
        ("record_size", DataValue::Uint16(record_size)),
        ("ip_version", DataValue::Uint16(ip_version as u16)),
        ("database_type", s(database_type)),
        ("languages", DataValue::Array(vec![s("en"), s("zh")])),
        ("binary_format_major_version", DataValue::Uint16(2)),
        ("binary_format_minor_version", DataValue::Uint16(0)),
        ("build_epoch", DataValue::Uint64(1_700_000_000)),
        ("description", DataValue::Map(description)),
    ]);

    let mut out = Vec::new();
    encode_value(&metadata, &mut out);
    out
}

/// Write the control byte (and extended type / size bytes) of a value
pub fn encode_ctrl(type_num: u8, size: usize, out: &mut Vec<u8>) {
    let (size_bits, extra): (u8, Vec<u8>) = if size < 29 {
        (size as u8, Vec::new())
    } else if size < 285 {
        (29, vec![(size - 29) as u8])
    } else if size < 65_821 {
        (30, ((size - 285) as u16).to_be_bytes().to_vec())
    } else {
        (31, ((size - 65_821) as u32).to_be_bytes()[1..].to_vec())
    };

    if type_num <= 7 {
        out.push((type_num << 5) | size_bits);
    } else {
        out.push(size_bits);
        out.push(type_num - 7);
    }
    out.extend_from_slice(&extra);
}

fn trimmed(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

/// Encode a value in data section format
pub fn encode_value(value: &DataValue, out: &mut Vec<u8>) {
    match value {
        DataValue::Pointer(_) => panic!("pointers are written with encode_pointer"),
        DataValue::String(s) => {
            encode_ctrl(2, s.len(), out);
            out.extend_from_slice(s.as_bytes());
        }
        DataValue::Double(d) => {
            encode_ctrl(3, 8, out);
            out.extend_from_slice(&d.to_be_bytes());
        }
        DataValue::Bytes(b) => {
            encode_ctrl(4, b.len(), out);
            out.extend_from_slice(b);
        }
        DataValue::Uint16(n) => {
            let bytes = n.to_be_bytes();
            let b = trimmed(&bytes);
            encode_ctrl(5, b.len(), out);
            out.extend_from_slice(b);
        }
        DataValue::Uint32(n) => {
            let bytes = n.to_be_bytes();
            let b = trimmed(&bytes);
            encode_ctrl(6, b.len(), out);
            out.extend_from_slice(b);
        }
        DataValue::Map(entries) => {
            encode_ctrl(7, entries.len(), out);
            let mut keys: Vec<_> = entries.keys().collect();
            keys.sort();
            for key in keys {
                encode_value(&DataValue::String(key.clone()), out);
                encode_value(&entries[key], out);
            }
        }
        DataValue::Int32(n) => {
            encode_ctrl(8, 4, out);
            out.extend_from_slice(&n.to_be_bytes());
        }
        DataValue::Uint64(n) => {
            let bytes = n.to_be_bytes();
            let b = trimmed(&bytes);
            encode_ctrl(9, b.len(), out);
            out.extend_from_slice(b);
        }
        DataValue::Uint128(n) => {
            let bytes = n.to_be_bytes();
            let b = trimmed(&bytes);
            encode_ctrl(10, b.len(), out);
            out.extend_from_slice(b);
        }
        DataValue::Array(items) => {
            encode_ctrl(11, items.len(), out);
            for item in items {
                encode_value(item, out);
            }
        }
        DataValue::Bool(b) => encode_ctrl(14, *b as usize, out),
        DataValue::Float(f) => {
            encode_ctrl(15, 4, out);
            out.extend_from_slice(&f.to_be_bytes());
        }
    }
}

/// Encode a pointer to `target` (relative to the data section start)
pub fn encode_pointer(target: usize, out: &mut Vec<u8>) {
    if target < 2048 {
        out.push(0x20 | ((target >> 8) as u8 & 0x07));
        out.push(target as u8);
    } else if target < 526_336 {
        let v = target - 2048;
        out.push(0x28 | ((v >> 16) as u8 & 0x07));
        out.extend_from_slice(&(v as u32).to_be_bytes()[2..]);
    } else if target < 134_744_064 {
        let v = target - 526_336;
        out.push(0x30 | ((v >> 24) as u8 & 0x07));
        out.extend_from_slice(&(v as u32).to_be_bytes()[1..]);
    } else {
        out.push(0x38);
        out.extend_from_slice(&(target as u32).to_be_bytes());
    }
}

pub fn s(text: &str) -> DataValue {
    DataValue::String(text.to_string())
}

pub fn map(pairs: Vec<(&str, DataValue)>) -> DataValue {
    DataValue::Map(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}

/// `{"ip": text}`, the record shape used by the lookup fixtures
pub fn ip_record(text: &str) -> DataValue {
    map(vec![("ip", s(text))])
}

pub const IPV4_NETWORKS: &[(&str, &str)] = &[
    ("1.1.1.1/32", "1.1.1.1"),
    ("1.1.1.2/31", "1.1.1.2"),
    ("1.1.1.4/30", "1.1.1.4"),
    ("1.1.1.8/29", "1.1.1.8"),
    ("1.1.1.16/28", "1.1.1.16"),
    ("1.1.1.32/32", "1.1.1.32"),
];

pub const IPV6_NETWORKS: &[(&str, &str)] = &[
    ("::1:ffff:ffff/128", "::1:ffff:ffff"),
    ("::2:0:0/122", "::2:0:0"),
    ("::2:0:40/124", "::2:0:40"),
    ("::2:0:50/125", "::2:0:50"),
    ("::2:0:58/127", "::2:0:58"),
];

/// IPv4 fixture: `{"ip": network}` for each of [`IPV4_NETWORKS`]
pub fn ipv4_database(record_size: u16) -> Vec<u8> {
    let mut writer = MmdbWriter::new(4, record_size).database_type("Test");
    for (cidr, ip) in IPV4_NETWORKS {
        writer.insert(cidr, ip_record(ip));
    }
    writer.build()
}

/// IPv6 fixture holding both the IPv4 and IPv6 networks
pub fn mixed_database(record_size: u16) -> Vec<u8> {
    let mut writer = MmdbWriter::new(6, record_size).database_type("Test");
    for (cidr, ip) in IPV4_NETWORKS.iter().chain(IPV6_NETWORKS) {
        writer.insert(cidr, ip_record(ip));
    }
    writer.build()
}

/// Record exercising every data type
pub fn all_types_record() -> DataValue {
    map(vec![
        (
            "array",
            DataValue::Array(vec![
                DataValue::Uint32(1),
                DataValue::Uint32(2),
                DataValue::Uint32(3),
            ]),
        ),
        ("boolean", DataValue::Bool(true)),
        ("bytes", DataValue::Bytes(vec![0, 0, 0, 42])),
        ("double", DataValue::Double(42.123456)),
        ("float", DataValue::Float(1.1)),
        ("int32", DataValue::Int32(-268_435_456)),
        (
            "map",
            map(vec![(
                "mapX",
                map(vec![
                    (
                        "arrayX",
                        DataValue::Array(vec![
                            DataValue::Uint32(7),
                            DataValue::Uint32(8),
                            DataValue::Uint32(9),
                        ]),
                    ),
                    ("utf8_stringX", s("hello")),
                ]),
            )]),
        ),
        ("uint16", DataValue::Uint16(100)),
        ("uint32", DataValue::Uint32(268_435_456)),
        ("uint64", DataValue::Uint64(1_152_921_504_606_846_976)),
        (
            "uint128",
            DataValue::Uint128(1_329_227_995_784_915_872_903_807_060_280_344_576),
        ),
        ("utf8_string", s("unicode! ☯ - ♫")),
    ])
}

/// Record with every numeric field at zero and empty containers
pub fn zero_record() -> DataValue {
    map(vec![
        ("array", DataValue::Array(Vec::new())),
        ("boolean", DataValue::Bool(false)),
        ("bytes", DataValue::Bytes(Vec::new())),
        ("double", DataValue::Double(0.0)),
        ("float", DataValue::Float(0.0)),
        ("int32", DataValue::Int32(0)),
        ("map", DataValue::Map(HashMap::new())),
        ("uint16", DataValue::Uint16(0)),
        ("uint32", DataValue::Uint32(0)),
        ("uint64", DataValue::Uint64(0)),
        ("uint128", DataValue::Uint128(0)),
        ("utf8_string", s("")),
    ])
}

/// IPv6 database with [`all_types_record`] on 1.1.1.0/24 and
/// [`zero_record`] on ::0.0.0.0/128
pub fn decoder_database(record_size: u16) -> Vec<u8> {
    let mut writer = MmdbWriter::new(6, record_size).database_type("MaxMind DB Decoder Test");
    writer.insert("1.1.1.0/24", all_types_record());
    writer.insert("::/128", zero_record());
    writer.build()
}

/// Persist a database to a temporary file
pub fn write_temp(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp file");
    file.write_all(bytes).expect("write database");
    file.flush().expect("flush database");
    file
}
