//! MMDB Binary Format Parsing
//!
//! Locates the metadata section at the end of the file and turns the decoded
//! metadata map into a fixed-field [`Metadata`] record.
//!
//! ```text
//! [search tree][16 zero bytes][data section]["\xAB\xCD\xEFMaxMind.com"][metadata map]
//! ```

use super::types::{IpVersion, RecordSize, METADATA_MARKER, METADATA_MAX_SIZE};
use crate::data_section::{DataDecoder, DataValue};
use crate::error::{MmdbError, Result};
use crate::source::ByteSource;
use serde::Serialize;
use std::collections::HashMap;

/// Find the offset of the first byte after the metadata marker
///
/// The marker appears somewhere in the last 128KB of the file. If there are
/// several, the one closest to the end wins.
pub fn find_metadata_start(source: &dyn ByteSource) -> Result<usize> {
    let size = source.size();
    let window = size.min(METADATA_MAX_SIZE);
    let search_start = size - window;

    let haystack = source.read(search_start, window)?;
    match memchr::memmem::rfind(&haystack, METADATA_MARKER) {
        Some(index) => Ok(search_start + index + METADATA_MARKER.len()),
        None => Err(MmdbError::InvalidDatabase(
            "Metadata section not found. Is this a valid MaxMind DB file?".to_string(),
        )),
    }
}

/// Database-wide parameters, decoded once when the database is opened
///
/// See https://maxmind.github.io/MaxMind-DB/#database-metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metadata {
    /// Number of nodes in the search tree
    pub node_count: u32,
    /// Bit size of a record in the search tree
    pub record_size: RecordSize,
    /// IPv4-only, or IPv6 (which may also answer IPv4 lookups)
    pub ip_version: IpVersion,
    /// Database type, e.g. "GeoIP2-City"
    pub database_type: String,
    /// Locale codes the records may contain names for
    pub languages: Vec<String>,
    /// Major version of the binary format
    pub binary_format_major_version: u16,
    /// Minor version of the binary format
    pub binary_format_minor_version: u16,
    /// Unix epoch of the build time
    pub build_epoch: u64,
    /// Locale -> description text
    pub description: HashMap<String, String>,
}

impl Metadata {
    /// Locate and decode the metadata of a database
    ///
    /// Pointers inside the metadata map are relative to the metadata start.
    pub fn from_source(source: &dyn ByteSource) -> Result<Self> {
        let start = find_metadata_start(source)?;
        log::trace!("metadata section starts at offset {}", start);

        let decoder = DataDecoder::new(source, start);
        let (value, _) = decoder.decode(start)?;
        Self::from_value(&value)
    }

    /// Build the record from an already decoded metadata map
    ///
    /// `node_count`, `record_size` and `ip_version` are required; the
    /// descriptive fields default to empty when absent.
    pub fn from_value(value: &DataValue) -> Result<Self> {
        let map = value
            .as_map()
            .ok_or_else(|| invalid_metadata("metadata is not a map".to_string()))?;

        let node_count = required_uint(map, "node_count")?;
        let node_count = u32::try_from(node_count)
            .map_err(|_| invalid_metadata(format!("node_count {} is too large", node_count)))?;

        Ok(Metadata {
            node_count,
            record_size: RecordSize::from_bits(required_uint(map, "record_size")?)?,
            ip_version: IpVersion::from_number(required_uint(map, "ip_version")?)?,
            database_type: optional_string(map, "database_type")?.unwrap_or_default(),
            languages: optional_languages(map)?,
            binary_format_major_version: optional_u16(map, "binary_format_major_version")?,
            binary_format_minor_version: optional_u16(map, "binary_format_minor_version")?,
            build_epoch: optional_uint(map, "build_epoch")?.unwrap_or(0),
            description: optional_description(map)?,
        })
    }

    /// Size of one node (two records) in bytes
    pub fn node_byte_size(&self) -> usize {
        self.record_size.node_bytes()
    }

    /// Size of the whole search tree in bytes
    pub fn search_tree_size(&self) -> usize {
        self.node_count as usize * self.node_byte_size()
    }
}

fn invalid_metadata(msg: String) -> MmdbError {
    MmdbError::InvalidDatabase(format!("Invalid metadata: {}", msg))
}

// Helper functions to extract values from the metadata map

fn optional_uint(map: &HashMap<String, DataValue>, key: &str) -> Result<Option<u64>> {
    match map.get(key) {
        None => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| {
            invalid_metadata(format!(
                "field '{}' is not an unsigned integer ({})",
                key,
                value.type_name()
            ))
        }),
    }
}

fn required_uint(map: &HashMap<String, DataValue>, key: &str) -> Result<u64> {
    optional_uint(map, key)?
        .ok_or_else(|| invalid_metadata(format!("required field '{}' not found", key)))
}

fn optional_u16(map: &HashMap<String, DataValue>, key: &str) -> Result<u16> {
    let n = optional_uint(map, key)?.unwrap_or(0);
    u16::try_from(n).map_err(|_| invalid_metadata(format!("field '{}' out of range: {}", key, n)))
}

fn optional_string(map: &HashMap<String, DataValue>, key: &str) -> Result<Option<String>> {
    match map.get(key) {
        None => Ok(None),
        Some(DataValue::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(invalid_metadata(format!(
            "field '{}' is not a string ({})",
            key,
            other.type_name()
        ))),
    }
}

fn optional_languages(map: &HashMap<String, DataValue>) -> Result<Vec<String>> {
    let items = match map.get("languages") {
        None => return Ok(Vec::new()),
        Some(DataValue::Array(items)) => items,
        Some(other) => {
            return Err(invalid_metadata(format!(
                "field 'languages' is not an array ({})",
                other.type_name()
            )))
        }
    };

    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| invalid_metadata("languages must be strings".to_string()))
        })
        .collect()
}

fn optional_description(map: &HashMap<String, DataValue>) -> Result<HashMap<String, String>> {
    let entries = match map.get("description") {
        None => return Ok(HashMap::new()),
        Some(DataValue::Map(entries)) => entries,
        Some(other) => {
            return Err(invalid_metadata(format!(
                "field 'description' is not a map ({})",
                other.type_name()
            )))
        }
    };

    entries
        .iter()
        .map(|(locale, text)| {
            text.as_str()
                .map(|t| (locale.clone(), t.to_string()))
                .ok_or_else(|| invalid_metadata("descriptions must be strings".to_string()))
        })
        .collect()
}
