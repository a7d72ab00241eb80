//! MaxMind DB (MMDB) Reader internals
//!
//! The MMDB format uses a binary search tree for efficient IP address
//! lookups. Data is stored in the MMDB data section format, decoded by
//! `crate::data_section::DataDecoder`.
//!
//! ## Architecture
//!
//! - **types**: MMDB-specific types and constants
//! - **format**: Metadata marker search and the metadata record
//! - **tree**: Search tree traversal for IP lookups

pub mod format;
pub mod tree;
pub mod types;

pub use format::{find_metadata_start, Metadata};
pub use tree::{MmdbHeader, SearchTree};
pub use types::{IpVersion, RecordSize, DATA_SECTION_SEPARATOR_SIZE, METADATA_MARKER};
