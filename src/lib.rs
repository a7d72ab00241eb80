//! mmdb-reader - Fast Longest-Prefix IP Lookups over MaxMind DB Files
//!
//! Reads MaxMind DB (MMDB) files: a binary search tree over address bits
//! that resolves an IP address to the record of its most specific
//! enclosing network, plus a self-describing data section holding the
//! records themselves.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mmdb_reader::{Database, OpenMode};
//!
//! let db = Database::builder("GeoLite2-City.mmdb")
//!     .mode(OpenMode::Memory)
//!     .open()?;
//!
//! println!("{} ({} nodes)", db.metadata().database_type, db.metadata().node_count);
//!
//! match db.get_with_prefix_length("1.1.1.1")? {
//!     (Some(record), prefix_len) => println!("/{}: {:?}", prefix_len, record),
//!     (None, prefix_len) => println!("no record (searched {} bits)", prefix_len),
//! }
//! # Ok::<(), mmdb_reader::MmdbError>(())
//! ```
//!
//! # Open Modes
//!
//! - [`OpenMode::File`] (and [`OpenMode::Auto`]): positional reads on the
//!   open file, low memory use
//! - [`OpenMode::Memory`]: the whole file is read into an owned buffer
//! - [`OpenMode::Mmap`]: the file is memory-mapped
//!
//! An already loaded buffer is opened with [`Database::from_bytes`].
//!
//! # Thread Safety
//!
//! [`Database`] is `Send + Sync`. Lookups take `&self` and can run
//! concurrently; [`Database::close`] takes `&mut self`.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Data section decoding
pub mod data_section;
/// Database API
pub mod database;
/// Error types
pub mod error;
/// MMDB format implementation (tree, metadata)
pub mod mmdb;
/// Raw byte access (file, buffer, memory map)
pub mod source;

// Re-exports for Rust consumers

pub use crate::data_section::{DataDecoder, DataValue, MAX_DECODE_DEPTH};
pub use crate::database::{Database, DatabaseOpener, OpenMode};
pub use crate::error::{MmdbError, Result};
pub use crate::mmdb::{IpVersion, Metadata, RecordSize};
pub use crate::source::{ByteSource, FileSource, MemorySource};

// Version information
/// Library version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
