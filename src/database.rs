//! Database API
//!
//! Ties the byte source, metadata, search tree and data decoder together
//! behind the lookup operations.
//!
//! # Examples
//!
//! ```no_run
//! use mmdb_reader::{Database, OpenMode};
//!
//! let db = Database::builder("GeoLite2-City.mmdb")
//!     .mode(OpenMode::Memory)
//!     .open()?;
//!
//! if let Some(record) = db.get("8.8.8.8")? {
//!     println!("{}", record.get("country").and_then(|c| c.get("iso_code")).is_some());
//! }
//! # Ok::<(), mmdb_reader::MmdbError>(())
//! ```

use crate::data_section::{DataDecoder, DataValue};
use crate::error::{MmdbError, Result};
use crate::mmdb::{IpVersion, Metadata, MmdbHeader, SearchTree};
use crate::source::{ByteSource, FileSource, MemorySource};
use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// How a database file is accessed
///
/// A database that is already in memory (buffer mode) is not opened from a
/// path; pass its bytes to [`Database::from_bytes`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Pick the default strategy (currently [`OpenMode::File`])
    #[default]
    Auto,
    /// Positional reads against the open file
    File,
    /// Read the whole file into memory
    Memory,
    /// Memory-map the file
    Mmap,
}

impl OpenMode {
    /// Name used on the command line
    pub fn as_str(self) -> &'static str {
        match self {
            OpenMode::Auto => "auto",
            OpenMode::File => "file",
            OpenMode::Memory => "memory",
            OpenMode::Mmap => "mmap",
        }
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpenMode {
    type Err = MmdbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(OpenMode::Auto),
            "file" => Ok(OpenMode::File),
            "memory" => Ok(OpenMode::Memory),
            "mmap" => Ok(OpenMode::Mmap),
            "buffer" => Err(MmdbError::InvalidArgument(format!(
                "Unsupported mode: {} (open an in-memory buffer with Database::from_bytes)",
                s
            ))),
            _ => Err(MmdbError::InvalidArgument(format!(
                "Unsupported mode: {} (expected auto, file, memory or mmap)",
                s
            ))),
        }
    }
}

/// Builder for opening a database file
///
/// Created by [`Database::builder`].
#[derive(Debug, Clone)]
pub struct DatabaseOpener {
    path: PathBuf,
    mode: OpenMode,
}

impl DatabaseOpener {
    /// Select the access strategy
    pub fn mode(mut self, mode: OpenMode) -> Self {
        self.mode = mode;
        self
    }

    /// Open the file and load its metadata
    pub fn open(self) -> Result<Database> {
        let source: Box<dyn ByteSource> = match self.mode {
            OpenMode::Auto | OpenMode::File => Box::new(FileSource::open(&self.path)?),
            OpenMode::Memory => Box::new(MemorySource::read_file(&self.path)?),
            OpenMode::Mmap => Box::new(MemorySource::map_file(&self.path)?),
        };
        log::debug!("opening {} in {} mode", self.path.display(), self.mode);
        Database::from_source(source, self.mode)
    }
}

/// A MaxMind DB file opened for lookups
///
/// Lookups take `&self` and may run from many threads at once. Each lookup
/// builds its own tree walker and decoder, so there is no shared cursor.
///
/// # Examples
///
/// ```no_run
/// use mmdb_reader::Database;
///
/// let db = Database::open("GeoLite2-Country.mmdb")?;
/// let (record, prefix_len) = db.get_with_prefix_length("1.1.1.1")?;
/// println!("{:?} /{}", record, prefix_len);
/// # Ok::<(), mmdb_reader::MmdbError>(())
/// ```
pub struct Database {
    source: Box<dyn ByteSource>,
    mode: OpenMode,
    metadata: Metadata,
    header: MmdbHeader,
    size: usize,
    closed: bool,
}

impl Database {
    /// Open a database file with the default mode
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::builder(path).open()
    }

    /// Start configuring how a database file is opened
    pub fn builder<P: AsRef<Path>>(path: P) -> DatabaseOpener {
        DatabaseOpener {
            path: path.as_ref().to_path_buf(),
            mode: OpenMode::Auto,
        }
    }

    /// Open a database file with an explicit mode
    pub fn open_with_mode<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<Self> {
        Self::builder(path).mode(mode).open()
    }

    /// Use an already loaded database buffer
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        log::debug!("opening in-memory buffer of {} bytes", data.len());
        Self::from_source(Box::new(MemorySource::from_bytes(data)), OpenMode::Memory)
    }

    /// Build a database on top of any byte source
    ///
    /// The source is closed again if its metadata cannot be loaded.
    pub fn from_source(mut source: Box<dyn ByteSource>, mode: OpenMode) -> Result<Self> {
        let loaded = Metadata::from_source(&*source)
            .and_then(|metadata| MmdbHeader::new(&*source, &metadata).map(|h| (metadata, h)));

        let (metadata, header) = match loaded {
            Ok(parts) => parts,
            Err(e) => {
                source.close();
                return Err(e);
            }
        };

        let size = source.size();
        log::debug!(
            "loaded {} database: {} bytes, {} nodes, {}-bit records, IPv{}",
            if metadata.database_type.is_empty() {
                "untyped"
            } else {
                &metadata.database_type
            },
            size,
            metadata.node_count,
            metadata.record_size.bits(),
            metadata.ip_version.number()
        );

        Ok(Self {
            source,
            mode,
            metadata,
            header,
            size,
            closed: false,
        })
    }

    /// Look up the record for an address given as text
    pub fn get(&self, ip: &str) -> Result<Option<DataValue>> {
        Ok(self.get_with_prefix_length(ip)?.0)
    }

    /// Look up the record for an address and the prefix length it matched on
    ///
    /// When nothing matched, the prefix length is the depth the tree walk
    /// reached.
    pub fn get_with_prefix_length(&self, ip: &str) -> Result<(Option<DataValue>, u8)> {
        self.get_ip_with_prefix_length(parse_address(ip)?)
    }

    /// Look up the record for an already parsed address
    pub fn get_ip(&self, ip: IpAddr) -> Result<Option<DataValue>> {
        Ok(self.get_ip_with_prefix_length(ip)?.0)
    }

    /// Look up the record and prefix length for an already parsed address
    pub fn get_ip_with_prefix_length(&self, ip: IpAddr) -> Result<(Option<DataValue>, u8)> {
        if self.closed {
            return Err(MmdbError::Closed);
        }
        if ip.is_ipv6() && self.header.ip_version == IpVersion::V4 {
            return Err(MmdbError::InvalidArgument(format!(
                "Error looking up {}. You attempted to look up an IPv6 address in an IPv4-only database.",
                ip
            )));
        }

        let tree = SearchTree::new(&*self.source, &self.header);
        let (pointer, prefix_len) = tree.lookup(ip)?;
        if pointer == 0 {
            return Ok((None, prefix_len));
        }

        let offset = tree.data_offset(pointer);
        if offset >= self.size {
            return Err(MmdbError::InvalidDatabase(
                "The MaxMind DB file's search tree is corrupt".to_string(),
            ));
        }

        let decoder = DataDecoder::new(&*self.source, self.header.data_section_start());
        let (value, _) = decoder.decode(offset)?;
        Ok((Some(value), prefix_len))
    }

    /// Database metadata (available even after [`Database::close`])
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// The mode the database was opened with
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Size of the database in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// True once [`Database::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Release the underlying file or buffer
    ///
    /// Later lookups fail with [`MmdbError::Closed`]. Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.source.close();
        self.closed = true;
        log::debug!("closed {} byte database", self.size);
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("mode", &self.mode)
            .field("size", &self.size)
            .field("node_count", &self.header.node_count)
            .field("record_size", &self.header.record_size)
            .field("ip_version", &self.header.ip_version)
            .field("closed", &self.closed)
            .finish()
    }
}

fn parse_address(ip: &str) -> Result<IpAddr> {
    ip.parse()
        .map_err(|_| MmdbError::InvalidArgument(format!("invalid address: {}", ip)))
}
