//! Memory-resident byte source
//!
//! Holds the whole database either as an owned buffer (read eagerly or handed
//! in by the caller) or as a read-only memory map. Reads borrow straight from
//! the buffer, so concurrent lookups need no synchronization at all.

use super::{check_bounds, ByteSource};
use crate::error::{MmdbError, Result};
use memmap2::Mmap;
use std::borrow::Cow;
use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;

/// Storage for database data - either owned or memory-mapped
enum Storage {
    Owned(Vec<u8>),
    Mapped(Mmap),
}

impl Storage {
    fn as_slice(&self) -> &[u8] {
        match self {
            Storage::Owned(v) => v.as_slice(),
            Storage::Mapped(m) => &m[..],
        }
    }
}

/// A database held entirely in memory
pub struct MemorySource {
    storage: Option<Storage>,
    size: usize,
}

impl MemorySource {
    /// Wrap a buffer that already contains a database
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let size = data.len();
        Self {
            storage: Some(Storage::Owned(data)),
            size,
        }
    }

    /// Read the whole file into an owned buffer
    pub fn read_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(Self::from_bytes(std::fs::read(path)?))
    }

    /// Memory-map the file read-only
    ///
    /// Pages are shared between every process mapping the same file.
    pub fn map_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        // SAFETY: the map is read-only; the file must not be truncated while mapped
        let mmap = unsafe { Mmap::map(&file)? };
        let size = mmap.len();
        Ok(Self {
            storage: Some(Storage::Mapped(mmap)),
            size,
        })
    }

    /// True if this source is backed by a memory map
    pub fn is_mapped(&self) -> bool {
        matches!(self.storage, Some(Storage::Mapped(_)))
    }
}

impl ByteSource for MemorySource {
    fn size(&self) -> usize {
        self.size
    }

    fn read(&self, offset: usize, len: usize) -> Result<Cow<'_, [u8]>> {
        let data = self.storage.as_ref().ok_or(MmdbError::Closed)?.as_slice();
        check_bounds(offset, len, data.len())?;
        Ok(Cow::Borrowed(&data[offset..offset + len]))
    }

    fn close(&mut self) {
        self.storage = None;
    }
}

// Never print the buffer itself
impl fmt::Debug for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySource")
            .field("size", &self.size)
            .field("mapped", &self.is_mapped())
            .field("closed", &self.storage.is_none())
            .finish()
    }
}
