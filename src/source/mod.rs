//! Raw byte access to a database
//!
//! Everything above this layer (tree walk, data decoding, metadata) reads the
//! database exclusively through [`ByteSource::read`], so file-backed and
//! memory-resident databases behave identically.
//!
//! - **file**: positional reads against an open file handle
//! - **memory**: an owned buffer or a read-only memory map

mod file;
mod memory;

pub use file::FileSource;
pub use memory::MemorySource;

use crate::error::{MmdbError, Result};
use std::borrow::Cow;

/// Random-access, read-only view of database bytes
///
/// Implementations must be safe to `read` from many threads at once. `close`
/// takes `&mut self`, so it can never race with an in-flight read.
pub trait ByteSource: Send + Sync {
    /// Total length of the database in bytes
    fn size(&self) -> usize;

    /// Read exactly `len` bytes starting at `offset`
    ///
    /// Fails with [`MmdbError::InvalidDatabase`] if fewer than `len` bytes are
    /// available, and with [`MmdbError::Closed`] after [`ByteSource::close`].
    fn read(&self, offset: usize, len: usize) -> Result<Cow<'_, [u8]>>;

    /// Release the underlying resources. Calling it again is a no-op.
    fn close(&mut self);

    /// Read a single byte
    fn read_byte(&self, offset: usize) -> Result<u8> {
        let buf = self.read(offset, 1)?;
        Ok(buf[0])
    }
}

/// Error for a read request that runs past the available bytes
pub(crate) fn short_read() -> MmdbError {
    MmdbError::InvalidDatabase("The MaxMind DB file contains bad data".to_string())
}

/// Check that `offset..offset + len` lies inside a source of `size` bytes
pub(crate) fn check_bounds(offset: usize, len: usize, size: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(short_read()),
    }
}
