//! File-backed byte source
//!
//! Reads on demand with positional reads (`pread`), which never touch the
//! shared file cursor: lookups from many threads need no lock and the handle
//! stays usable after `fork`. Platforms without positional reads fall back to
//! seek + read behind a single mutex. That fallback is not fork-safe, since a
//! duplicated descriptor shares its cursor with the parent.

use super::{check_bounds, short_read, ByteSource};
use crate::error::{MmdbError, Result};
use std::borrow::Cow;
use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;

#[cfg(unix)]
struct PositionalFile(File);

#[cfg(unix)]
impl PositionalFile {
    fn new(file: File) -> Self {
        PositionalFile(file)
    }

    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.0.read_exact_at(buf, offset)
    }
}

#[cfg(not(unix))]
struct PositionalFile(parking_lot::Mutex<File>);

#[cfg(not(unix))]
impl PositionalFile {
    fn new(file: File) -> Self {
        PositionalFile(parking_lot::Mutex::new(file))
    }

    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        use std::io::{Read, Seek, SeekFrom};
        let mut file = self.0.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }
}

/// A database read from disk on demand
pub struct FileSource {
    file: Option<PositionalFile>,
    size: usize,
}

impl FileSource {
    /// Open a database file for positional reads
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len() as usize;
        Ok(Self {
            file: Some(PositionalFile::new(file)),
            size,
        })
    }
}

impl ByteSource for FileSource {
    fn size(&self) -> usize {
        self.size
    }

    fn read(&self, offset: usize, len: usize) -> Result<Cow<'_, [u8]>> {
        let file = self.file.as_ref().ok_or(MmdbError::Closed)?;
        if len == 0 {
            return Ok(Cow::Owned(Vec::new()));
        }
        check_bounds(offset, len, self.size)?;

        let mut buf = vec![0u8; len];
        match file.read_exact_at(&mut buf, offset as u64) {
            Ok(()) => Ok(Cow::Owned(buf)),
            // The file shrank underneath us
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(short_read()),
            Err(e) => Err(MmdbError::Io(e)),
        }
    }

    fn close(&mut self) {
        self.file = None;
    }
}

impl fmt::Debug for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSource")
            .field("size", &self.size)
            .field("closed", &self.file.is_none())
            .finish()
    }
}
