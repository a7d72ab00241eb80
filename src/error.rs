//! Error types for the mmdb-reader library

use thiserror::Error;

/// Result type alias for database operations
pub type Result<T> = std::result::Result<T, MmdbError>;

/// Main error type for opening and querying MaxMind DB files
#[derive(Error, Debug)]
pub enum MmdbError {
    /// The file is corrupt or is not a MaxMind DB file
    #[error("{0}")]
    InvalidDatabase(String),

    /// Malformed caller input (bad address text, IPv6 lookup in an IPv4 database)
    #[error("{0}")]
    InvalidArgument(String),

    /// Failure opening or reading the underlying file
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The byte source has been closed
    #[error("closed stream")]
    Closed,
}

impl MmdbError {
    /// Shorthand for the generic "bad data section" failure
    pub(crate) fn bad_data() -> Self {
        MmdbError::InvalidDatabase(
            "The MaxMind DB file's data section contains bad data (unknown data type or corrupt data)"
                .to_string(),
        )
    }

    /// True for structural corruption errors
    pub fn is_invalid_database(&self) -> bool {
        matches!(self, MmdbError::InvalidDatabase(_))
    }

    /// True for errors caused by the caller's input
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, MmdbError::InvalidArgument(_))
    }

    /// True when the operation ran against a closed database
    pub fn is_closed(&self) -> bool {
        matches!(self, MmdbError::Closed)
    }
}
