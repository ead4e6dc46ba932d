use std::io;

use thiserror::Error as ThisError;

/// The error taxonomy surfaced by the public API.
///
/// A missing key is not an error (`get` returns `Ok(None)`), so there is
/// no `NotFound` variant. I/O errors carry the formatted cause rather
/// than the `io::Error` itself so that one failure can be cloned to every
/// writer in a failed batch and latched as the background error.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum Error {
    /// Checksum mismatches, malformed wire data, impossible file states.
    #[error("corruption: {0}")]
    Corruption(String),

    /// Caller misuse: bad open options, comparator mismatch.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A feature the build or format version does not provide.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// An operating-system level failure.
    #[error("io error: {0}")]
    Io(String),

    /// The database is shutting down; the operation was not performed.
    #[error("shutting down")]
    ShuttingDown,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<codec::CodecError> for Error {
    fn from(err: codec::CodecError) -> Self {
        Error::Corruption(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
