//
// Copyright (c) 2025 Nathan Fiedler
//

//! Error type shared by every stage of block map generation.

use std::io;
use std::path::{Path, PathBuf};

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

///
/// The error type returned while chunking, digesting, and packaging a file.
///
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A file operation failed on a known path.
    #[error("failed to {op} {}: {source}", .path.display())]
    Io {
        /// Operation being performed, such as `open` or `append to`.
        op: &'static str,
        /// File the operation was applied to.
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Reading from the chunk source failed.
    #[error("read error: {0}")]
    Read(#[from] io::Error),

    /// The chunk sizes do not add up to the size of the file on disk.
    #[error("expected size sum: {expected}. Actual: {actual}")]
    SizeMismatch {
        /// Size of the file according to its metadata.
        expected: u64,
        /// Sum of all chunk sizes.
        actual: u64,
    },

    /// The compression name is neither `gzip` nor `deflate`.
    #[error("unknown compression format {0}")]
    UnknownCompression(String),

    /// The chunker parameters are inconsistent.
    #[error("invalid chunker configuration: {0}")]
    InvalidConfiguration(String),

    /// An embedded or standalone block map could not be decoded.
    #[error("malformed block map: {0}")]
    Malformed(String),

    #[error("block map serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns a closure that wraps an [`io::Error`] with the operation and
    /// path, for use with `map_err`.
    pub fn io<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> Error + 'a {
        move |source| Error::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Attaches `path` to a bare read error; other errors pass through.
    pub(crate) fn with_path(self, op: &'static str, path: &Path) -> Error {
        match self {
            Error::Read(source) => Error::Io {
                op,
                path: path.to_path_buf(),
                source,
            },
            other => other,
        }
    }
}

impl From<Error> for io::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::Io { source, .. } | Error::Read(source) => source,
            Error::Json(err) => err.into(),
            other => Self::new(io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}
