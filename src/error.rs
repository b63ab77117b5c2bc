//! Error types for irrfind.
//!
//! Identification failures (`Format`, `UnsupportedBase`) are fatal for the
//! path being opened. `UnknownStream` is informational: searches continue
//! without write-back. Scan-time I/O failures surface as `SearchIo` and are
//! never retried.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The file has no recognizable radix point or header.
    #[error("invalid digit file {path}: {reason}")]
    Format { path: PathBuf, reason: String },

    /// The file encodes digits in a base other than 10 or 16.
    #[error("unsupported base {base} in {path}")]
    UnsupportedBase { path: PathBuf, base: u32 },

    /// The constant could not be named, so it has no index namespace.
    #[error("unknown constant in {0}")]
    UnknownStream(PathBuf),

    /// Reading or mapping the digit file failed mid-search.
    #[error("I/O error while scanning {path}: {source}")]
    SearchIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The stream was used after `close()`.
    #[error("digit stream {0} is closed")]
    ClosedStream(PathBuf),

    /// Patterns must contain at least one byte.
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    /// Pattern index storage failure.
    #[error("pattern index error: {0}")]
    Index(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn search_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::SearchIo {
            path: path.into(),
            source,
        }
    }

    /// Whether the failure happened while identifying a file, before any
    /// stream existed.
    pub fn is_identification(&self) -> bool {
        matches!(self, Self::Format { .. } | Self::UnsupportedBase { .. })
    }
}
