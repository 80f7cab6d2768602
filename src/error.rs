//! Reader-level error types

use std::path::PathBuf;

use parsely_core::{FormatId, RegistryError, TypeTag};
use thiserror::Error;

/// Errors surfaced by [`FileReader`](crate::FileReader) and friends.
///
/// Per-frame decode failures never show up here; they come back as
/// [`ReadItem::Skip`](crate::ReadItem::Skip). Everything below is either a
/// configuration fault or terminal for the reader that raised it.
#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// No valid frame found within the resynchronisation window
    #[error("Stream corrupt at offset {offset}: no valid frame within {window} bytes")]
    StreamCorruption { offset: u64, window: u64 },

    /// Raised only under the fatal unknown-type policy
    #[error("Unknown {format} datagram type {tag} at offset {offset}")]
    UnknownType { format: FormatId, tag: TypeTag, offset: u64 },

    #[error("Reader is closed")]
    Closed,

    #[error("Reading cancelled at offset {offset}")]
    Cancelled { offset: u64 },

    #[error("Cannot detect the format of {}", path.display())]
    FormatDetection { path: PathBuf },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Index file error: {0}")]
    Index(String),
}

impl ReaderError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ReaderError::Io {
            path: path.into(),
            source,
        }
    }

    /// Errors after which the reader yields nothing more
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReaderError::StreamCorruption { .. } | ReaderError::Closed | ReaderError::Cancelled { .. }
        )
    }
}

impl From<bincode::Error> for ReaderError {
    fn from(e: bincode::Error) -> Self {
        ReaderError::Index(e.to_string())
    }
}

/// Errors raised while feeding records to a [`FormatConverter`](crate::convert::FormatConverter)
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error(transparent)]
    Reader(#[from] ReaderError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Output error on {}: {source}", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
