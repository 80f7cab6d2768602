//! Error types for datagram parsing

use thiserror::Error;

use crate::format::FormatId;
use crate::tag::TypeTag;

/// Errors that can occur while demarcating or decoding a single datagram.
///
/// Every variant is local to one frame: the reader reports it as a skip and
/// keeps walking the stream.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// No catalog entry exists for the tag under this format
    #[error("Unknown {format} datagram type: {tag}")]
    UnknownType { format: FormatId, tag: TypeTag },

    /// Fewer bytes remain than an item needs
    #[error("Truncated {context}: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        context: String,
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// A decoded value violates a declared constraint
    #[error("Invalid field {record}.{field}: {reason}")]
    FieldValidation {
        record: &'static str,
        field: String,
        reason: String,
    },

    /// Bytes consumed differ from the span reserved for them
    #[error("Size mismatch for {context}: expected {expected} bytes, consumed {consumed}")]
    SizeMismatch {
        context: String,
        expected: usize,
        consumed: usize,
    },

    /// Trailing length or checksum disagrees with the frame header
    #[error("Bookend mismatch: header says {leading:#x}, trailer says {trailing:#x}")]
    BookendMismatch { leading: u64, trailing: u64 },

    /// Header does not parse as a frame of this format
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
}

impl ParseError {
    pub(crate) fn truncated(context: impl Into<String>, offset: usize, needed: usize, available: usize) -> Self {
        ParseError::Truncated {
            context: context.into(),
            offset,
            needed,
            available,
        }
    }

    /// Short machine-friendly name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            ParseError::UnknownType { .. } => "unknown_type",
            ParseError::Truncated { .. } => "truncated",
            ParseError::FieldValidation { .. } => "field_validation",
            ParseError::SizeMismatch { .. } => "size_mismatch",
            ParseError::BookendMismatch { .. } => "bookend_mismatch",
            ParseError::InvalidHeader(_) => "invalid_header",
        }
    }
}

/// Configuration-time errors raised while loading catalogs
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A catalog for this format is already registered
    #[error("Catalog for format {0} is already registered")]
    DuplicateFormat(FormatId),

    /// No catalog is registered for this format
    #[error("No catalog registered for format {0}")]
    UnknownFormat(FormatId),
}

/// Failure reported by a [`ByteSource`](crate::source::ByteSource)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Source read failed at offset {offset}: {message}")]
pub struct SourceError {
    pub offset: u64,
    pub message: String,
}

impl SourceError {
    pub fn new(offset: u64, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

/// Errors that stop the stream demarcator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DemarcateError {
    /// Corruption could not be resynchronised within the scan window
    #[error("Stream corrupt at offset {offset}: no valid frame within {window} bytes")]
    StreamCorruption { offset: u64, window: u64 },

    /// The cancellation flag was raised during a scan
    #[error("Scan cancelled at offset {offset}")]
    Cancelled { offset: u64 },

    /// The underlying source failed
    #[error(transparent)]
    Source(#[from] SourceError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = ParseError::UnknownType {
            format: FormatId::Kmall,
            tag: TypeTag::ascii(*b"#XYZ"),
        };
        assert_eq!(e.to_string(), "Unknown KMALL datagram type: #XYZ");

        let e = ParseError::truncated("SPO.sensor_data", 40, 12, 3);
        assert_eq!(
            e.to_string(),
            "Truncated SPO.sensor_data: needed 12 bytes at offset 40, 3 available"
        );
        assert_eq!(e.kind(), "truncated");
    }

    #[test]
    fn test_registry_error_display() {
        let e = RegistryError::DuplicateFormat(FormatId::S7k);
        assert_eq!(e.to_string(), "Catalog for format S7K is already registered");
    }
}
