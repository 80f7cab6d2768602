//! # Parsely
//!
//! Sequential reader for multibeam echosounder datagram files.
//!
//! This crate adds file I/O on top of [`parsely_core`]:
//! - [`FileReader`] walks a KMALL or S7K file one datagram at a time,
//!   reporting unknown or malformed datagrams as skips and resynchronising
//!   after corruption
//! - [`FileIndex`] maps every datagram type to its frames, with an optional
//!   sidecar so later opens skip the scan
//! - [`convert::FormatConverter`] is the seam for exporters;
//!   [`convert::ColumnarSink`] is an in-memory reference implementation
//! - [`parallel::read_files`] reads many files at once, one reader each
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        parsely                           │
//! │  ┌──────────────┐  ┌─────────────┐  ┌──────────────────┐ │
//! │  │ FileReader   │  │ FileIndex   │  │ FormatConverter  │ │
//! │  │ (cursor)     │  │ (sidecar)   │  │ (ColumnarSink)   │ │
//! │  └──────┬───────┘  └─────────────┘  └──────────────────┘ │
//! │         ▼                                                │
//! │  ┌─────────────────────────────────────────────────────┐ │
//! │  │  FileSource: implements parsely_core::ByteSource    │ │
//! │  └─────────────────────────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example: Reading a file
//!
//! ```rust,no_run
//! use parsely::{FileReader, ReadItem};
//!
//! let mut reader = FileReader::open_auto("0001_20210410_120000.kmall")?;
//! for item in reader.datagrams() {
//!     match item? {
//!         ReadItem::Record(d) => println!("{} at {}", d.name, d.frame.offset),
//!         ReadItem::Skip(s) => println!("skipped {}: {}", s.frame.offset, s.reason),
//!         ReadItem::EndOfStream => break,
//!     }
//! }
//! # Ok::<(), parsely::ReaderError>(())
//! ```

pub mod config;
pub mod convert;
pub mod error;
pub mod index;
pub mod parallel;
pub mod reader;
pub mod source;

#[cfg(test)]
mod testutil;

pub use parsely_core;

// Re-export commonly used types
pub use config::{ReaderConfig, UnknownTypePolicy};
pub use error::{ConvertError, ReaderError};
pub use index::{FileIndex, IndexEntry, PingStats};
pub use parsely_core::{FormatId, Frame, FrameStatus, ParseError, Record, Registry, TypeTag, Value};
pub use reader::{Cursor, FileReader, ParsedDatagram, ReadItem, Skipped, builtin_registry};
pub use source::FileSource;
