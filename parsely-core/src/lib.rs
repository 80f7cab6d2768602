//! # Parsely Core
//!
//! Platform-independent datagram parsing framework for multibeam
//! echosounder (MBES) files.
//!
//! This crate contains pure parsing logic with **zero file I/O**. Every byte
//! it looks at arrives through the [`ByteSource`] trait, so the same scanning
//! and decoding code runs over files, memory maps or captured buffers.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  parsely-core (no std::fs, no threads)                       │
//! │  ├── catalogs/    (static KMALL / S7K datagram tables)       │
//! │  ├── registry     (format + type tag -> descriptor)          │
//! │  ├── factory      (generic descriptor-driven decoder)        │
//! │  ├── demarcator   (frame boundaries, bookends, resync)       │
//! │  └── ByteSource   (abstracts where the bytes come from)      │
//! └──────────────────────────────────────────────────────────────┘
//!                              ▲
//!              ┌───────────────┴───────────────┐
//!              │  parsely (FileReader, index,  │
//!              │  converters, FileSource)      │
//!              └───────────────────────────────┘
//! ```
//!
//! ## Supported Formats
//!
//! | Format | Frame bookend                 | Datagrams                          |
//! |--------|-------------------------------|------------------------------------|
//! | KMALL  | trailing copy of the length   | installation, sensors, MRZ, MWC    |
//! | S7K    | optional 32-bit byte checksum | navigation, attitude, 7000, 7200   |
//!
//! ## Feature Flags
//!
//! - `kmall` - Kongsberg KMALL catalog (default)
//! - `s7k` - Teledyne Reson 7k catalog (default)
//!
//! ## Example: Decoding one frame
//!
//! ```rust,ignore
//! use parsely_core::{FormatId, Registry, RecordFactory};
//!
//! let registry = Registry::with_builtin();
//! let catalog = registry.catalog(FormatId::Kmall)?;
//! let info = catalog.layout.probe(&frame[..20])?;
//! let descriptor = registry.resolve(FormatId::Kmall, info.tag)?;
//! let record = RecordFactory::new().build_frame(descriptor, &frame)?;
//! println!("{}", record.to_json());
//! ```

pub mod cancel;
pub mod catalog;
pub mod catalogs;
pub mod demarcator;
pub mod error;
pub mod factory;
pub mod format;
pub mod frame;
pub mod record;
pub mod registry;
pub mod schema;
pub mod source;
pub mod tag;

// Re-export commonly used types
pub use cancel::CancelFlag;
pub use catalog::{Catalog, CatalogEntry, PingLayout};
pub use demarcator::{Demarcation, Demarcator, DEFAULT_RESYNC_WINDOW};
pub use error::{DemarcateError, ParseError, RegistryError, SourceError};
pub use factory::{RecordFactory, DEFAULT_MAX_DEPTH};
pub use format::FormatId;
pub use frame::{Frame, FrameLayout, FrameStatus};
pub use record::{Record, Value};
pub use registry::Registry;
pub use schema::{Descriptor, Endian};
pub use source::{ByteSource, MemorySource};
pub use tag::TypeTag;
