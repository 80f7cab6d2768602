//! Record schema registry
//!
//! Maps `(format, type tag)` to the static descriptor that decodes it. The
//! registry is filled once at startup and then only read, so a single
//! instance can be shared by every reader.

use std::collections::HashMap;

use log::{debug, warn};

use crate::catalog::{Catalog, CatalogEntry};
use crate::error::{ParseError, RegistryError};
use crate::format::FormatId;
use crate::schema::Descriptor;
use crate::tag::TypeTag;

struct Registered {
    catalog: &'static Catalog,
    by_tag: HashMap<TypeTag, &'static CatalogEntry>,
}

#[derive(Default)]
pub struct Registry {
    formats: HashMap<FormatId, Registered>,
}

impl Registry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every catalog compiled into this build
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for catalog in crate::catalogs::builtin() {
            if let Err(e) = registry.register(catalog) {
                warn!("{}", e);
            }
        }
        registry
    }

    /// Load a catalog. Each format can be registered once.
    pub fn register(&mut self, catalog: &'static Catalog) -> Result<(), RegistryError> {
        if self.formats.contains_key(&catalog.format) {
            return Err(RegistryError::DuplicateFormat(catalog.format));
        }
        let by_tag = catalog.entries.iter().map(|e| (e.tag, e)).collect();
        debug!(
            "Registered {} catalog with {} datagram types",
            catalog.format,
            catalog.entries.len()
        );
        self.formats.insert(catalog.format, Registered { catalog, by_tag });
        Ok(())
    }

    /// Descriptor for a datagram type. An unknown tag is a per-frame error.
    pub fn resolve(&self, format: FormatId, tag: TypeTag) -> Result<&'static Descriptor, ParseError> {
        self.entry(format, tag).map(|e| e.descriptor)
    }

    /// Full catalog entry for a datagram type
    pub fn entry(&self, format: FormatId, tag: TypeTag) -> Result<&'static CatalogEntry, ParseError> {
        self.formats
            .get(&format)
            .and_then(|r| r.by_tag.get(&tag).copied())
            .ok_or(ParseError::UnknownType { format, tag })
    }

    pub fn catalog(&self, format: FormatId) -> Result<&'static Catalog, RegistryError> {
        self.formats
            .get(&format)
            .map(|r| r.catalog)
            .ok_or(RegistryError::UnknownFormat(format))
    }

    /// Registered formats in a stable order
    pub fn formats(&self) -> Vec<FormatId> {
        let mut formats: Vec<_> = self.formats.keys().copied().collect();
        formats.sort();
        formats
    }

    /// Formats whose frame header matches the start of `data`
    pub fn detect(&self, data: &[u8]) -> Vec<FormatId> {
        self.formats()
            .into_iter()
            .filter(|f| self.formats[f].catalog.sniff(data))
            .collect()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("formats", &self.formats()).finish()
    }
}
