//! Built-in format catalogs
//!
//! Each catalog is static data behind its own feature flag.

use crate::catalog::Catalog;

#[cfg(feature = "kmall")]
pub mod kmall;
#[cfg(feature = "s7k")]
pub mod s7k;

/// Catalogs compiled into this build
pub fn builtin() -> Vec<&'static Catalog> {
    #[allow(unused_mut)]
    let mut catalogs = Vec::new();
    #[cfg(feature = "kmall")]
    catalogs.push(&kmall::CATALOG);
    #[cfg(feature = "s7k")]
    catalogs.push(&s7k::CATALOG);
    catalogs
}
