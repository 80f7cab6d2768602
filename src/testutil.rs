//! Synthetic "sounder" format shared by the file-level tests.
//!
//! Frame: u32 length, u16 type id, u16 nanoseconds, u32 unix seconds,
//! payload, then a trailing copy of the length. A PING frame is 20 bytes.

use std::path::PathBuf;
use std::sync::Arc;

use parsely_core::catalog::{Catalog, CatalogEntry};
use parsely_core::frame::{Bookend, IntField, TagField, TimeField};
use parsely_core::schema::{checked, field, Constraint, Primitive, SizeRule};
use parsely_core::{Descriptor, Endian, FormatId, FrameLayout, Registry, TypeTag};

pub(crate) const PING_ID: u16 = 1;
pub(crate) const PING_LEN: usize = 20;

const LAYOUT: FrameLayout = FrameLayout {
    header_len: 12,
    length: IntField::le(0, 4),
    length_adjust: 0,
    tag: TagField::Numeric(IntField::le(4, 2)),
    sync: None,
    time: Some(TimeField::UnixNanos {
        seconds: IntField::le(8, 4),
        nanos: IntField::le(6, 2),
    }),
    bookend: Some(Bookend::TrailingLength {
        width: 4,
        endian: Endian::Little,
    }),
    min_frame_len: 16,
    max_frame_len: 4096,
};

static PING: Descriptor = Descriptor::new(
    "PING",
    SizeRule::Enclosing,
    &[
        field("length", Primitive::U32),
        field("type_id", Primitive::U16),
        field("nanos", Primitive::U16),
        field("seconds", Primitive::U32),
        field("ping", Primitive::U32),
        checked("trailer", Primitive::U32, Constraint::EqualsField("length")),
    ],
);

static ENTRIES: [CatalogEntry; 1] = [CatalogEntry {
    tag: TypeTag::numeric(PING_ID as u32),
    name: "PING",
    description: "Synthetic ping counter",
    descriptor: &PING,
    min_header_len: PING_LEN,
}];

pub(crate) static CATALOG: Catalog = Catalog {
    format: FormatId::S7k,
    name: "Synthetic sounder",
    layout: LAYOUT,
    entries: &ENTRIES,
    pings: &[],
};

pub(crate) fn registry() -> Arc<Registry> {
    let mut registry = Registry::new();
    registry.register(&CATALOG).unwrap();
    Arc::new(registry)
}

pub(crate) fn frame(type_id: u16, seconds: u32, payload: &[u8]) -> Vec<u8> {
    let total = (12 + payload.len() + 4) as u32;
    let mut b = total.to_le_bytes().to_vec();
    b.extend_from_slice(&type_id.to_le_bytes());
    b.extend_from_slice(&0u16.to_le_bytes());
    b.extend_from_slice(&seconds.to_le_bytes());
    b.extend_from_slice(payload);
    b.extend_from_slice(&total.to_le_bytes());
    b
}

pub(crate) fn ping(n: u32, seconds: u32) -> Vec<u8> {
    frame(PING_ID, seconds, &n.to_le_bytes())
}

pub(crate) fn write_file(dir: &tempfile::TempDir, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, data).unwrap();
    path
}

pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
