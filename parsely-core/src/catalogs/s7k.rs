//! Teledyne Reson 7k (S7K) record catalog
//!
//! Every record is a 64-byte Data Record Frame (DRF), a record type header,
//! optional record data and optional data, followed by a 32-bit additive
//! checksum when bit 0 of the DRF flags is set.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, CatalogEntry};
use crate::format::FormatId;
use crate::frame::{Bookend, FrameLayout, IntField, SyncPattern, TagField, TimeField};
use crate::record::Record;
use crate::schema::Primitive::{F32, F64, U16, U32, U64, U8};
use crate::schema::{
    ascii, bytes, checked, field, nested, repeated, when, Condition, Constraint, Descriptor, Endian, Item, SizeRule, Width,
};
use crate::tag::TypeTag;

/// Size of the Data Record Frame
pub const DRF_LEN: usize = 64;

/// Sync pattern `0x0000FFFF` as stored little-endian
pub const SYNC_PATTERN: [u8; 4] = [0xFF, 0xFF, 0x00, 0x00];

bitflags! {
    /// DRF flags word
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct FrameFlags: u16 {
        /// A checksum follows the record
        const CHECKSUM = 1 << 0;
    }
}

pub const LAYOUT: FrameLayout = FrameLayout {
    header_len: DRF_LEN,
    length: IntField::le(8, 4),
    length_adjust: 0,
    tag: TagField::Numeric(IntField::le(32, 4)),
    sync: Some(SyncPattern {
        offset: 4,
        pattern: &SYNC_PATTERN,
    }),
    time: Some(TimeField::Reson7k { offset: 20 }),
    bookend: Some(Bookend::Checksum {
        endian: Endian::Little,
        flag: Some((IntField::le(48, 2), FrameFlags::CHECKSUM.bits() as u64)),
    }),
    min_frame_len: DRF_LEN as u64,
    max_frame_len: 1 << 28,
};

/// DRF flags of a decoded record
pub fn frame_flags(record: &Record) -> Option<FrameFlags> {
    let bits = record.get_u64("drf.flags")?;
    Some(FrameFlags::from_bits_truncate(bits as u16))
}

static DRF: Descriptor = Descriptor::new(
    "drf",
    SizeRule::Fixed(DRF_LEN),
    &[
        field("protocol_version", U16),
        field("offset", U16),
        checked("sync_pattern", U32, Constraint::OneOf(&[0x0000_FFFF])),
        field("size", U32),
        field("optional_data_offset", U32),
        field("optional_data_identifier", U32),
        field("year", U16),
        field("day", U16),
        field("seconds", F32),
        field("hours", U8),
        field("minutes", U8),
        field("record_version", U16),
        field("record_type_id", U32),
        field("device_id", U32),
        field("reserved1", U16),
        field("system_enumerator", U16),
        field("reserved2", U32),
        field("flags", U16),
        field("reserved3", U16),
        field("reserved4", U32),
        field("total_records_in_fragmented_set", U32),
        field("fragment_number", U32),
    ],
);

const CHECKSUM: Item = when(
    Condition::FlagSet {
        field: "drf.flags",
        mask: FrameFlags::CHECKSUM.bits() as u64,
    },
    field("checksum", U32),
);

/// DRF, record body, optional data, checksum
macro_rules! s7k_record {
    ($name:literal, [$($item:expr),* $(,)?]) => {
        Descriptor::new(
            $name,
            SizeRule::Enclosing,
            &[
                nested("drf", &DRF),
                $($item,)*
                bytes("optional_data", Width::Remainder),
                CHECKSUM,
            ],
        )
    };
}

// =============================================================================
// Navigation and attitude
// =============================================================================

static POSITION_RTH: Descriptor = Descriptor::new(
    "rth",
    SizeRule::Open,
    &[
        field("datum_identifier", U32),
        field("latency_s", F32),
        field("latitude_or_northing", F64),
        field("longitude_or_easting", F64),
        field("height_m", F64),
        checked("position_type", U8, Constraint::OneOf(&[0, 1])),
        field("utm_zone", U8),
        field("quality_flag", U8),
        field("positioning_method", U8),
    ],
);

static POSITION: Descriptor = s7k_record!("Position", [nested("rth", &POSITION_RTH)]);

static RPH_RTH: Descriptor = Descriptor::new(
    "rth",
    SizeRule::Open,
    &[field("roll_rad", F32), field("pitch_rad", F32), field("heave_m", F32)],
);

static ROLL_PITCH_HEAVE: Descriptor = s7k_record!("RollPitchHeave", [nested("rth", &RPH_RTH)]);

static HEADING_RTH: Descriptor = Descriptor::new("rth", SizeRule::Open, &[field("heading_rad", F32)]);

static HEADING: Descriptor = s7k_record!("Heading", [nested("rth", &HEADING_RTH)]);

static NAVIGATION_RTH: Descriptor = Descriptor::new(
    "rth",
    SizeRule::Open,
    &[
        field("vertical_reference", U8),
        field("latitude_rad", F64),
        field("longitude_rad", F64),
        field("horizontal_position_accuracy_m", F32),
        field("vessel_height_m", F32),
        field("height_accuracy_m", F32),
        field("speed_over_ground_m_per_sec", F32),
        field("course_over_ground_rad", F32),
        field("heading_rad", F32),
    ],
);

static NAVIGATION: Descriptor = s7k_record!("Navigation", [nested("rth", &NAVIGATION_RTH)]);

static ATTITUDE_RTH: Descriptor = Descriptor::new("rth", SizeRule::Open, &[field("number_of_sets", U8)]);

static ATTITUDE_SAMPLE: Descriptor = Descriptor::new(
    "sample",
    SizeRule::Open,
    &[
        field("time_difference_ms", U16),
        field("roll_rad", F32),
        field("pitch_rad", F32),
        field("heave_m", F32),
        field("heading_rad", F32),
    ],
);

static ATTITUDE: Descriptor = s7k_record!(
    "Attitude",
    [
        nested("rth", &ATTITUDE_RTH),
        repeated("samples", &ATTITUDE_SAMPLE, "rth.number_of_sets"),
    ]
);

// =============================================================================
// Sonar and file records
// =============================================================================

// Leading part of the sonar settings; the rest stays raw
static SONAR_SETTINGS_RTH: Descriptor = Descriptor::new(
    "rth",
    SizeRule::Open,
    &[
        field("sonar_id", U64),
        field("ping_number", U32),
        field("multi_ping_sequence", U16),
        field("frequency_hz", F32),
        field("sample_rate_hz", F32),
        field("receiver_bandwidth_hz", F32),
        field("tx_pulse_width_s", F32),
        field("tx_pulse_type_id", U32),
        field("tx_pulse_envelope_id", U32),
        field("tx_pulse_envelope_parameter", F32),
        field("tx_pulse_mode", U16),
        field("tx_pulse_reserved", U16),
        field("max_ping_rate", F32),
        field("ping_period_s", F32),
        field("range_selection_m", F32),
        field("power_selection_db", F32),
        field("gain_selection_db", F32),
    ],
);

static SONAR_SETTINGS: Descriptor = s7k_record!("SonarSettings", [nested("rth", &SONAR_SETTINGS_RTH)]);

static FILE_HEADER_RTH: Descriptor = Descriptor::new(
    "rth",
    SizeRule::Open,
    &[
        bytes("file_identifier", Width::Fixed(16)),
        field("version_number", U16),
        field("reserved", U16),
        bytes("session_identifier", Width::Fixed(16)),
        field("record_data_size", U32),
        field("number_of_devices", U32),
        ascii("recording_name", Width::Fixed(64)),
        ascii("recording_program_version", Width::Fixed(16)),
        ascii("user_defined_name", Width::Fixed(64)),
        ascii("notes", Width::Fixed(128)),
    ],
);

static DEVICE_ENTRY: Descriptor = Descriptor::new(
    "device",
    SizeRule::Open,
    &[field("device_identifier", U32), field("system_enumerator", U16)],
);

static FILE_HEADER: Descriptor = s7k_record!(
    "FileHeader",
    [
        nested("rth", &FILE_HEADER_RTH),
        repeated("devices", &DEVICE_ENTRY, "rth.number_of_devices"),
    ]
);

static FILE_CATALOG: Descriptor = Descriptor::new(
    "FileCatalog",
    SizeRule::Enclosing,
    &[nested("drf", &DRF), bytes("catalog", Width::Remainder), CHECKSUM],
);

// =============================================================================
// Catalog
// =============================================================================

const fn entry(
    id: u32,
    name: &'static str,
    description: &'static str,
    descriptor: &'static Descriptor,
    min_header_len: usize,
) -> CatalogEntry {
    CatalogEntry {
        tag: TypeTag::numeric(id),
        name,
        description,
        descriptor,
        min_header_len,
    }
}

static ENTRIES: &[CatalogEntry] = &[
    entry(1003, "Position", "Position (latitude/longitude or grid)", &POSITION, DRF_LEN + 36),
    entry(1012, "RollPitchHeave", "Roll, pitch and heave", &ROLL_PITCH_HEAVE, DRF_LEN + 12),
    entry(1013, "Heading", "Vessel heading", &HEADING, DRF_LEN + 4),
    entry(1015, "Navigation", "Navigation solution", &NAVIGATION, DRF_LEN + 41),
    entry(1016, "Attitude", "Attitude samples", &ATTITUDE, DRF_LEN + 1),
    entry(7000, "SonarSettings", "7k sonar settings", &SONAR_SETTINGS, DRF_LEN + 66),
    entry(7200, "FileHeader", "7k file header", &FILE_HEADER, DRF_LEN + 316),
    entry(7300, "FileCatalog", "7k file catalog", &FILE_CATALOG, DRF_LEN),
];

pub static CATALOG: Catalog = Catalog {
    format: FormatId::S7k,
    name: "Teledyne Reson 7k",
    layout: LAYOUT,
    entries: ENTRIES,
    pings: &[],
};
