//! Kongsberg KMALL datagram catalog
//!
//! Every KMALL datagram starts with a 20-byte header and ends with a copy of
//! its own length. Sub-structures carry a leading `numBytes` field that
//! covers the whole structure, so newer firmware can append fields that
//! older readers skip.

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, CatalogEntry, PingLayout};
use crate::format::FormatId;
use crate::frame::{Bookend, FrameLayout, IntField, TagField, TimeField};
use crate::record::Record;
use crate::schema::Primitive::{F32, F64, I16, I32, I8, U16, U32, U8};
use crate::schema::{
    align, ascii, bytes, checked, field, nested, nested_with, repeated, when, Condition, Constraint, Descriptor, Endian,
    Item, Repeat, SizeRule, Span, Width,
};
use crate::tag::TypeTag;

/// Length of the common datagram header
pub const HEADER_LEN: usize = 20;

pub const LAYOUT: FrameLayout = FrameLayout {
    header_len: HEADER_LEN,
    length: IntField::le(0, 4),
    length_adjust: 0,
    tag: TagField::Ascii {
        offset: 4,
        prefix: Some(b'#'),
    },
    sync: None,
    time: Some(TimeField::UnixNanos {
        seconds: IntField::le(12, 4),
        nanos: IntField::le(16, 4),
    }),
    bookend: Some(Bookend::TrailingLength {
        width: 4,
        endian: Endian::Little,
    }),
    min_frame_len: (HEADER_LEN + 4) as u64,
    max_frame_len: 1 << 20,
};

bitflags! {
    /// Sensor status word of the sensor datagrams (`#SPO`, `#CPO`, `#SDE`, ...)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct SensorStatus: u16 {
        const ACTIVE = 1 << 0;
        const REDUCED_PERFORMANCE = 1 << 2;
        const INVALID_DATA = 1 << 4;
        /// Velocity computed by the PU rather than the sensor
        const VELOCITY_FROM_PU = 1 << 6;
        /// Position datagrams only
        const TIME_FROM_DATAGRAM = 1 << 9;
        const MOTION_CORRECTED = 1 << 10;
        /// Quality check set by the operator
        const OPERATOR_QUALITY = 1 << 11;
    }
}

/// Status flags of a decoded sensor datagram
pub fn sensor_status(record: &Record) -> Option<SensorStatus> {
    let bits = record.get_u64("sensor_info.sensor_status")?;
    Some(SensorStatus::from_bits_truncate(bits as u16))
}

/// Latitude of a position datagram without a valid fix
pub const POSITION_UNAVAILABLE: f64 = 200.0;

/// A WGS84 position fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    pub time: Option<DateTime<Utc>>,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub ellipsoid_height_m: f64,
}

/// Position carried by an `#SPO`, `#CPO` or `#MRZ` datagram.
///
/// Sensor datagrams are stamped with the sensor time, `#MRZ` with the ping
/// time. `None` for other datagrams and for fixes flagged unavailable.
pub fn position(record: &Record) -> Option<Position> {
    let (time, lat, lon, height) = match record.name() {
        "SPO" | "CPO" => (
            unix_time(record, "sensor_data.time_from_sensor_sec", "sensor_data.time_from_sensor_nanosec"),
            "sensor_data.corrected_lat_deg",
            "sensor_data.corrected_lon_deg",
            "sensor_data.ellipsoid_height_re_ref_point_m",
        ),
        "MRZ" => (
            unix_time(record, "header.time_sec", "header.time_nanosec"),
            "ping_info.latitude_deg",
            "ping_info.longitude_deg",
            "ping_info.ellipsoid_height_re_ref_point_m",
        ),
        _ => return None,
    };
    let latitude_deg = record.get_f64(lat)?;
    if latitude_deg == POSITION_UNAVAILABLE {
        return None;
    }
    Some(Position {
        time,
        latitude_deg,
        longitude_deg: record.get_f64(lon)?,
        ellipsoid_height_m: record.get_f64(height)?,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Attitude {
    pub time: Option<DateTime<Utc>>,
    pub roll_deg: f64,
    pub pitch_deg: f64,
    pub heading_deg: f64,
    pub heave_m: f64,
}

/// Attitude samples of an `#SKM` datagram, empty for any other datagram
pub fn attitude(record: &Record) -> Vec<Attitude> {
    if record.name() != "SKM" {
        return Vec::new();
    }
    record
        .children_named("samples")
        .filter_map(|sample| {
            Some(Attitude {
                time: unix_time(sample, "binary.time_sec", "binary.time_nanosec"),
                roll_deg: sample.get_f64("binary.roll_deg")?,
                pitch_deg: sample.get_f64("binary.pitch_deg")?,
                heading_deg: sample.get_f64("binary.heading_deg")?,
                heave_m: sample.get_f64("binary.heave_m")?,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SvpSample {
    pub depth_m: f64,
    pub sound_velocity_m_per_sec: f64,
    pub temp_c: f64,
    pub salinity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SoundVelocityProfile {
    pub time: Option<DateTime<Utc>>,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub samples: Vec<SvpSample>,
}

/// Profile of an `#SVP` datagram
pub fn sound_velocity_profile(record: &Record) -> Option<SoundVelocityProfile> {
    if record.name() != "SVP" {
        return None;
    }
    let samples = record
        .children_named("samples")
        .map(|s| {
            Some(SvpSample {
                depth_m: s.get_f64("depth_m")?,
                sound_velocity_m_per_sec: s.get_f64("sound_velocity_m_per_sec")?,
                temp_c: s.get_f64("temp_c")?,
                salinity: s.get_f64("salinity")?,
            })
        })
        .collect::<Option<Vec<_>>>()?;
    Some(SoundVelocityProfile {
        time: record
            .get_u64("info.time_sec")
            .and_then(|s| i64::try_from(s).ok())
            .and_then(|s| DateTime::from_timestamp(s, 0)),
        latitude_deg: record.get_f64("info.latitude_deg")?,
        longitude_deg: record.get_f64("info.longitude_deg")?,
        samples,
    })
}

/// Main soundings of an `#MRZ` datagram as (x, y, z) metres from the
/// reference point, forward, starboard and down
pub fn soundings_xyz(record: &Record) -> Vec<[f64; 3]> {
    record
        .children_named("soundings")
        .filter_map(|s| {
            Some([
                s.get_f64("x_re_ref_point_m")?,
                s.get_f64("y_re_ref_point_m")?,
                s.get_f64("z_re_ref_point_m")?,
            ])
        })
        .collect()
}

fn unix_time(record: &Record, seconds: &str, nanos: &str) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(record.get_u64(seconds)?).ok()?;
    let nanos = u32::try_from(record.get_u64(nanos)?).ok()?;
    DateTime::from_timestamp(secs, nanos)
}

// =============================================================================
// Shared structures
// =============================================================================

static HEADER: Descriptor = Descriptor::new(
    "header",
    SizeRule::Open,
    &[
        field("num_bytes_dgm", U32),
        ascii("dgm_type", Width::Fixed(4)),
        field("dgm_version", U8),
        field("system_id", U8),
        field("echo_sounder_id", U16),
        field("time_sec", U32),
        checked("time_nanosec", U32, Constraint::Range { min: 0.0, max: 999_999_999.0 }),
    ],
);

const TRAILER: Item = checked(
    "num_bytes_dgm_end",
    U32,
    Constraint::EqualsField("header.num_bytes_dgm"),
);

static PARTITION: Descriptor = Descriptor::new(
    "partition",
    SizeRule::Open,
    &[field("num_of_dgms", U16), field("dgm_num", U16)],
);

static M_BODY: Descriptor = Descriptor::new(
    "cmn_part",
    SizeRule::FromField {
        field: "num_bytes_cmn_part",
        adjust: 0,
    },
    &[
        field("num_bytes_cmn_part", U16),
        field("ping_cnt", U16),
        field("rx_fans_per_ping", U8),
        field("rx_fan_index", U8),
        field("swaths_per_ping", U8),
        field("swath_along_position", U8),
        field("tx_transducer_ind", U8),
        field("rx_transducer_ind", U8),
        field("num_rx_transducers", U8),
        field("algorithm_type", U8),
    ],
);

static SENSOR_INFO: Descriptor = Descriptor::new(
    "sensor_info",
    SizeRule::FromField {
        field: "num_bytes_sensor_info",
        adjust: 0,
    },
    &[
        field("num_bytes_sensor_info", U16),
        field("sensor_system", U16),
        field("sensor_status", U16),
        field("padding", U16),
    ],
);

// =============================================================================
// Installation and runtime parameters, built-in self test
// =============================================================================

static I_INFO: Descriptor = Descriptor::new(
    "info",
    SizeRule::Open,
    &[field("num_bytes_cmn_part", U16), field("info", U16), field("status", U16)],
);

// numBytesCmnPart covers the 6-byte info block and the text
static IIP: Descriptor = Descriptor::new(
    "IIP",
    SizeRule::Enclosing,
    &[
        nested("header", &HEADER),
        nested("info", &I_INFO),
        ascii(
            "install_txt",
            Width::FromField {
                field: "info.num_bytes_cmn_part",
                adjust: -6,
            },
        ),
        align(2),
        TRAILER,
    ],
);

static IOP: Descriptor = Descriptor::new(
    "IOP",
    SizeRule::Enclosing,
    &[
        nested("header", &HEADER),
        nested("info", &I_INFO),
        ascii(
            "runtime_txt",
            Width::FromField {
                field: "info.num_bytes_cmn_part",
                adjust: -6,
            },
        ),
        align(2),
        TRAILER,
    ],
);

static BIST_INFO: Descriptor = Descriptor::new(
    "info",
    SizeRule::FromField {
        field: "num_bytes_cmn_part",
        adjust: 0,
    },
    &[
        field("num_bytes_cmn_part", U16),
        field("bist_info", U8),
        field("bist_style", U8),
        field("bist_number", U8),
        field("bist_status", I8),
    ],
);

macro_rules! bist_datagram {
    ($name:literal) => {
        Descriptor::new(
            $name,
            SizeRule::Enclosing,
            &[
                nested("header", &HEADER),
                nested("info", &BIST_INFO),
                ascii("bist_text", Width::Remainder),
                TRAILER,
            ],
        )
    };
}

static IBE: Descriptor = bist_datagram!("IBE");
static IBR: Descriptor = bist_datagram!("IBR");
static IBS: Descriptor = bist_datagram!("IBS");

// =============================================================================
// Sensor datagrams
// =============================================================================

static POSITION_DATA: Descriptor = Descriptor::new(
    "sensor_data",
    SizeRule::Open,
    &[
        field("time_from_sensor_sec", U32),
        field("time_from_sensor_nanosec", U32),
        field("pos_fix_quality_m", F32),
        field("corrected_lat_deg", F64),
        field("corrected_lon_deg", F64),
        field("speed_over_ground_m_per_sec", F32),
        field("course_over_ground_deg", F32),
        field("ellipsoid_height_re_ref_point_m", F32),
    ],
);

macro_rules! position_datagram {
    ($name:literal) => {
        Descriptor::new(
            $name,
            SizeRule::Enclosing,
            &[
                nested("header", &HEADER),
                nested("sensor_info", &SENSOR_INFO),
                nested("sensor_data", &POSITION_DATA),
                ascii("pos_data_from_sensor", Width::Remainder),
                TRAILER,
            ],
        )
    };
}

static SPO: Descriptor = position_datagram!("SPO");
static CPO: Descriptor = position_datagram!("CPO");

static SVP_INFO: Descriptor = Descriptor::new(
    "info",
    SizeRule::FromField {
        field: "num_bytes_info_part",
        adjust: 0,
    },
    &[
        field("num_bytes_info_part", U16),
        field("num_samples", U16),
        ascii("sensor_format", Width::Fixed(4)),
        field("time_sec", U32),
        field("latitude_deg", F64),
        field("longitude_deg", F64),
    ],
);

static SVP_SAMPLE: Descriptor = Descriptor::new(
    "sample",
    SizeRule::Open,
    &[
        field("depth_m", F32),
        field("sound_velocity_m_per_sec", F32),
        field("padding", U32),
        field("temp_c", F32),
        field("salinity", F32),
    ],
);

static SVP: Descriptor = Descriptor::new(
    "SVP",
    SizeRule::Enclosing,
    &[
        nested("header", &HEADER),
        nested("info", &SVP_INFO),
        repeated("samples", &SVP_SAMPLE, "info.num_samples"),
        TRAILER,
    ],
);

static SVT_INFO: Descriptor = Descriptor::new(
    "info",
    SizeRule::FromField {
        field: "num_bytes_info_part",
        adjust: 0,
    },
    &[
        field("num_bytes_info_part", U16),
        field("sensor_status", U16),
        field("sensor_input_format", U16),
        field("num_samples_array", U16),
        field("num_bytes_per_sample", U16),
        field("sensor_data_contents", U16),
        field("filter_time_sec", F32),
        field("sound_velocity_offset_m_per_sec", F32),
    ],
);

static SVT_SAMPLE: Descriptor = Descriptor::new(
    "sample",
    SizeRule::Open,
    &[
        field("time_sec", U32),
        field("time_nanosec", U32),
        field("sound_velocity_m_per_sec", F32),
        field("temp_c", F32),
        field("pressure_pa", F32),
        field("salinity", F32),
    ],
);

static SVT: Descriptor = Descriptor::new(
    "SVT",
    SizeRule::Enclosing,
    &[
        nested("header", &HEADER),
        nested("info", &SVT_INFO),
        nested_with(
            "samples",
            &SVT_SAMPLE,
            Repeat::Count("info.num_samples_array"),
            Span::FromField {
                field: "info.num_bytes_per_sample",
                adjust: 0,
            },
        ),
        TRAILER,
    ],
);

static SCL_DATA: Descriptor = Descriptor::new(
    "sensor_data",
    SizeRule::Open,
    &[field("offset_sec", F32), field("clock_dev_pu_microsec", I32)],
);

static SCL: Descriptor = Descriptor::new(
    "SCL",
    SizeRule::Enclosing,
    &[
        nested("header", &HEADER),
        nested("sensor_info", &SENSOR_INFO),
        nested("sensor_data", &SCL_DATA),
        ascii("data_from_sensor", Width::Remainder),
        TRAILER,
    ],
);

static SDE_DATA: Descriptor = Descriptor::new(
    "sensor_data",
    SizeRule::Open,
    &[
        field("depth_used_m", F32),
        field("depth_raw_m", F32),
        field("offset", F32),
        field("scale", F32),
        field("latitude_deg", F64),
        field("longitude_deg", F64),
    ],
);

static SDE: Descriptor = Descriptor::new(
    "SDE",
    SizeRule::Enclosing,
    &[
        nested("header", &HEADER),
        nested("sensor_info", &SENSOR_INFO),
        nested("sensor_data", &SDE_DATA),
        ascii("data_from_sensor", Width::Remainder),
        TRAILER,
    ],
);

static SHI_DATA: Descriptor = Descriptor::new(
    "sensor_data",
    SizeRule::Open,
    &[field("sensor_type", U16), field("height_used_m", F32)],
);

static SHI: Descriptor = Descriptor::new(
    "SHI",
    SizeRule::Enclosing,
    &[
        nested("header", &HEADER),
        nested("sensor_info", &SENSOR_INFO),
        nested("sensor_data", &SHI_DATA),
        ascii("data_from_sensor", Width::Remainder),
        TRAILER,
    ],
);

static CHE_DATA: Descriptor = Descriptor::new("data", SizeRule::Open, &[field("heave_m", F32)]);

static CHE: Descriptor = Descriptor::new(
    "CHE",
    SizeRule::Enclosing,
    &[
        nested("header", &HEADER),
        nested("cmn_part", &M_BODY),
        nested("data", &CHE_DATA),
        TRAILER,
    ],
);

static SKM_INFO: Descriptor = Descriptor::new(
    "info",
    SizeRule::FromField {
        field: "num_bytes_info_part",
        adjust: 0,
    },
    &[
        field("num_bytes_info_part", U16),
        field("sensor_system", U8),
        field("sensor_status", U8),
        field("sensor_input_format", U16),
        field("num_samples_array", U16),
        field("num_bytes_per_sample", U16),
        field("sensor_data_contents", U16),
    ],
);

static KM_BINARY: Descriptor = Descriptor::new(
    "binary",
    SizeRule::FromField {
        field: "num_bytes_dgm",
        adjust: 0,
    },
    &[
        ascii("dgm_type", Width::Fixed(4)),
        field("num_bytes_dgm", U16),
        field("dgm_version", U16),
        field("time_sec", U32),
        field("time_nanosec", U32),
        field("status", U32),
        field("latitude_deg", F64),
        field("longitude_deg", F64),
        field("ellipsoid_height_m", F32),
        field("roll_deg", F32),
        field("pitch_deg", F32),
        field("heading_deg", F32),
        field("heave_m", F32),
        field("roll_rate", F32),
        field("pitch_rate", F32),
        field("yaw_rate", F32),
        field("vel_north", F32),
        field("vel_east", F32),
        field("vel_down", F32),
        field("latitude_error_m", F32),
        field("longitude_error_m", F32),
        field("ellipsoid_height_error_m", F32),
        field("roll_error_deg", F32),
        field("pitch_error_deg", F32),
        field("heading_error_deg", F32),
        field("heave_error_m", F32),
        field("north_acceleration", F32),
        field("east_acceleration", F32),
        field("down_acceleration", F32),
    ],
);

static KM_DELAYED_HEAVE: Descriptor = Descriptor::new(
    "delayed_heave",
    SizeRule::Open,
    &[
        field("time_sec", U32),
        field("time_nanosec", U32),
        field("delayed_heave_m", F32),
    ],
);

static SKM_SAMPLE: Descriptor = Descriptor::new(
    "sample",
    SizeRule::Open,
    &[
        nested("binary", &KM_BINARY),
        nested("delayed_heave", &KM_DELAYED_HEAVE),
    ],
);

static SKM: Descriptor = Descriptor::new(
    "SKM",
    SizeRule::Enclosing,
    &[
        nested("header", &HEADER),
        nested("info", &SKM_INFO),
        nested_with(
            "samples",
            &SKM_SAMPLE,
            Repeat::Count("info.num_samples_array"),
            Span::FromField {
                field: "info.num_bytes_per_sample",
                adjust: 0,
            },
        ),
        TRAILER,
    ],
);

// =============================================================================
// Multibeam datagrams
// =============================================================================

// Version 0 layout. Later versions append fields inside the declared size.
static MRZ_PING_INFO: Descriptor = Descriptor::new(
    "ping_info",
    SizeRule::FromField {
        field: "num_bytes_info_data",
        adjust: 0,
    },
    &[
        field("num_bytes_info_data", U16),
        field("padding0", U16),
        field("ping_rate_hz", F32),
        field("beam_spacing", U8),
        field("depth_mode", U8),
        field("sub_depth_mode", U8),
        field("distance_btw_swath", U8),
        field("detection_mode", U8),
        field("pulse_form", U8),
        field("padding1", U16),
        field("frequency_mode_hz", F32),
        field("freq_range_low_lim_hz", F32),
        field("freq_range_high_lim_hz", F32),
        field("max_total_tx_pulse_length_sec", F32),
        field("max_eff_tx_pulse_length_sec", F32),
        field("max_eff_tx_bandwidth_hz", F32),
        field("abs_coeff_db_per_km", F32),
        field("port_sector_edge_deg", F32),
        field("starb_sector_edge_deg", F32),
        field("port_mean_cov_deg", F32),
        field("starb_mean_cov_deg", F32),
        field("port_mean_cov_m", I16),
        field("starb_mean_cov_m", I16),
        field("mode_and_stabilisation", U8),
        field("runtime_filter1", U8),
        field("runtime_filter2", U16),
        field("pipe_tracking_status", U32),
        field("transmit_array_size_used_deg", F32),
        field("receive_array_size_used_deg", F32),
        field("transmit_power_db", F32),
        field("sl_ramp_up_time_remaining", U16),
        field("padding2", U16),
        field("yaw_angle_deg", F32),
        field("num_tx_sectors", U16),
        field("num_bytes_per_tx_sector", U16),
        field("heading_vessel_deg", F32),
        field("sound_speed_at_tx_depth_m_per_sec", F32),
        field("tx_transducer_depth_m", F32),
        field("z_water_level_re_ref_point_m", F32),
        field("x_kmall_to_all_m", F32),
        field("y_kmall_to_all_m", F32),
        field("lat_long_info", U8),
        field("pos_sensor_status", U8),
        field("attitude_sensor_status", U8),
        field("padding3", U8),
        field("latitude_deg", F64),
        field("longitude_deg", F64),
        field("ellipsoid_height_re_ref_point_m", F32),
        when(PING_INFO_V1, field("bs_correction_offset_db", F32)),
        when(PING_INFO_V1, field("lamberts_law_active", U8)),
        when(PING_INFO_V1, field("ice_window", U8)),
        when(PING_INFO_V1, field("active_modes", U16)),
    ],
);

/// Version 0 ping info size
const PING_INFO_V0_LEN: u64 = 144;

const PING_INFO_V1: Condition = Condition::AtLeast {
    field: "num_bytes_info_data",
    min: PING_INFO_V0_LEN + 8,
};

macro_rules! mrz_tx_sector {
    ($($item:expr),* $(,)?) => {
        Descriptor::new(
            "tx_sector",
            SizeRule::Enclosing,
            &[
                field("tx_sector_numb", U8),
                field("tx_arr_numb", U8),
                field("tx_sub_array", U8),
                field("padding0", U8),
                field("sector_trans_delay_sec", F32),
                field("tilt_angle_re_tx_deg", F32),
                field("tx_nominal_source_level_db", F32),
                field("tx_focus_range_m", F32),
                field("centre_freq_hz", F32),
                field("signal_band_width_hz", F32),
                field("total_signal_length_sec", F32),
                field("pulse_shading", U8),
                checked("signal_wave_form", U8, Constraint::OneOf(&[0, 1, 2])),
                field("padding1", U16),
                $($item,)*
                bytes("reserved", Width::Remainder),
            ],
        )
    };
}

static MRZ_TX_SECTOR_V0: Descriptor = mrz_tx_sector!();

static MRZ_TX_SECTOR_V1: Descriptor = mrz_tx_sector!(
    field("high_voltage_level_db", F32),
    field("sector_tracking_corr_db", F32),
    field("effective_signal_length_sec", F32),
);

const TX_SECTOR_SPAN: Span = Span::FromField {
    field: "ping_info.num_bytes_per_tx_sector",
    adjust: 0,
};

static MRZ_RX_INFO: Descriptor = Descriptor::new(
    "rx_info",
    SizeRule::FromField {
        field: "num_bytes_rx_info",
        adjust: 0,
    },
    &[
        field("num_bytes_rx_info", U16),
        field("num_soundings_max_main", U16),
        field("num_soundings_valid_main", U16),
        field("num_bytes_per_sounding", U16),
        field("wc_sample_rate", F32),
        field("seabed_image_sample_rate", F32),
        field("bs_normal_db", F32),
        field("bs_oblique_db", F32),
        field("extra_detection_alarm_flag", U16),
        field("num_extra_detections", U16),
        field("num_extra_detection_classes", U16),
        field("num_bytes_per_class", U16),
    ],
);

static MRZ_EXTRA_DET_CLASS: Descriptor = Descriptor::new(
    "extra_det_class",
    SizeRule::Enclosing,
    &[
        field("num_extra_det_in_class", U16),
        field("padding", I8),
        field("alarm_flag", U8),
        bytes("reserved", Width::Remainder),
    ],
);

static MRZ_SOUNDING: Descriptor = Descriptor::new(
    "sounding",
    SizeRule::Enclosing,
    &[
        field("sounding_index", U16),
        field("tx_sector_numb", U8),
        // Detection info
        checked("detection_type", U8, Constraint::OneOf(&[0, 1, 2])),
        checked("detection_method", U8, Constraint::OneOf(&[0, 1, 2])),
        field("rejection_info1", U8),
        field("rejection_info2", U8),
        field("post_processing_info", U8),
        field("detection_class", U8),
        field("detection_confidence_level", U8),
        field("padding", U16),
        field("range_factor", F32),
        field("quality_factor", F32),
        field("detection_uncertainty_ver_m", F32),
        field("detection_uncertainty_hor_m", F32),
        field("detection_window_length_sec", F32),
        field("echo_length_sec", F32),
        // Water column parameters
        field("wc_beam_numb", U16),
        field("wc_range_samples", U16),
        field("wc_nom_beam_angle_across_deg", F32),
        // Reflectivity data (backscatter, BS)
        field("mean_abs_coeff_db_per_km", F32),
        field("reflectivity1_db", F32),
        field("reflectivity2_db", F32),
        field("receiver_sensitivity_applied_db", F32),
        field("source_level_applied_db", F32),
        field("bs_calibration_db", F32),
        field("tvg_db", F32),
        // Range and angle data
        field("beam_angle_re_rx_deg", F32),
        field("beam_angle_correction_deg", F32),
        field("two_way_travel_time_sec", F32),
        field("two_way_travel_time_correction_sec", F32),
        // Georeferenced depth points
        field("delta_latitude_deg", F32),
        field("delta_longitude_deg", F32),
        field("z_re_ref_point_m", F32),
        field("y_re_ref_point_m", F32),
        field("x_re_ref_point_m", F32),
        field("beam_inc_angle_adj_deg", F32),
        field("realtime_clean_info", U16),
        // Seabed image
        field("si_start_range_samples", U16),
        field("si_centre_sample", U16),
        field("si_num_samples", U16),
        bytes("reserved", Width::Remainder),
    ],
);

const SOUNDING_SPAN: Span = Span::FromField {
    field: "rx_info.num_bytes_per_sounding",
    adjust: 0,
};

static MRZ: Descriptor = Descriptor::new(
    "MRZ",
    SizeRule::Enclosing,
    &[
        nested("header", &HEADER),
        nested("partition", &PARTITION),
        nested("cmn_part", &M_BODY),
        nested("ping_info", &MRZ_PING_INFO),
        when(
            Condition::Below {
                field: "header.dgm_version",
                limit: 1,
            },
            nested_with(
                "tx_sectors",
                &MRZ_TX_SECTOR_V0,
                Repeat::Count("ping_info.num_tx_sectors"),
                TX_SECTOR_SPAN,
            ),
        ),
        when(
            Condition::AtLeast {
                field: "header.dgm_version",
                min: 1,
            },
            nested_with(
                "tx_sectors",
                &MRZ_TX_SECTOR_V1,
                Repeat::Count("ping_info.num_tx_sectors"),
                TX_SECTOR_SPAN,
            ),
        ),
        nested("rx_info", &MRZ_RX_INFO),
        nested_with(
            "extra_det_classes",
            &MRZ_EXTRA_DET_CLASS,
            Repeat::Count("rx_info.num_extra_detection_classes"),
            Span::FromField {
                field: "rx_info.num_bytes_per_class",
                adjust: 0,
            },
        ),
        nested_with(
            "soundings",
            &MRZ_SOUNDING,
            Repeat::Count("rx_info.num_soundings_max_main"),
            SOUNDING_SPAN,
        ),
        nested_with(
            "extra_detections",
            &MRZ_SOUNDING,
            Repeat::Count("rx_info.num_extra_detections"),
            SOUNDING_SPAN,
        ),
        // i16 samples in 0.1 dB, `si_num_samples` per sounding
        bytes("seabed_image_samples", Width::Remainder),
        TRAILER,
    ],
);

static MWC_TX_INFO: Descriptor = Descriptor::new(
    "tx_info",
    SizeRule::FromField {
        field: "num_bytes_tx_info",
        adjust: 0,
    },
    &[
        field("num_bytes_tx_info", U16),
        field("num_tx_sectors", U16),
        field("num_bytes_per_tx_sector", U16),
        field("padding", I16),
        field("heave_m", F32),
    ],
);

static MWC_TX_SECTOR: Descriptor = Descriptor::new(
    "tx_sector",
    SizeRule::Open,
    &[
        field("tilt_angle_re_tx_deg", F32),
        field("centre_freq_hz", F32),
        field("tx_beam_width_along_deg", F32),
        field("tx_sector_num", U16),
        field("padding", I16),
    ],
);

static MWC_RX_INFO: Descriptor = Descriptor::new(
    "rx_info",
    SizeRule::FromField {
        field: "num_bytes_rx_info",
        adjust: 0,
    },
    &[
        field("num_bytes_rx_info", U16),
        field("num_beams", U16),
        field("num_bytes_per_beam_entry", U8),
        checked("phase_flag", U8, Constraint::OneOf(&[0, 1, 2])),
        field("tvg_function_applied", U8),
        field("tvg_offset_db", I8),
        field("sample_freq_hz", F32),
        field("sound_velocity_m_per_sec", F32),
    ],
);

static MWC: Descriptor = Descriptor::new(
    "MWC",
    SizeRule::Enclosing,
    &[
        nested("header", &HEADER),
        nested("partition", &PARTITION),
        nested("cmn_part", &M_BODY),
        nested("tx_info", &MWC_TX_INFO),
        nested_with(
            "tx_sectors",
            &MWC_TX_SECTOR,
            Repeat::Count("tx_info.num_tx_sectors"),
            Span::FromField {
                field: "tx_info.num_bytes_per_tx_sector",
                adjust: 0,
            },
        ),
        nested("rx_info", &MWC_RX_INFO),
        bytes("beam_data", Width::Remainder),
        TRAILER,
    ],
);

// =============================================================================
// File datagrams
// =============================================================================

static FCF_COMMON: Descriptor = Descriptor::new(
    "common",
    SizeRule::FromField {
        field: "num_bytes_cmn_part",
        adjust: 0,
    },
    &[
        field("num_bytes_cmn_part", U16),
        checked("file_status", I8, Constraint::OneOf(&[-1, 0, 1])),
        field("padding1", U8),
        field("num_bytes_file", U32),
        ascii("file_name", Width::Fixed(64)),
    ],
);

static FCF: Descriptor = Descriptor::new(
    "FCF",
    SizeRule::Enclosing,
    &[
        nested("header", &HEADER),
        nested("partition", &PARTITION),
        nested("common", &FCF_COMMON),
        bytes(
            "bsp_file",
            Width::FromField {
                field: "common.num_bytes_file",
                adjust: 0,
            },
        ),
        TRAILER,
    ],
);

// =============================================================================
// Catalog
// =============================================================================

const fn entry(
    code: &[u8; 4],
    name: &'static str,
    description: &'static str,
    descriptor: &'static Descriptor,
    min_header_len: usize,
) -> CatalogEntry {
    CatalogEntry {
        tag: TypeTag::ascii(*code),
        name,
        description,
        descriptor,
        min_header_len,
    }
}

static ENTRIES: &[CatalogEntry] = &[
    entry(b"#IIP", "IIP", "Installation parameters and sensor setup", &IIP, 30),
    entry(b"#IOP", "IOP", "Runtime parameters as chosen by operator", &IOP, 30),
    entry(b"#IBE", "IBE", "Built in test (BIST) error report", &IBE, 30),
    entry(b"#IBR", "IBR", "Built in test (BIST) reply", &IBR, 30),
    entry(b"#IBS", "IBS", "Built in test (BIST) short reply", &IBS, 30),
    entry(b"#SPO", "SPO", "Sensor position data", &SPO, 72),
    entry(b"#CPO", "CPO", "Compatibility position sensor data", &CPO, 72),
    entry(b"#SVP", "SVP", "Sound velocity profile", &SVP, 52),
    entry(b"#SVT", "SVT", "Sound velocity at transducer", &SVT, 44),
    entry(b"#SCL", "SCL", "Sensor clock datagram", &SCL, 40),
    entry(b"#SDE", "SDE", "Sensor depth data", &SDE, 64),
    entry(b"#SHI", "SHI", "Sensor height data", &SHI, 38),
    entry(b"#CHE", "CHE", "Compatibility heave data", &CHE, 40),
    entry(b"#SKM", "SKM", "Sensor attitude data (KM binary)", &SKM, 36),
    entry(b"#MRZ", "MRZ", "Multibeam raw range and depth", &MRZ, 184),
    entry(b"#MWC", "MWC", "Multibeam water column", &MWC, 68),
    entry(b"#FCF", "FCF", "Backscatter calibration file", &FCF, 100),
];

// Only the first datagram of a split ping carries the ping structures
const FIRST_PARTITION: Condition = Condition::Below {
    field: "partition.dgm_num",
    limit: 2,
};

static MRZ_HEAD: Descriptor = Descriptor::new(
    "MRZ",
    SizeRule::Open,
    &[
        nested("header", &HEADER),
        nested("partition", &PARTITION),
        when(FIRST_PARTITION, nested("cmn_part", &M_BODY)),
        when(FIRST_PARTITION, nested("ping_info", &MRZ_PING_INFO)),
        when(
            FIRST_PARTITION,
            nested_with(
                "tx_sectors",
                &MRZ_TX_SECTOR_V0,
                Repeat::Count("ping_info.num_tx_sectors"),
                TX_SECTOR_SPAN,
            ),
        ),
        when(FIRST_PARTITION, nested("rx_info", &MRZ_RX_INFO)),
    ],
);

static MWC_HEAD: Descriptor = Descriptor::new(
    "MWC",
    SizeRule::Open,
    &[
        nested("header", &HEADER),
        nested("partition", &PARTITION),
        when(FIRST_PARTITION, nested("cmn_part", &M_BODY)),
        when(FIRST_PARTITION, nested("tx_info", &MWC_TX_INFO)),
        when(
            FIRST_PARTITION,
            nested_with(
                "tx_sectors",
                &MWC_TX_SECTOR,
                Repeat::Count("tx_info.num_tx_sectors"),
                Span::FromField {
                    field: "tx_info.num_bytes_per_tx_sector",
                    adjust: 0,
                },
            ),
        ),
        when(FIRST_PARTITION, nested("rx_info", &MWC_RX_INFO)),
    ],
);

static PINGS: &[PingLayout] = &[
    PingLayout {
        tag: TypeTag::ascii(*b"#MRZ"),
        head: &MRZ_HEAD,
        partition_count: "partition.num_of_dgms",
        partition_number: "partition.dgm_num",
        beams: "rx_info.num_soundings_max_main",
        tx_sectors: "ping_info.num_tx_sectors",
    },
    PingLayout {
        tag: TypeTag::ascii(*b"#MWC"),
        head: &MWC_HEAD,
        partition_count: "partition.num_of_dgms",
        partition_number: "partition.dgm_num",
        beams: "rx_info.num_beams",
        tx_sectors: "tx_info.num_tx_sectors",
    },
];

pub static CATALOG: Catalog = Catalog {
    format: FormatId::Kmall,
    name: "Kongsberg KMALL",
    layout: LAYOUT,
    entries: ENTRIES,
    pings: PINGS,
};
