//! Frame layouts and delimited frames
//!
//! A [`FrameLayout`] says where a format's frame header keeps its length,
//! type tag, sync pattern, timestamp and bookend. The demarcator only ever
//! looks at frames through this description.

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::Serialize;

use crate::error::ParseError;
use crate::schema::Endian;
use crate::tag::TypeTag;

// =============================================================================
// Layout description
// =============================================================================

/// Unsigned integer at a fixed header offset
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IntField {
    pub offset: usize,
    /// 1, 2, 4 or 8 bytes
    pub width: usize,
    pub endian: Endian,
}

impl IntField {
    pub const fn le(offset: usize, width: usize) -> Self {
        Self {
            offset,
            width,
            endian: Endian::Little,
        }
    }

    /// Read the field; `None` when the header is too short
    pub fn read(&self, header: &[u8]) -> Option<u64> {
        read_uint(header.get(self.offset..self.offset + self.width)?, self.endian)
    }

    pub fn end(&self) -> usize {
        self.offset + self.width
    }
}

/// Decode 1 to 8 bytes as an unsigned integer
pub(crate) fn read_uint(raw: &[u8], endian: Endian) -> Option<u64> {
    if raw.is_empty() || raw.len() > 8 {
        return None;
    }
    let mut value = 0u64;
    match endian {
        Endian::Little => {
            for &b in raw.iter().rev() {
                value = (value << 8) | b as u64;
            }
        }
        Endian::Big => {
            for &b in raw {
                value = (value << 8) | b as u64;
            }
        }
    }
    Some(value)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagField {
    /// Four ASCII characters, optionally starting with a fixed byte
    Ascii { offset: usize, prefix: Option<u8> },
    Numeric(IntField),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeField {
    /// Unix seconds plus nanoseconds
    UnixNanos { seconds: IntField, nanos: IntField },
    /// Reson 7k time: u16 year, u16 day of year, f32 seconds, u8 hours,
    /// u8 minutes, all little-endian
    Reson7k { offset: usize },
}

impl TimeField {
    fn decode(&self, header: &[u8]) -> Option<DateTime<Utc>> {
        match *self {
            TimeField::UnixNanos { seconds, nanos } => {
                let secs = seconds.read(header)?;
                let nanos = u32::try_from(nanos.read(header)?).ok()?;
                DateTime::from_timestamp(i64::try_from(secs).ok()?, nanos)
            }
            TimeField::Reson7k { offset } => {
                let raw = header.get(offset..offset + 10)?;
                let year = u16::from_le_bytes([raw[0], raw[1]]);
                let day = u16::from_le_bytes([raw[2], raw[3]]);
                let seconds = f32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
                let hours = raw[8];
                let minutes = raw[9];
                if !(0.0..61.0).contains(&seconds) {
                    return None;
                }
                let base = NaiveDate::from_yo_opt(year as i32, day as u32)?.and_hms_opt(
                    hours as u32,
                    minutes as u32,
                    0,
                )?;
                let micros = (seconds as f64 * 1e6).round() as i64;
                Some((base + TimeDelta::microseconds(micros)).and_utc())
            }
        }
    }
}

/// Trailer that repeats or checks the header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bookend {
    /// The last `width` bytes repeat the raw length field
    TrailingLength { width: usize, endian: Endian },
    /// The last 4 bytes hold the wrapping u32 sum of every preceding byte.
    /// When `flag` is set the trailer is only present if `flag & mask != 0`.
    Checksum {
        endian: Endian,
        flag: Option<(IntField, u64)>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncPattern {
    pub offset: usize,
    pub pattern: &'static [u8],
}

/// Per-format frame header layout
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameLayout {
    /// Bytes read to decide everything about a frame
    pub header_len: usize,
    pub length: IntField,
    /// Added to the length field to get the total frame length
    pub length_adjust: i64,
    pub tag: TagField,
    pub sync: Option<SyncPattern>,
    pub time: Option<TimeField>,
    pub bookend: Option<Bookend>,
    pub min_frame_len: u64,
    pub max_frame_len: u64,
}

/// What a header says about its frame
#[derive(Clone, Debug, PartialEq)]
pub struct HeaderInfo {
    pub tag: TypeTag,
    /// Total frame length in bytes
    pub length: u64,
    /// Raw value of the length field, as repeated by a trailing bookend
    pub raw_length: u64,
    /// Bytes taken by the bookend at the end of the frame
    pub trailer_len: usize,
    pub time: Option<DateTime<Utc>>,
}

impl FrameLayout {
    /// Parse a header. `header` must hold at least `header_len` bytes.
    pub fn probe(&self, header: &[u8]) -> Result<HeaderInfo, ParseError> {
        if header.len() < self.header_len {
            return Err(ParseError::truncated("frame header", 0, self.header_len, header.len()));
        }

        if let Some(sync) = &self.sync {
            let found = &header[sync.offset..sync.offset + sync.pattern.len()];
            if found != sync.pattern {
                return Err(ParseError::InvalidHeader(format!(
                    "sync pattern {:02x?} not found, got {:02x?}",
                    sync.pattern, found
                )));
            }
        }

        let tag = self.read_tag(header)?;

        let raw_length = self
            .length
            .read(header)
            .ok_or_else(|| ParseError::InvalidHeader("length field outside header".into()))?;
        let length = raw_length as i128 + self.length_adjust as i128;
        let trailer_len = self.trailer_len(header);
        let min = self.min_frame_len.max((self.header_len + trailer_len) as u64) as i128;
        if length < min || length > self.max_frame_len as i128 {
            return Err(ParseError::InvalidHeader(format!(
                "implausible frame length {} for {}",
                length, tag
            )));
        }

        Ok(HeaderInfo {
            tag,
            length: length as u64,
            raw_length,
            trailer_len,
            time: self.time.and_then(|t| t.decode(header)),
        })
    }

    fn read_tag(&self, header: &[u8]) -> Result<TypeTag, ParseError> {
        match self.tag {
            TagField::Ascii { offset, prefix } => {
                let mut code = [0u8; 4];
                code.copy_from_slice(&header[offset..offset + 4]);
                if let Some(p) = prefix {
                    if code[0] != p {
                        return Err(ParseError::InvalidHeader(format!(
                            "type code must start with {:?}",
                            p as char
                        )));
                    }
                }
                let body = if prefix.is_some() { &code[1..] } else { &code[..] };
                if !body.iter().all(|b| b.is_ascii_alphanumeric()) {
                    return Err(ParseError::InvalidHeader(format!(
                        "type code {} is not ASCII",
                        TypeTag::ascii(code)
                    )));
                }
                Ok(TypeTag::ascii(code))
            }
            TagField::Numeric(field) => field
                .read(header)
                .and_then(|v| u32::try_from(v).ok())
                .map(TypeTag::numeric)
                .ok_or_else(|| ParseError::InvalidHeader("type id outside header".into())),
        }
    }

    /// Bookend size for the frame this header describes
    pub fn trailer_len(&self, header: &[u8]) -> usize {
        match self.bookend {
            None => 0,
            Some(Bookend::TrailingLength { width, .. }) => width,
            Some(Bookend::Checksum { flag: None, .. }) => 4,
            Some(Bookend::Checksum {
                flag: Some((field, mask)),
                ..
            }) => match field.read(header) {
                Some(v) if v & mask != 0 => 4,
                _ => 0,
            },
        }
    }

    /// Check a full frame's bookend against its header
    pub fn verify_bookend(&self, info: &HeaderInfo, trailer: &[u8], frame: Option<&[u8]>) -> Result<(), ParseError> {
        match self.bookend {
            None => Ok(()),
            Some(Bookend::TrailingLength { endian, .. }) => {
                let trailing = read_uint(trailer, endian).unwrap_or(u64::MAX);
                if trailing != info.raw_length {
                    return Err(ParseError::BookendMismatch {
                        leading: info.raw_length,
                        trailing,
                    });
                }
                Ok(())
            }
            Some(Bookend::Checksum { endian, .. }) => {
                if info.trailer_len == 0 {
                    return Ok(());
                }
                let Some(frame) = frame else {
                    return Err(ParseError::InvalidHeader("checksum needs the frame body".into()));
                };
                let body = &frame[..frame.len() - info.trailer_len];
                let sum = checksum(body) as u64;
                let trailing = read_uint(trailer, endian).unwrap_or(u64::MAX);
                if sum != trailing {
                    return Err(ParseError::BookendMismatch { leading: sum, trailing });
                }
                Ok(())
            }
        }
    }

    /// Whether the whole frame must be read to verify the bookend
    pub fn needs_body_for_bookend(&self, info: &HeaderInfo) -> bool {
        matches!(self.bookend, Some(Bookend::Checksum { .. })) && info.trailer_len > 0
    }
}

/// Wrapping u32 sum of all bytes
pub fn checksum(data: &[u8]) -> u32 {
    data.iter().fold(0u32, |acc, &b| acc.wrapping_add(b as u32))
}

// =============================================================================
// Delimited frames
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameStatus {
    Valid,
    /// The header is valid but the stream ends after `available` bytes
    Truncated { available: u64 },
    /// Bytes skipped while resynchronising
    Corrupt,
}

/// One delimited region of the stream
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Frame {
    pub offset: u64,
    pub length: u64,
    /// Absent only for corrupt regions
    pub tag: Option<TypeTag>,
    pub time: Option<DateTime<Utc>>,
    pub status: FrameStatus,
}

impl Frame {
    /// Offset just past the frame, clamped to the bytes that exist
    pub fn end(&self) -> u64 {
        match self.status {
            FrameStatus::Truncated { available } => self.offset + available,
            _ => self.offset + self.length,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.status == FrameStatus::Valid
    }
}
