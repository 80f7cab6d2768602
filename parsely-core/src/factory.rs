//! Record factory: the single generic decoder behind every descriptor
//!
//! Items are resolved strictly left to right. Length fields feed later
//! widths, repetition counts and spans through dotted paths into the part of
//! the record already decoded. A record either decodes completely or the
//! whole build fails.

use crate::error::ParseError;
use crate::record::{Record, Value};
use crate::schema::{
    item_fixed_size, Condition, Constraint, Descriptor, Endian, FieldSpec, Item, ItemKind, NestedSpec, Primitive,
    Repeat, SizeRule, Span, Width,
};

/// Default bound on descriptor nesting
pub const DEFAULT_MAX_DEPTH: usize = 16;

#[derive(Debug, Clone, Copy)]
pub struct RecordFactory {
    byte_order: Option<Endian>,
    max_depth: usize,
}

impl Default for RecordFactory {
    fn default() -> Self {
        Self {
            byte_order: None,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl RecordFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every descriptor's default byte order. Fields with an
    /// explicit byte order keep it.
    pub fn with_byte_order(mut self, byte_order: Option<Endian>) -> Self {
        self.byte_order = byte_order;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Decode one record starting at `offset` in `bytes`.
    ///
    /// Returns the record and the number of bytes it occupies. Reads never
    /// go past the end of `bytes`.
    pub fn build(
        &self,
        descriptor: &'static Descriptor,
        bytes: &[u8],
        offset: usize,
    ) -> Result<(Record, usize), ParseError> {
        if offset > bytes.len() {
            return Err(ParseError::truncated(descriptor.name, offset, 0, 0));
        }
        let record = self.build_at(descriptor, bytes, offset, bytes.len(), 0)?;
        let consumed = record.len();
        Ok((record, consumed))
    }

    /// Decode a top-level datagram that must consume exactly `frame`
    pub fn build_frame(&self, descriptor: &'static Descriptor, frame: &[u8]) -> Result<Record, ParseError> {
        let (record, consumed) = self.build(descriptor, frame, 0)?;
        if consumed != frame.len() {
            return Err(ParseError::SizeMismatch {
                context: descriptor.name.to_string(),
                expected: frame.len(),
                consumed,
            });
        }
        Ok(record)
    }

    fn build_at(
        &self,
        desc: &'static Descriptor,
        bytes: &[u8],
        start: usize,
        limit: usize,
        depth: usize,
    ) -> Result<Record, ParseError> {
        if depth > self.max_depth {
            return Err(ParseError::FieldValidation {
                record: desc.name,
                field: "<nesting>".into(),
                reason: format!("nesting deeper than {} levels", self.max_depth),
            });
        }

        let mut record = Record::empty(desc.name);
        let mut cursor = start;
        let mut declared_end = match desc.size {
            SizeRule::Fixed(n) => {
                if start + n > limit {
                    return Err(ParseError::truncated(desc.name, start, n, limit - start));
                }
                Some(start + n)
            }
            SizeRule::Enclosing => Some(limit),
            SizeRule::FromField { .. } | SizeRule::Open => None,
        };
        let default_endian = self.byte_order.unwrap_or(desc.endian);

        for (i, item) in desc.items.iter().enumerate() {
            if let Some(cond) = &item.when {
                if !condition_holds(&record, cond) {
                    continue;
                }
            }
            let window = Window {
                desc,
                start,
                declared_end,
                limit,
            };

            match &item.kind {
                ItemKind::Field(spec) => {
                    let width = field_width(desc, spec, &record, cursor, window.bound(), &desc.items[i + 1..])?;
                    window.claim(spec.name, cursor, width)?;
                    let raw = &bytes[cursor..cursor + width];
                    let endian = spec.endian.unwrap_or(default_endian);
                    let value = decode(spec.primitive, raw, endian).map_err(|reason| ParseError::FieldValidation {
                        record: desc.name,
                        field: spec.name.into(),
                        reason,
                    })?;
                    if let Some(constraint) = &spec.constraint {
                        check(desc, spec, &value, constraint, &record)?;
                    }
                    record.push_field(spec.name, value);
                    cursor += width;
                }
                ItemKind::Nested(spec) => {
                    cursor = self.build_children(desc, spec, bytes, cursor, window, &mut record, depth)?;
                }
                ItemKind::Skip(n) => {
                    window.claim("<padding>", cursor, *n)?;
                    cursor += n;
                }
                ItemKind::Align(n) => {
                    let pad = if *n == 0 { 0 } else { (n - (cursor - start) % n) % n };
                    window.claim("<alignment>", cursor, pad)?;
                    cursor += pad;
                }
            }

            if declared_end.is_none() {
                if let SizeRule::FromField { field, adjust } = desc.size {
                    if record.get(field).is_some() {
                        let declared = adjusted(desc, field, lookup_uint(desc, field, &record, field)?, adjust)?;
                        let end = match start.checked_add(declared) {
                            Some(end) if end <= limit => end,
                            _ => return Err(ParseError::truncated(desc.name, start, declared, limit - start)),
                        };
                        if end < cursor {
                            return Err(ParseError::SizeMismatch {
                                context: desc.name.to_string(),
                                expected: declared,
                                consumed: cursor - start,
                            });
                        }
                        declared_end = Some(end);
                    }
                }
            }
        }

        let (len, tail) = match (desc.size, declared_end) {
            (SizeRule::Fixed(_) | SizeRule::FromField { .. }, Some(end)) => (end - start, end - cursor),
            (SizeRule::FromField { field, .. }, None) => {
                return Err(ParseError::FieldValidation {
                    record: desc.name,
                    field: field.into(),
                    reason: "size field never decoded".into(),
                })
            }
            _ => (cursor - start, 0),
        };
        if tail > 0 {
            log::trace!("{}: skipping {} byte extension at offset {}", desc.name, tail, cursor);
        }
        record.finish(len, tail);
        Ok(record)
    }

    #[allow(clippy::too_many_arguments)]
    fn build_children(
        &self,
        desc: &'static Descriptor,
        spec: &NestedSpec,
        bytes: &[u8],
        mut cursor: usize,
        window: Window,
        record: &mut Record,
        depth: usize,
    ) -> Result<usize, ParseError> {
        let count = match spec.repeat {
            Repeat::Once => 1,
            Repeat::Count(path) => lookup_uint(desc, spec.name, record, path)?,
        };
        let reserved = match spec.span {
            Span::Natural => None,
            Span::Fixed(n) => Some(n),
            Span::FromField { field, adjust } => {
                Some(adjusted(desc, spec.name, lookup_uint(desc, spec.name, record, field)?, adjust)?)
            }
        };

        // Refuse counts the remaining bytes cannot possibly hold
        let remaining = window.bound().saturating_sub(cursor);
        let per_instance = reserved.or_else(|| spec.descriptor.fixed_size()).unwrap_or(1).max(1) as u64;
        if count.saturating_mul(per_instance) > remaining as u64 {
            return Err(ParseError::truncated(
                window.context(spec.name),
                cursor,
                usize::try_from(count.saturating_mul(per_instance)).unwrap_or(usize::MAX),
                remaining,
            ));
        }

        record.open_slot(spec.name, spec.repeat != Repeat::Once);
        for _ in 0..count {
            let child_limit = match reserved {
                Some(r) => {
                    window.claim(spec.name, cursor, r)?;
                    cursor + r
                }
                None => window.bound(),
            };
            let child = self.build_at(spec.descriptor, bytes, cursor, child_limit, depth + 1)?;
            if let Some(r) = reserved {
                if child.len() != r {
                    return Err(ParseError::SizeMismatch {
                        context: window.context(spec.name),
                        expected: r,
                        consumed: child.len(),
                    });
                }
            }
            cursor += child.len();
            record.push_child(spec.name, child);
        }
        Ok(cursor)
    }
}

/// Byte window a record's items may occupy
#[derive(Clone, Copy)]
struct Window {
    desc: &'static Descriptor,
    start: usize,
    declared_end: Option<usize>,
    limit: usize,
}

impl Window {
    fn bound(&self) -> usize {
        self.declared_end.unwrap_or(self.limit)
    }

    fn context(&self, item: &str) -> String {
        format!("{}.{}", self.desc.name, item)
    }

    /// Check that `width` bytes at `cursor` belong to this record
    fn claim(&self, item: &str, cursor: usize, width: usize) -> Result<(), ParseError> {
        let want = cursor.saturating_add(width);
        if want > self.limit {
            return Err(ParseError::truncated(
                self.context(item),
                cursor,
                width,
                self.limit.saturating_sub(cursor),
            ));
        }
        if let Some(end) = self.declared_end {
            if want > end {
                return Err(ParseError::SizeMismatch {
                    context: self.desc.name.to_string(),
                    expected: end - self.start,
                    consumed: want - self.start,
                });
            }
        }
        Ok(())
    }
}

fn field_width(
    desc: &'static Descriptor,
    spec: &FieldSpec,
    record: &Record,
    cursor: usize,
    bound: usize,
    rest: &[Item],
) -> Result<usize, ParseError> {
    match spec.width {
        Width::Natural => spec.primitive.size().ok_or_else(|| ParseError::FieldValidation {
            record: desc.name,
            field: spec.name.into(),
            reason: format!("{} field needs an explicit width", spec.primitive.name()),
        }),
        Width::Fixed(n) => Ok(n),
        Width::FromField { field, adjust } => adjusted(desc, spec.name, lookup_uint(desc, spec.name, record, field)?, adjust),
        Width::Remainder => {
            let trailing = trailing_size(desc, spec, record, rest)?;
            let available = bound.saturating_sub(cursor);
            available.checked_sub(trailing).ok_or_else(|| {
                ParseError::truncated(format!("{}.{}", desc.name, spec.name), cursor, trailing, available)
            })
        }
    }
}

/// Bytes taken by the fixed-size items after a remainder field
fn trailing_size(desc: &'static Descriptor, spec: &FieldSpec, record: &Record, rest: &[Item]) -> Result<usize, ParseError> {
    let mut total = 0;
    for item in rest {
        if let Some(cond) = &item.when {
            if !condition_holds(record, cond) {
                continue;
            }
        }
        total += item_fixed_size(item).ok_or_else(|| ParseError::FieldValidation {
            record: desc.name,
            field: spec.name.into(),
            reason: "remainder must be followed by fixed-size items only".into(),
        })?;
    }
    Ok(total)
}

fn condition_holds(record: &Record, cond: &Condition) -> bool {
    match *cond {
        Condition::FlagSet { field, mask } => record.get_u64(field).is_some_and(|v| v & mask != 0),
        Condition::AtLeast { field, min } => record.get_u64(field).is_some_and(|v| v >= min),
        Condition::Below { field, limit } => record.get_u64(field).is_some_and(|v| v < limit),
    }
}

/// Non-negative integer at `path`, read for the benefit of item `item`
fn lookup_uint(desc: &'static Descriptor, item: &str, record: &Record, path: &str) -> Result<u64, ParseError> {
    let value = record.get(path).ok_or_else(|| ParseError::FieldValidation {
        record: desc.name,
        field: item.into(),
        reason: format!("length field {} not decoded yet", path),
    })?;
    value.as_u64().ok_or_else(|| ParseError::FieldValidation {
        record: desc.name,
        field: item.into(),
        reason: format!("{} = {} is not a usable length", path, value),
    })
}

fn adjusted(desc: &'static Descriptor, item: &str, value: u64, adjust: i64) -> Result<usize, ParseError> {
    let total = value as i128 + adjust as i128;
    usize::try_from(total).map_err(|_| ParseError::FieldValidation {
        record: desc.name,
        field: item.into(),
        reason: format!("length {} adjusted by {} is negative", value, adjust),
    })
}

fn check(
    desc: &'static Descriptor,
    spec: &FieldSpec,
    value: &Value,
    constraint: &Constraint,
    record: &Record,
) -> Result<(), ParseError> {
    let reason = match *constraint {
        Constraint::OneOf(allowed) => match value.as_i64() {
            Some(v) if allowed.contains(&v) => return Ok(()),
            _ => format!("{} is not one of {:?}", value, allowed),
        },
        Constraint::Range { min, max } => match value.as_f64() {
            Some(v) if v >= min && v <= max => return Ok(()),
            _ => format!("{} outside [{}, {}]", value, min, max),
        },
        Constraint::EqualsField(path) => {
            let expected = record.get_u64(path);
            if expected.is_some() && value.as_u64() == expected {
                return Ok(());
            }
            match expected {
                Some(e) => format!("{} does not match {} = {}", value, path, e),
                None => format!("{} cannot be compared, {} not decoded", value, path),
            }
        }
    };
    Err(ParseError::FieldValidation {
        record: desc.name,
        field: spec.name.into(),
        reason,
    })
}

macro_rules! number {
    ($raw:expr, $endian:expr, $ty:ty, $variant:ident) => {{
        let arr: [u8; std::mem::size_of::<$ty>()] = $raw
            .try_into()
            .map_err(|_| format!("{} needs {} bytes, got {}", stringify!($ty), std::mem::size_of::<$ty>(), $raw.len()))?;
        Value::$variant(match $endian {
            Endian::Little => <$ty>::from_le_bytes(arr),
            Endian::Big => <$ty>::from_be_bytes(arr),
        })
    }};
}

fn decode(primitive: Primitive, raw: &[u8], endian: Endian) -> Result<Value, String> {
    Ok(match primitive {
        Primitive::U8 => number!(raw, endian, u8, U8),
        Primitive::I8 => number!(raw, endian, i8, I8),
        Primitive::U16 => number!(raw, endian, u16, U16),
        Primitive::I16 => number!(raw, endian, i16, I16),
        Primitive::U32 => number!(raw, endian, u32, U32),
        Primitive::I32 => number!(raw, endian, i32, I32),
        Primitive::U64 => number!(raw, endian, u64, U64),
        Primitive::I64 => number!(raw, endian, i64, I64),
        Primitive::F32 => number!(raw, endian, f32, F32),
        Primitive::F64 => number!(raw, endian, f64, F64),
        Primitive::Bytes => Value::Bytes(raw.to_vec()),
        Primitive::Ascii => {
            let text = raw.split(|&b| b == 0).next().unwrap_or(raw);
            let text = std::str::from_utf8(text).map_err(|e| format!("text is not valid UTF-8: {}", e))?;
            Value::Text(text.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::*;

    // size u16, count u16, samples, note (remainder), trailing size copy
    static SAMPLE: Descriptor = Descriptor::new(
        "sample",
        SizeRule::Open,
        &[field("depth_m", Primitive::F32), field("flags", Primitive::U8), skip(1)],
    );

    static INFO: Descriptor = Descriptor::new(
        "info",
        SizeRule::FromField {
            field: "num_bytes",
            adjust: 0,
        },
        &[field("num_bytes", Primitive::U16), field("count", Primitive::U16)],
    );

    static DGM: Descriptor = Descriptor::new(
        "DGM",
        SizeRule::Enclosing,
        &[
            field("size", Primitive::U32),
            nested("info", &INFO),
            repeated("samples", &SAMPLE, "info.count"),
            ascii("note", Width::Remainder),
            checked("size_end", Primitive::U32, Constraint::EqualsField("size")),
        ],
    );

    fn dgm_bytes(info_len: u16, samples: &[(f32, u8)], note: &[u8]) -> Vec<u8> {
        let total = 4 + info_len as usize + samples.len() * 6 + note.len() + 4;
        let mut b = (total as u32).to_le_bytes().to_vec();
        b.extend_from_slice(&info_len.to_le_bytes());
        b.extend_from_slice(&(samples.len() as u16).to_le_bytes());
        b.resize(4 + info_len as usize, 0xEE);
        for (d, f) in samples {
            b.extend_from_slice(&d.to_le_bytes());
            b.push(*f);
            b.push(0);
        }
        b.extend_from_slice(note);
        b.extend_from_slice(&(total as u32).to_le_bytes());
        b
    }

    #[test]
    fn test_nested_and_repeated() {
        let bytes = dgm_bytes(4, &[(1.5, 1), (2.5, 0)], b"hi\0\0");
        let record = RecordFactory::new().build_frame(&DGM, &bytes).unwrap();

        assert_eq!(record.len(), bytes.len());
        assert_eq!(record.get_u64("info.count"), Some(2));
        assert_eq!(record.get_f64("samples[1].depth_m"), Some(2.5));
        assert_eq!(record.get("note").and_then(Value::as_str), Some("hi"));
        assert_eq!(record.children_named("samples").count(), 2);
    }

    #[test]
    fn test_child_spans_are_contained() {
        let bytes = dgm_bytes(4, &[(1.0, 0), (2.0, 0), (3.0, 0)], b"");
        let record = RecordFactory::new().build_frame(&DGM, &bytes).unwrap();
        let child_total: usize = record.children().map(|(_, c)| c.len()).sum();
        assert!(child_total <= record.len());
        assert_eq!(child_total, 4 + 3 * 6);
    }

    #[test]
    fn test_forward_compatible_tail_skipped() {
        // info declares 8 bytes, only 4 are described
        let bytes = dgm_bytes(8, &[(1.0, 0)], b"");
        let record = RecordFactory::new().build_frame(&DGM, &bytes).unwrap();
        let info = record.child("info").unwrap();
        assert_eq!(info.len(), 8);
        assert_eq!(info.tail_len(), 4);
        assert_eq!(record.get_f64("samples[0].depth_m"), Some(1.0));
    }

    #[test]
    fn test_declared_size_smaller_than_items() {
        let bytes = dgm_bytes(2, &[], b"");
        let err = RecordFactory::new().build_frame(&DGM, &bytes).unwrap_err();
        assert!(matches!(err, ParseError::SizeMismatch { .. }), "{err}");
    }

    #[test]
    fn test_truncated_slice() {
        let bytes = dgm_bytes(4, &[(1.0, 0), (2.0, 0)], b"");
        let err = RecordFactory::new().build(&DGM, &bytes[..14], 0).unwrap_err();
        assert_eq!(err.kind(), "truncated");
    }

    #[test]
    fn test_bookend_constraint() {
        let mut bytes = dgm_bytes(4, &[], b"ab");
        let n = bytes.len();
        bytes[n - 4..].copy_from_slice(&99u32.to_le_bytes());
        match RecordFactory::new().build_frame(&DGM, &bytes) {
            Err(ParseError::FieldValidation { record, field, .. }) => {
                assert_eq!(record, "DGM");
                assert_eq!(field, "size_end");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_non_utf8_text_rejected() {
        let bytes = dgm_bytes(4, &[], &[0xC3, 0x28]);
        let err = RecordFactory::new().build_frame(&DGM, &bytes).unwrap_err();
        assert_eq!(err.kind(), "field_validation");
    }

    static MODE: Descriptor = Descriptor::new(
        "MODE",
        SizeRule::Open,
        &[
            checked("mode", Primitive::U8, Constraint::OneOf(&[0, 1, 2])),
            checked("angle", Primitive::I8, Constraint::Range { min: -90.0, max: 90.0 }),
        ],
    );

    #[test]
    fn test_one_of_and_range() {
        let f = RecordFactory::new();
        assert!(f.build(&MODE, &[2, 10], 0).is_ok());
        assert!(f.build(&MODE, &[3, 10], 0).is_err());
        assert!(f.build(&MODE, &[0, (-100i8) as u8], 0).is_err());
    }

    static EXACT: Descriptor = Descriptor::new("EXACT", SizeRule::Enclosing, &[field("a", Primitive::U16)]);

    #[test]
    fn test_build_frame_requires_exact_consumption() {
        let f = RecordFactory::new();
        assert_eq!(
            f.build_frame(&EXACT, &[1, 0, 9]),
            Err(ParseError::SizeMismatch {
                context: "EXACT".into(),
                expected: 3,
                consumed: 2
            })
        );
        let (r, n) = f.build(&EXACT, &[9, 9, 1, 0], 2).unwrap();
        assert_eq!(n, 2);
        assert_eq!(r.get_u64("a"), Some(1));
    }

    static RESERVED: Descriptor = Descriptor::new(
        "RESERVED",
        SizeRule::Open,
        &[
            field("per", Primitive::U8),
            nested_with("item", &EXACT, Repeat::Once, Span::FromField { field: "per", adjust: 0 }),
        ],
    );

    #[test]
    fn test_reserved_span_mismatch() {
        let f = RecordFactory::new();
        assert!(f.build(&RESERVED, &[2, 5, 0], 0).is_ok());
        let err = f.build(&RESERVED, &[3, 5, 0, 0], 0).unwrap_err();
        assert_eq!(
            err,
            ParseError::SizeMismatch {
                context: "RESERVED.item".into(),
                expected: 3,
                consumed: 2
            }
        );
    }

    static WORDS: Descriptor = Descriptor::new("WORDS", SizeRule::Open, &[field("a", Primitive::U16), field_endian("b", Primitive::U16, Endian::Little)]);

    #[test]
    fn test_byte_order_override() {
        let f = RecordFactory::new().with_byte_order(Some(Endian::Big));
        let (r, _) = f.build(&WORDS, &[0x01, 0x02, 0x01, 0x02], 0).unwrap();
        assert_eq!(r.get_u64("a"), Some(0x0102));
        assert_eq!(r.get_u64("b"), Some(0x0201));
    }

    static OPTIONAL: Descriptor = Descriptor::new(
        "OPTIONAL",
        SizeRule::Open,
        &[
            field("flags", Primitive::U8),
            when(Condition::FlagSet { field: "flags", mask: 0x1 }, field("extra", Primitive::U8)),
            field("last", Primitive::U8),
        ],
    );

    #[test]
    fn test_conditional_item() {
        let f = RecordFactory::new();
        let (r, n) = f.build(&OPTIONAL, &[1, 7, 9], 0).unwrap();
        assert_eq!((n, r.get_u64("extra"), r.get_u64("last")), (3, Some(7), Some(9)));
        let (r, n) = f.build(&OPTIONAL, &[0, 9], 0).unwrap();
        assert_eq!((n, r.get("extra"), r.get_u64("last")), (2, None, Some(9)));
    }

    static BY_VERSION: Descriptor = Descriptor::new(
        "BY_VERSION",
        SizeRule::Open,
        &[
            field("version", Primitive::U8),
            when(Condition::Below { field: "version", limit: 2 }, field("old", Primitive::U8)),
            when(Condition::AtLeast { field: "version", min: 2 }, field("new", Primitive::U16)),
        ],
    );

    #[test]
    fn test_version_conditions() {
        let f = RecordFactory::new();
        let (r, n) = f.build(&BY_VERSION, &[1, 7], 0).unwrap();
        assert_eq!((n, r.get_u64("old"), r.get("new")), (2, Some(7), None));
        let (r, n) = f.build(&BY_VERSION, &[2, 7, 1], 0).unwrap();
        assert_eq!((n, r.get("old"), r.get_u64("new")), (3, None, Some(0x0107)));
    }

    static SIZED: Descriptor = Descriptor::new(
        "SIZED",
        SizeRule::FromField {
            field: "size",
            adjust: 0,
        },
        &[field("size", Primitive::U64)],
    );

    #[test]
    fn test_huge_declared_size_is_truncated() {
        let mut bytes = vec![0xAA];
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        let err = RecordFactory::new().build(&SIZED, &bytes, 1).unwrap_err();
        assert_eq!(err.kind(), "truncated");
    }

    static LOOP: Descriptor = Descriptor::new("LOOP", SizeRule::Open, &[nested("inner", &LOOP)]);

    #[test]
    fn test_depth_limit() {
        let err = RecordFactory::new().with_max_depth(4).build(&LOOP, &[0u8; 8], 0).unwrap_err();
        assert!(matches!(err, ParseError::FieldValidation { field, .. } if field == "<nesting>"));
    }

    #[test]
    fn test_absurd_count_rejected_before_allocation() {
        static MANY: Descriptor = Descriptor::new(
            "MANY",
            SizeRule::Open,
            &[field("n", Primitive::U32), repeated("s", &SAMPLE, "n")],
        );
        let mut bytes = u32::MAX.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; 12]);
        let err = RecordFactory::new().build(&MANY, &bytes, 0).unwrap_err();
        assert_eq!(err.kind(), "truncated");
    }
}
