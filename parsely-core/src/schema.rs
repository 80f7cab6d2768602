//! Static record descriptors
//!
//! A [`Descriptor`] is an ordered list of [`Item`]s plus a [`SizeRule`].
//! Descriptors are built with the `const fn` helpers at the bottom of this
//! module so the per-format catalogs can declare them as `static` tables.

use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

/// Byte order of a numeric field
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize, IntoStaticStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Endian {
    #[default]
    Little,
    Big,
}

/// Primitive field types understood by the factory
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Primitive {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
    /// Raw byte run
    Bytes,
    /// Text, cut at the first NUL, must be valid UTF-8
    Ascii,
}

impl Primitive {
    /// Encoded size of numeric primitives, `None` for byte runs and text
    pub const fn size(&self) -> Option<usize> {
        match self {
            Primitive::U8 | Primitive::I8 => Some(1),
            Primitive::U16 | Primitive::I16 => Some(2),
            Primitive::U32 | Primitive::I32 | Primitive::F32 => Some(4),
            Primitive::U64 | Primitive::I64 | Primitive::F64 => Some(8),
            Primitive::Bytes | Primitive::Ascii => None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.into()
    }
}

/// Width of a byte-run or text field
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Width {
    /// Size of the numeric primitive
    Natural,
    Fixed(usize),
    /// Value of an earlier field plus `adjust`
    FromField { field: &'static str, adjust: i64 },
    /// Everything up to the end of the enclosing span, minus the fixed-size
    /// items that follow
    Remainder,
}

/// Check applied to a decoded value
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Constraint {
    OneOf(&'static [i64]),
    /// Inclusive range
    Range { min: f64, max: f64 },
    /// Must equal the integer value found at a dotted path
    EqualsField(&'static str),
}

/// Presence condition, evaluated against fields already decoded
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Condition {
    /// Present when `value & mask != 0`
    FlagSet { field: &'static str, mask: u64 },
    /// Present when `value >= min`
    AtLeast { field: &'static str, min: u64 },
    /// Present when `value < limit`
    Below { field: &'static str, limit: u64 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub primitive: Primitive,
    pub width: Width,
    pub endian: Option<Endian>,
    pub constraint: Option<Constraint>,
}

/// How many times a nested record repeats
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Repeat {
    Once,
    /// Count read from an earlier field
    Count(&'static str),
}

/// Bytes the enclosing layout reserves for each nested instance
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Span {
    /// Whatever the child's own size rule says
    Natural,
    Fixed(usize),
    FromField { field: &'static str, adjust: i64 },
}

#[derive(Clone, Copy, Debug)]
pub struct NestedSpec {
    pub name: &'static str,
    pub descriptor: &'static Descriptor,
    pub repeat: Repeat,
    pub span: Span,
}

#[derive(Clone, Copy, Debug)]
pub enum ItemKind {
    Field(FieldSpec),
    Nested(NestedSpec),
    /// Skip a fixed number of bytes
    Skip(usize),
    /// Advance the cursor to a multiple of N relative to the record start
    Align(usize),
}

#[derive(Clone, Copy, Debug)]
pub struct Item {
    pub kind: ItemKind,
    pub when: Option<Condition>,
}

impl Item {
    pub fn name(&self) -> Option<&'static str> {
        match &self.kind {
            ItemKind::Field(f) => Some(f.name),
            ItemKind::Nested(n) => Some(n.name),
            ItemKind::Skip(_) | ItemKind::Align(_) => None,
        }
    }
}

/// How a record determines its own size
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SizeRule {
    /// Exactly `n` bytes; unread bytes at the end are reserved
    Fixed(usize),
    /// A length field read earlier in the same record, plus `adjust`.
    /// Bytes between the last item and the declared size are skipped.
    FromField { field: &'static str, adjust: i64 },
    /// Sum of the items
    Open,
    /// Spans exactly the bytes the caller hands over
    Enclosing,
}

/// Static description of one record layout
#[derive(Debug)]
pub struct Descriptor {
    pub name: &'static str,
    pub endian: Endian,
    pub size: SizeRule,
    pub items: &'static [Item],
}

impl Descriptor {
    pub const fn new(name: &'static str, size: SizeRule, items: &'static [Item]) -> Self {
        Self {
            name,
            endian: Endian::Little,
            size,
            items,
        }
    }

    pub const fn big_endian(name: &'static str, size: SizeRule, items: &'static [Item]) -> Self {
        Self {
            name,
            endian: Endian::Big,
            size,
            items,
        }
    }

    /// Encoded size when every item has a fixed width, `None` otherwise
    pub fn fixed_size(&self) -> Option<usize> {
        self.fixed_size_at(0)
    }

    fn fixed_size_at(&self, depth: usize) -> Option<usize> {
        if let SizeRule::Fixed(n) = self.size {
            return Some(n);
        }
        if self.size != SizeRule::Open || depth > MAX_SIZE_DEPTH {
            return None;
        }
        let mut total = 0;
        for item in self.items {
            if item.when.is_some() {
                return None;
            }
            total += item_size_at(item, depth)?;
        }
        Some(total)
    }

    /// Names of the fields and children declared at this level
    pub fn item_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.items.iter().filter_map(|i| i.name())
    }
}

// Self-referencing descriptors have no fixed size
const MAX_SIZE_DEPTH: usize = 32;

/// Size of an item when it does not depend on decoded data
pub(crate) fn item_fixed_size(item: &Item) -> Option<usize> {
    item_size_at(item, 0)
}

fn item_size_at(item: &Item, depth: usize) -> Option<usize> {
    match &item.kind {
        ItemKind::Field(f) => match f.width {
            Width::Natural => f.primitive.size(),
            Width::Fixed(n) => Some(n),
            Width::FromField { .. } | Width::Remainder => None,
        },
        ItemKind::Nested(n) => {
            if n.repeat != Repeat::Once {
                return None;
            }
            match n.span {
                Span::Fixed(s) => Some(s),
                Span::Natural => n.descriptor.fixed_size_at(depth + 1),
                Span::FromField { .. } => None,
            }
        }
        ItemKind::Skip(n) => Some(*n),
        ItemKind::Align(_) => None,
    }
}

// =============================================================================
// Table builders
// =============================================================================

const fn plain(kind: ItemKind) -> Item {
    Item { kind, when: None }
}

/// Numeric field in the descriptor's byte order
pub const fn field(name: &'static str, primitive: Primitive) -> Item {
    plain(ItemKind::Field(FieldSpec {
        name,
        primitive,
        width: Width::Natural,
        endian: None,
        constraint: None,
    }))
}

/// Numeric field with an explicit byte order
pub const fn field_endian(name: &'static str, primitive: Primitive, endian: Endian) -> Item {
    plain(ItemKind::Field(FieldSpec {
        name,
        primitive,
        width: Width::Natural,
        endian: Some(endian),
        constraint: None,
    }))
}

/// Numeric field with a constraint
pub const fn checked(name: &'static str, primitive: Primitive, constraint: Constraint) -> Item {
    plain(ItemKind::Field(FieldSpec {
        name,
        primitive,
        width: Width::Natural,
        endian: None,
        constraint: Some(constraint),
    }))
}

pub const fn bytes(name: &'static str, width: Width) -> Item {
    plain(ItemKind::Field(FieldSpec {
        name,
        primitive: Primitive::Bytes,
        width,
        endian: None,
        constraint: None,
    }))
}

pub const fn ascii(name: &'static str, width: Width) -> Item {
    plain(ItemKind::Field(FieldSpec {
        name,
        primitive: Primitive::Ascii,
        width,
        endian: None,
        constraint: None,
    }))
}

/// Child record decoded once with its natural size
pub const fn nested(name: &'static str, descriptor: &'static Descriptor) -> Item {
    plain(ItemKind::Nested(NestedSpec {
        name,
        descriptor,
        repeat: Repeat::Once,
        span: Span::Natural,
    }))
}

/// Child record with an explicit repetition and span
pub const fn nested_with(
    name: &'static str,
    descriptor: &'static Descriptor,
    repeat: Repeat,
    span: Span,
) -> Item {
    plain(ItemKind::Nested(NestedSpec {
        name,
        descriptor,
        repeat,
        span,
    }))
}

/// Child record repeated `count` times, each with its natural size
pub const fn repeated(name: &'static str, descriptor: &'static Descriptor, count: &'static str) -> Item {
    nested_with(name, descriptor, Repeat::Count(count), Span::Natural)
}

pub const fn skip(n: usize) -> Item {
    plain(ItemKind::Skip(n))
}

pub const fn align(n: usize) -> Item {
    plain(ItemKind::Align(n))
}

/// Make an item conditional
pub const fn when(condition: Condition, item: Item) -> Item {
    Item {
        kind: item.kind,
        when: Some(condition),
    }
}
