//! Datagram type tags

use serde::{Serialize, Serializer};

/// Format-specific code identifying the kind of a datagram
///
/// KMALL uses four ASCII characters (`#MRZ`), S7K a numeric record type id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeTag {
    Ascii([u8; 4]),
    Numeric(u32),
}

impl TypeTag {
    pub const fn ascii(code: [u8; 4]) -> Self {
        TypeTag::Ascii(code)
    }

    pub const fn numeric(id: u32) -> Self {
        TypeTag::Numeric(id)
    }

    /// Numeric value of the tag, ASCII codes read as little-endian u32
    pub fn as_u32(&self) -> u32 {
        match self {
            TypeTag::Ascii(code) => u32::from_le_bytes(*code),
            TypeTag::Numeric(id) => *id,
        }
    }
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeTag::Ascii(code) => {
                for &b in code {
                    if b.is_ascii_graphic() {
                        write!(f, "{}", b as char)?;
                    } else {
                        write!(f, "\\x{:02x}", b)?;
                    }
                }
                Ok(())
            }
            TypeTag::Numeric(id) => write!(f, "{}", id),
        }
    }
}

impl Serialize for TypeTag {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            TypeTag::Ascii(_) => serializer.serialize_str(&self.to_string()),
            TypeTag::Numeric(id) => serializer.serialize_u32(*id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(TypeTag::ascii(*b"#MRZ").to_string(), "#MRZ");
        assert_eq!(TypeTag::numeric(7000).to_string(), "7000");
        assert_eq!(TypeTag::ascii([b'#', 0, b'A', b'B']).to_string(), "#\\x00AB");
    }

    #[test]
    fn test_as_u32() {
        assert_eq!(TypeTag::numeric(0xFFFF).as_u32(), 0xFFFF);
        assert_eq!(TypeTag::ascii(*b"#SPO").as_u32(), u32::from_le_bytes(*b"#SPO"));
    }
}
