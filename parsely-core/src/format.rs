//! Supported sonar file formats

use serde::{Deserialize, Serialize, Serializer};
use strum::{EnumIter, IntoEnumIterator};

/// Supported manufacturer formats
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, EnumIter)]
pub enum FormatId {
    /// Kongsberg KMALL (`.kmall`) and water column (`.kmwcd`) files
    #[serde(alias = "kmall", alias = "KMALL")]
    Kmall,
    /// Teledyne Reson 7k (`.s7k`) files
    #[serde(alias = "s7k", alias = "S7K")]
    S7k,
}

impl FormatId {
    /// Get the format name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatId::Kmall => "KMALL",
            FormatId::S7k => "S7K",
        }
    }

    /// Guess the format from a file extension (without the dot)
    pub fn from_extension(ext: &str) -> Option<FormatId> {
        match ext.to_ascii_lowercase().as_str() {
            "kmall" | "kmwcd" => Some(FormatId::Kmall),
            "s7k" => Some(FormatId::S7k),
            _ => None,
        }
    }

    /// All formats known to this build, whether or not a catalog is compiled in
    pub fn all() -> impl Iterator<Item = FormatId> {
        FormatId::iter()
    }
}

impl std::fmt::Display for FormatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for FormatId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl TryFrom<&str> for FormatId {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_ascii_lowercase().as_str() {
            "kmall" => Ok(FormatId::Kmall),
            "s7k" => Ok(FormatId::S7k),
            _ => Err(format!("Unknown format: {}", s)),
        }
    }
}
