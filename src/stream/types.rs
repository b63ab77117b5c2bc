use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// 1-based position of a fractional digit (1 = first digit after the radix point)
pub type Position = u64;

/// Name given to constants the catalog cannot identify
pub const UNKNOWN_NAME: &str = "unknown";

/// How the digits are laid out on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StorageFormat {
    /// `3.14159...` as ASCII
    PlainText,
    /// y-cruncher `.ycd` file: text header, then packed digit words
    CompressedBlock,
}

impl StorageFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "txt" => Some(StorageFormat::PlainText),
            "ycd" => Some(StorageFormat::CompressedBlock),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageFormat::PlainText => "txt",
            StorageFormat::CompressedBlock => "ycd",
        }
    }

    /// Key type used by this format's index namespace
    pub fn key_encoding(&self) -> KeyEncoding {
        match self {
            StorageFormat::PlainText => KeyEncoding::Text,
            StorageFormat::CompressedBlock => KeyEncoding::Blob,
        }
    }
}

/// Column type of the substring key in a pattern index namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyEncoding {
    Text,
    Blob,
}

impl KeyEncoding {
    pub fn sql_type(&self) -> &'static str {
        match self {
            KeyEncoding::Text => "TEXT",
            KeyEncoding::Blob => "BLOB",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TEXT" => Some(KeyEncoding::Text),
            "BLOB" => Some(KeyEncoding::Blob),
            _ => None,
        }
    }
}

/// Logical identity of a constant's expansion.
///
/// Two files holding the same constant in the same base and format are the
/// same stream, whatever their paths or lengths. Field order gives the
/// catalog ordering: name, then format, then base.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamIdentity {
    pub name: String,
    pub format: StorageFormat,
    pub base: u32,
}

impl StreamIdentity {
    pub fn new(name: impl Into<String>, base: u32, format: StorageFormat) -> Self {
        Self {
            name: name.into(),
            format,
            base,
        }
    }

    pub fn is_known(&self) -> bool {
        self.name != UNKNOWN_NAME
    }

    /// Namespace (table) name in the pattern index, e.g. `pi_10_txt`
    pub fn namespace(&self) -> String {
        format!("{}_{}_{}", self.name, self.base, self.format.as_str())
    }
}

impl fmt::Display for StreamIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.namespace())
    }
}

/// Everything the catalog learns about a digit file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub path: PathBuf,
    pub identity: StreamIdentity,
    /// Digits before the radix point, as written in the file
    pub integer_part: String,
    /// Byte offset of the first fractional digit
    pub data_offset: u64,
    /// Number of fractional digit bytes in the file
    pub total_digits: u64,
}

impl StreamDescriptor {
    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn base(&self) -> u32 {
        self.identity.base
    }

    pub fn format(&self) -> StorageFormat {
        self.identity.format
    }
}

impl fmt::Display for StreamDescriptor {
    /// e.g. `pi.txt(b10|1.00M)`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}(b{}|{})",
            self.identity.name,
            self.identity.format.as_str(),
            self.identity.base,
            crate::utils::format_count(self.total_digits as f64),
        )
    }
}
