//! File identification and discovery.
//!
//! The catalog turns a path into a [`StreamDescriptor`]: storage format,
//! base, integer part, where the fractional digits start, and which
//! constant the file holds. Results are cached for the catalog's lifetime
//! since digit files never change once written.

use crate::error::{Error, Result};
use crate::stream::digits::DigitStream;
use crate::stream::types::*;
use ahash::AHashMap;
use ignore::WalkBuilder;
use log::{debug, warn};
use memchr::memmem;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Bytes read from the start of a file to identify it
const HEADER_PROBE: u64 = 1000;
/// Bytes read from the end of a text file to find trailing whitespace
const TAIL_PROBE: u64 = 64;

const YCD_MAGIC: &[u8] = b"#Compressed Digit File";
const YCD_END_HEADER: &[u8] = b"EndHeader\r\n\r\n";

/// Leading fractional decimal digits of well-known constants
const KNOWN_CONSTANTS: &[(&str, &str)] = &[
    ("41421", "sqrt2"),
    ("73205", "sqrt3"),
    ("23606", "sqrt5"),
    ("16227", "sqrt10"),
    ("61803", "phi"),
    ("71828", "e"),
    ("14159", "pi"),
    ("69314", "ln2"),
    ("09861", "ln3"),
    ("38629", "ln4"),
    ("60943", "ln5"),
    ("30258", "ln10"),
    ("24411", "lemniscate"),
    ("20205", "zeta3"),
    ("62560", "gamma1/4"),
    ("91596", "catalan"),
    ("57721", "gamma"),
];

/// Identifies digit files and caches the results
pub struct Catalog {
    prefix_size: usize,
    names: AHashMap<String, String>,
    cache: Mutex<AHashMap<PathBuf, StreamDescriptor>>,
}

impl Catalog {
    /// Create a catalog whose opened streams cache `prefix_size` digits
    pub fn new(prefix_size: usize) -> Self {
        let names = KNOWN_CONSTANTS
            .iter()
            .map(|(digits, name)| (digits.to_string(), name.to_string()))
            .collect();
        Self::with_names(prefix_size, names)
    }

    /// Create a catalog with a custom digits-to-name table
    pub fn with_names(prefix_size: usize, names: AHashMap<String, String>) -> Self {
        Self {
            prefix_size,
            names,
            cache: Mutex::new(AHashMap::new()),
        }
    }

    /// Identify a file, consulting the cache first
    pub fn identify(&self, path: &Path) -> Result<StreamDescriptor> {
        let key = path.canonicalize()?;

        if let Some(desc) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(desc.clone());
        }

        let desc = identify_with(&key, &self.names)?;
        debug!("identified {} as {}", key.display(), desc);

        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, desc.clone());
        Ok(desc)
    }

    /// Identify and open a file as a digit stream
    pub fn open(&self, path: &Path) -> Result<Arc<DigitStream>> {
        let desc = self.identify(path)?;
        Ok(Arc::new(DigitStream::from_descriptor(desc, self.prefix_size)?))
    }

    /// Find every usable digit file under `dir`, sorted by identity then size
    pub fn discover(&self, dir: &Path, recursive: bool) -> Result<Vec<StreamDescriptor>> {
        let walker = WalkBuilder::new(dir)
            .max_depth(if recursive { None } else { Some(1) })
            .hidden(true)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .build();

        let mut found = Vec::new();
        for entry in walker.filter_map(|entry| entry.ok()) {
            let path = entry.path();
            if path.is_file() && self.check_valid(path) {
                // Already cached by check_valid
                found.push(self.identify(path)?);
            }
        }

        found.sort_by(|a, b| {
            a.identity
                .cmp(&b.identity)
                .then(a.total_digits.cmp(&b.total_digits))
        });
        Ok(found)
    }

    /// Whether `path` is a digit file this catalog can open. Successful
    /// identifications are cached.
    pub fn check_valid(&self, path: &Path) -> bool {
        if !has_digit_extension(path) {
            return false;
        }
        match self.identify(path) {
            Ok(_) => true,
            Err(e) if e.is_identification() => {
                debug!("skipping {}: {}", path.display(), e);
                false
            }
            Err(e) => {
                warn!("skipping unreadable {}: {}", path.display(), e);
                false
            }
        }
    }

    pub fn prefix_size(&self) -> usize {
        self.prefix_size
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new(crate::utils::AppConfig::default().prefix_size)
    }
}

/// Identify a file using the built-in constant table, without caching
pub fn identify(path: &Path) -> Result<StreamDescriptor> {
    let names = KNOWN_CONSTANTS
        .iter()
        .map(|(digits, name)| (digits.to_string(), name.to_string()))
        .collect();
    identify_with(path, &names)
}

fn has_digit_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(StorageFormat::from_extension)
        .is_some()
}

fn identify_with(path: &Path, names: &AHashMap<String, String>) -> Result<StreamDescriptor> {
    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();

    let mut head = Vec::with_capacity(HEADER_PROBE as usize);
    (&mut file).take(HEADER_PROBE).read_to_end(&mut head)?;

    let header = if memmem::find(&head, YCD_MAGIC).is_some() {
        parse_ycd_header(path, &head)?
    } else {
        parse_text_header(path, &head)?
    };

    let name = resolve_name(names, path, header.base, &header.first_digits);
    let mut end = file_len;
    if header.format == StorageFormat::PlainText {
        end -= trailing_whitespace(&mut file, file_len)?;
    }
    let total_digits = end.saturating_sub(header.data_offset);

    Ok(StreamDescriptor {
        path: path.to_path_buf(),
        identity: StreamIdentity::new(name, header.base, header.format),
        integer_part: header.integer_part,
        data_offset: header.data_offset,
        total_digits,
    })
}

/// Trailing newlines and spaces at the end of a text file
fn trailing_whitespace(file: &mut File, file_len: u64) -> Result<u64> {
    let n = file_len.min(TAIL_PROBE);
    let mut tail = Vec::with_capacity(n as usize);
    file.seek(SeekFrom::Start(file_len - n))?;
    file.by_ref().take(n).read_to_end(&mut tail)?;
    let digits = tail.iter().rposition(|b| !b.is_ascii_whitespace());
    Ok(match digits {
        Some(last) => (tail.len() - last - 1) as u64,
        None => tail.len() as u64,
    })
}

struct Header {
    format: StorageFormat,
    base: u32,
    integer_part: String,
    data_offset: u64,
    /// Leading fractional digits, used to name the constant
    first_digits: String,
}

fn parse_text_header(path: &Path, head: &[u8]) -> Result<Header> {
    let radix = memchr::memchr(b'.', head)
        .ok_or_else(|| Error::format(path, "no radix point found"))?;

    let integer_part = String::from_utf8_lossy(&head[..radix]).trim().to_string();
    let sample: Vec<u8> = head[radix + 1..]
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if sample.is_empty() {
        return Err(Error::format(path, "no digits after radix point"));
    }

    let base = match base_from_file_name(path) {
        Some(base) => base,
        None => base_from_alphabet(path, &sample)?,
    };

    Ok(Header {
        format: StorageFormat::PlainText,
        base,
        integer_part,
        data_offset: radix as u64 + 1,
        first_digits: String::from_utf8_lossy(&sample).into_owned(),
    })
}

fn parse_ycd_header(path: &Path, head: &[u8]) -> Result<Header> {
    let end = memmem::find(head, YCD_END_HEADER)
        .ok_or_else(|| Error::format(path, "no EndHeader found"))?;
    let text = String::from_utf8_lossy(&head[..end]);

    let base_field = header_field(&text, "Base:")
        .ok_or_else(|| Error::format(path, "missing Base field"))?;
    let base: u32 = base_field
        .parse()
        .map_err(|_| Error::format(path, format!("invalid Base field {:?}", base_field)))?;
    if base != 10 && base != 16 {
        return Err(Error::UnsupportedBase {
            path: path.to_path_buf(),
            base,
        });
    }

    let first = header_field(&text, "FirstDigits:")
        .ok_or_else(|| Error::format(path, "missing FirstDigits field"))?;
    let (integer_part, first_digits) = first
        .split_once('.')
        .ok_or_else(|| Error::format(path, "FirstDigits has no radix point"))?;

    Ok(Header {
        format: StorageFormat::CompressedBlock,
        base,
        integer_part: integer_part.to_string(),
        // Header terminator is followed by a single NUL before the payload
        data_offset: (end + YCD_END_HEADER.len() + 1) as u64,
        first_digits: first_digits.to_string(),
    })
}

/// Value of a `Key:\tvalue` line in a y-cruncher header
fn header_field<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    text.lines()
        .find_map(|line| line.strip_prefix(key))
        .map(str::trim)
}

/// y-cruncher names files like `Pi - Dec - Chudnovsky.txt`
fn base_from_file_name(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?.to_ascii_lowercase();
    stem.split(|c: char| !c.is_ascii_alphanumeric())
        .find_map(|token| match token {
            "dec" => Some(10),
            "hex" => Some(16),
            _ => None,
        })
}

fn base_from_alphabet(path: &Path, sample: &[u8]) -> Result<u32> {
    if sample.iter().all(u8::is_ascii_digit) {
        return Ok(10);
    }
    if sample.iter().all(u8::is_ascii_hexdigit) {
        return Ok(16);
    }

    let mut seen = [false; 256];
    for &b in sample {
        seen[b as usize] = true;
    }
    Err(Error::UnsupportedBase {
        path: path.to_path_buf(),
        base: seen.iter().filter(|&&s| s).count() as u32,
    })
}

fn resolve_name(
    names: &AHashMap<String, String>,
    path: &Path,
    base: u32,
    first_digits: &str,
) -> String {
    if let Some(name) = decimal_key(base, first_digits).and_then(|key| names.get(&key)) {
        return name.clone();
    }

    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|stem| stem.split_once(" - "))
        .map(|(name, _)| name.trim().to_lowercase())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| UNKNOWN_NAME.to_string())
}

/// First five decimal fractional digits, the key of the constants table.
///
/// Hex fractions are converted through their leading 16 digits, which is
/// well past the precision five decimal digits need.
fn decimal_key(base: u32, first_digits: &str) -> Option<String> {
    match base {
        10 => first_digits.get(..5).map(str::to_string),
        16 => {
            let hex = first_digits.get(..16.min(first_digits.len()))?;
            if hex.len() < 5 {
                return None;
            }
            let value = u64::from_str_radix(hex, 16).ok()?;
            let scaled = (value as u128 * 100_000) >> (4 * hex.len());
            Some(format!("{:05}", scaled))
        }
        _ => None,
    }
}
