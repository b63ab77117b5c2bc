//! Random and sequential access to a constant's fractional digits.
//!
//! A [`DigitStream`] has two access tiers:
//!
//! 1. **Prefix** - the first `prefix_size` digits, read once into memory on
//!    first real use and shared by every later read inside that window.
//! 2. **Mapped** - anything beyond the prefix is served through a memory
//!    map of just the requested range, so multi-gigabyte files never need
//!    to fit in memory.
//!
//! Offsets passed to [`DigitStream::read_range`] and
//! [`DigitStream::map_range`] are 0-based digit offsets. Search results use
//! 1-based [`Position`]s.

use crate::error::{Error, Result};
use crate::stream::catalog;
use crate::stream::types::*;
use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard};

/// Reads this short or shorter don't force the prefix to load
const TRIVIAL_READ: usize = 64;

struct OpenState {
    file: File,
    prefix: OnceLock<Arc<[u8]>>,
}

/// An open digit file
pub struct DigitStream {
    descriptor: StreamDescriptor,
    prefix_size: usize,
    state: RwLock<Option<OpenState>>,
    /// End offset of the last mapped read, for sequential-access hints
    last_read_end: AtomicU64,
}

impl DigitStream {
    /// Identify and open a digit file
    pub fn open(path: &Path, prefix_size: usize) -> Result<Self> {
        let descriptor = catalog::identify(path)?;
        Self::from_descriptor(descriptor, prefix_size)
    }

    /// Open a file that has already been identified
    pub fn from_descriptor(descriptor: StreamDescriptor, prefix_size: usize) -> Result<Self> {
        let file = File::open(&descriptor.path)?;
        Ok(Self {
            descriptor,
            prefix_size,
            state: RwLock::new(Some(OpenState {
                file,
                prefix: OnceLock::new(),
            })),
            last_read_end: AtomicU64::new(u64::MAX),
        })
    }

    pub fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    pub fn identity(&self) -> &StreamIdentity {
        &self.descriptor.identity
    }

    pub fn path(&self) -> &Path {
        &self.descriptor.path
    }

    pub fn total_digits(&self) -> u64 {
        self.descriptor.total_digits
    }

    /// Length of the cached prefix window (may be shorter than configured)
    pub fn prefix_len(&self) -> u64 {
        (self.prefix_size as u64).min(self.total_digits())
    }

    pub fn is_closed(&self) -> bool {
        self.read_state().is_none()
    }

    /// The cached prefix, loading it on first use
    pub fn prefix(&self) -> Result<Arc<[u8]>> {
        let guard = self.read_state();
        let state = guard.as_ref().ok_or_else(|| self.closed())?;
        self.prefix_in(state)
    }

    /// Read up to `len` digits starting at 0-based `offset`.
    ///
    /// Returns fewer bytes at the end of the stream and an empty vector
    /// past it.
    pub fn read_range(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let guard = self.read_state();
        let state = guard.as_ref().ok_or_else(|| self.closed())?;

        let total = self.total_digits();
        if offset >= total || len == 0 {
            return Ok(Vec::new());
        }
        let len = len.min((total - offset) as usize);
        let end = offset + len as u64;

        let prefix_loaded = state.prefix.get().is_some();
        if end <= self.prefix_len() && (prefix_loaded || len > TRIVIAL_READ) {
            let prefix = self.prefix_in(state)?;
            return Ok(prefix[offset as usize..end as usize].to_vec());
        }

        let map = self.map_in(state, offset, len)?;
        Ok(map.to_vec())
    }

    /// Digit at a 1-based position; position 0 is the radix point
    pub fn digit_at(&self, position: Position) -> Result<Option<u8>> {
        if position == 0 {
            if self.is_closed() {
                return Err(self.closed());
            }
            return Ok(Some(b'.'));
        }
        Ok(self.read_range(position - 1, 1)?.first().copied())
    }

    /// Map `len` digits starting at `offset` for exclusive use by one reader.
    ///
    /// The caller clamps the range to the stream and never asks for zero
    /// bytes.
    pub fn map_range(&self, offset: u64, len: usize) -> Result<Mmap> {
        let guard = self.read_state();
        let state = guard.as_ref().ok_or_else(|| self.closed())?;
        self.map_in(state, offset, len)
    }

    /// Forward iterator over every fractional digit.
    ///
    /// Each call starts again from the first digit. The iterator keeps its
    /// own mapping, so it stays valid until dropped.
    pub fn iterate(&self) -> Result<Digits> {
        let guard = self.read_state();
        let state = guard.as_ref().ok_or_else(|| self.closed())?;

        let total = self.total_digits() as usize;
        let map = if total == 0 {
            None
        } else {
            let map = self.map_in(state, 0, total)?;
            advise_sequential(&map);
            Some(map)
        };
        Ok(Digits { map, pos: 0 })
    }

    /// Release the file handle, prefix and mappings. Safe to call twice.
    pub fn close(&self) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn read_state(&self) -> RwLockReadGuard<'_, Option<OpenState>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn closed(&self) -> Error {
        Error::ClosedStream(self.descriptor.path.clone())
    }

    fn prefix_in(&self, state: &OpenState) -> Result<Arc<[u8]>> {
        if let Some(prefix) = state.prefix.get() {
            return Ok(prefix.clone());
        }

        let len = self.prefix_len() as usize;
        let bytes: Arc<[u8]> = if len == 0 {
            Arc::from(Vec::new())
        } else {
            Arc::from(&self.map_in(state, 0, len)?[..])
        };
        // A concurrent loader may have won; either copy is identical
        Ok(state.prefix.get_or_init(|| bytes).clone())
    }

    fn map_in(&self, state: &OpenState, offset: u64, len: usize) -> Result<Mmap> {
        let file_offset = self.descriptor.data_offset + offset;
        // SAFETY: digit files are treated as immutable while open.
        let map = unsafe {
            MmapOptions::new()
                .offset(file_offset)
                .len(len)
                .map(&state.file)
        }
        .map_err(|e| Error::search_io(&self.descriptor.path, e))?;

        let previous_end = self.last_read_end.swap(offset + len as u64, Ordering::Relaxed);
        if previous_end == offset {
            advise_sequential(&map);
        }
        Ok(map)
    }
}

impl Drop for DigitStream {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for DigitStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigitStream")
            .field("descriptor", &self.descriptor)
            .field("prefix_size", &self.prefix_size)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Hint the kernel that a mapping will be read front to back
pub(crate) fn advise_sequential(map: &Mmap) {
    #[cfg(unix)]
    {
        let _ = map.advise(memmap2::Advice::Sequential);
    }
    #[cfg(not(unix))]
    {
        let _ = map;
    }
}

/// Iterator over a stream's digits, backed by a memory map
pub struct Digits {
    map: Option<Mmap>,
    pos: usize,
}

impl Digits {
    /// Copy up to `n` further digits into `buf`, returning how many were copied
    pub fn fill(&mut self, buf: &mut Vec<u8>, n: usize) -> usize {
        let Some(map) = &self.map else {
            return 0;
        };
        let end = (self.pos + n).min(map.len());
        buf.extend_from_slice(&map[self.pos..end]);
        let copied = end - self.pos;
        self.pos = end;
        copied
    }
}

impl Iterator for Digits {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        let byte = *self.map.as_ref()?.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.map.as_ref().map_or(0, |m| m.len() - self.pos);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Digits {}
