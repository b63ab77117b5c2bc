//! Three-tier first-occurrence search.
//!
//! `locate` tries, in order and stopping at the first hit:
//!
//! 1. the persistent [`PatternIndex`],
//! 2. a substring search over the stream's in-memory prefix,
//! 3. a parallel sector scan over the rest of the file.
//!
//! Prefix and full-scan hits are written back to the index so the next
//! identical query is answered from it. Misses are never recorded.

use crate::error::{Error, Result};
use crate::index::PatternIndex;
use crate::search::sector::{full_scan, ScanPlan};
use crate::stream::{Catalog, DigitStream, Position, StreamIdentity};
use crate::utils::{page_size, text_to_digits, AppConfig};
use ahash::AHashMap;
use log::{debug, warn};
use memchr::memmem;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Which tier answered a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Cache,
    Prefix,
    #[serde(rename = "full")]
    FullScan,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Cache => "cache",
            Source::Prefix => "prefix",
            Source::FullScan => "full",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SearchOutcome {
    /// `position` is 1-based: position 1 is the first digit after the radix point
    Found { position: Position, source: Source },
    NotFound,
}

impl SearchOutcome {
    pub fn position(&self) -> Option<Position> {
        match self {
            SearchOutcome::Found { position, .. } => Some(*position),
            SearchOutcome::NotFound => None,
        }
    }

    pub fn source(&self) -> Option<Source> {
        match self {
            SearchOutcome::Found { source, .. } => Some(*source),
            SearchOutcome::NotFound => None,
        }
    }

    /// Position as a plain integer, -1 when not found
    pub fn offset(&self) -> i64 {
        self.position().map_or(-1, |p| p as i64)
    }

    pub fn is_found(&self) -> bool {
        matches!(self, SearchOutcome::Found { .. })
    }
}

/// Digits surrounding a hit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Excerpt {
    /// Position of the first byte in `before` (or of the hit if `before` is empty)
    pub start: Position,
    pub before: Vec<u8>,
    pub hit: Vec<u8>,
    pub after: Vec<u8>,
}

/// Scan settings, taken from [`AppConfig`]
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub workers: usize,
    pub scan_chunk_size: usize,
    pub page_size: u64,
    /// Consult and update the pattern index
    pub use_index: bool,
}

impl EngineOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            workers: config.effective_scan_workers(),
            scan_chunk_size: config.scan_chunk_size,
            page_size: page_size(),
            use_index: true,
        }
    }
}

/// Answers first-occurrence queries over digit streams
pub struct SearchEngine {
    catalog: Arc<Catalog>,
    index: Option<Arc<PatternIndex>>,
    pool: ThreadPool,
    options: EngineOptions,
    streams: Mutex<AHashMap<PathBuf, Arc<DigitStream>>>,
}

impl SearchEngine {
    /// Create an engine. Without an index, every query goes to the prefix
    /// and full-scan tiers and nothing is written back.
    pub fn new(
        catalog: Arc<Catalog>,
        index: Option<Arc<PatternIndex>>,
        options: EngineOptions,
    ) -> Result<Self> {
        let workers = options.workers.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("irrfind-scan-{}", i))
            .build()
            .map_err(io::Error::other)?;

        Ok(Self {
            catalog,
            index: index.filter(|_| options.use_index),
            pool,
            options: EngineOptions { workers, ..options },
            streams: Mutex::new(AHashMap::new()),
        })
    }

    /// Build an engine from configuration, opening the configured index
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let catalog = Arc::new(Catalog::new(config.prefix_size));
        let index = Arc::new(PatternIndex::open(&config.resolved_index_path()?)?);
        Ok(Self::new(catalog, Some(index), EngineOptions::from_config(config))?)
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn index(&self) -> Option<&Arc<PatternIndex>> {
        self.index.as_ref()
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Open (or reuse) the stream for `path`
    pub fn stream(&self, path: &Path) -> Result<Arc<DigitStream>> {
        let key = path.canonicalize()?;
        let mut streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(stream) = streams.get(&key).filter(|s| !s.is_closed()) {
            return Ok(stream.clone());
        }
        let stream = self.catalog.open(&key)?;
        streams.insert(key, stream.clone());
        Ok(stream)
    }

    /// Find the first occurrence of `pattern` in `stream`
    pub fn locate(&self, stream: &DigitStream, pattern: &[u8]) -> Result<SearchOutcome> {
        if pattern.is_empty() {
            return Err(Error::InvalidPattern("pattern is empty".into()));
        }
        if stream.is_closed() {
            return Err(Error::ClosedStream(stream.path().to_path_buf()));
        }

        let identity = match self.cache_identity(stream) {
            Ok(identity) => identity,
            Err(e) => {
                debug!("{}; searching without the index", e);
                None
            }
        };

        if let (Some(index), Some(identity)) = (&self.index, identity) {
            match index.lookup(identity, pattern) {
                Ok(Some(position)) => {
                    debug!("cache hit for {} in {}", show(pattern), identity);
                    return Ok(SearchOutcome::Found {
                        position,
                        source: Source::Cache,
                    });
                }
                Ok(None) => {}
                Err(e) => warn!("index lookup failed for {}: {}", identity, e),
            }
        }

        let outcome = self.scan(stream, pattern)?;

        if let (SearchOutcome::Found { position, .. }, Some(index), Some(identity)) =
            (outcome, &self.index, identity)
        {
            if let Err(e) = index.insert_if_absent(identity, pattern, position) {
                warn!("could not cache {} for {}: {}", show(pattern), identity, e);
            }
        }

        Ok(outcome)
    }

    /// [`SearchEngine::locate`] for a digit string
    pub fn locate_pattern(&self, stream: &DigitStream, pattern: &str) -> Result<SearchOutcome> {
        self.locate(stream, pattern.as_bytes())
    }

    /// Open the file at `path` and locate `pattern` in it
    pub fn locate_path(&self, path: &Path, pattern: &[u8]) -> Result<SearchOutcome> {
        let stream = self.stream(path)?;
        self.locate(&stream, pattern)
    }

    /// Encode words as digits (`a` = `00` ... `z` = `25`) and locate them
    pub fn locate_text(&self, stream: &DigitStream, words: &str) -> Result<SearchOutcome> {
        let digits = text_to_digits(words);
        if digits.is_empty() {
            return Err(Error::InvalidPattern(format!(
                "{:?} has no letters or digits",
                words
            )));
        }
        self.locate(stream, digits.as_bytes())
    }

    /// Up to `radius` digits on each side of a hit at `position`
    pub fn context(
        &self,
        stream: &DigitStream,
        position: Position,
        pattern_len: usize,
        radius: usize,
    ) -> Result<Excerpt> {
        let offset = position.saturating_sub(1);
        let before_start = offset.saturating_sub(radius as u64);
        let before = stream.read_range(before_start, (offset - before_start) as usize)?;
        let hit = stream.read_range(offset, pattern_len)?;
        let after = stream.read_range(offset + pattern_len as u64, radius)?;
        Ok(Excerpt {
            start: before_start + 1,
            before,
            hit,
            after,
        })
    }

    /// Close every stream this engine opened
    pub fn close(&self) {
        let mut streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, stream) in streams.drain() {
            stream.close();
        }
    }

    /// The identity used as index namespace, if results may be cached
    fn cache_identity<'s>(&self, stream: &'s DigitStream) -> Result<Option<&'s StreamIdentity>> {
        if self.index.is_none() {
            return Ok(None);
        }
        let identity = stream.identity();
        if !identity.is_known() {
            return Err(Error::UnknownStream(stream.path().to_path_buf()));
        }
        Ok(Some(identity))
    }

    /// Prefix tier, then full scan
    fn scan(&self, stream: &DigitStream, pattern: &[u8]) -> Result<SearchOutcome> {
        let prefix = stream.prefix()?;
        if let Some(i) = memmem::find(&prefix, pattern) {
            debug!("prefix hit for {} at {}", show(pattern), i + 1);
            return Ok(SearchOutcome::Found {
                position: i as u64 + 1,
                source: Source::Prefix,
            });
        }

        // A match starting this far in could run past the prefix
        let start = (prefix.len() as u64).saturating_sub(pattern.len() as u64 - 1);
        let plan = ScanPlan {
            workers: self.options.workers,
            chunk_size: self.options.scan_chunk_size,
            page_size: self.options.page_size,
        };
        match full_scan(&self.pool, stream, pattern, start, plan)? {
            Some(offset) => Ok(SearchOutcome::Found {
                position: offset + 1,
                source: Source::FullScan,
            }),
            None => Ok(SearchOutcome::NotFound),
        }
    }
}

impl Drop for SearchEngine {
    fn drop(&mut self) {
        self.close();
    }
}

fn show(pattern: &[u8]) -> String {
    String::from_utf8_lossy(pattern).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    const DIGITS: &str = "14159265358979323846";

    struct Fixture {
        _dir: TempDir,
        engine: SearchEngine,
        stream: Arc<DigitStream>,
        index: Arc<PatternIndex>,
    }

    fn fixture(name: &str, content: &str, prefix_size: usize, workers: usize) -> Fixture {
        let dir = tempdir().unwrap();
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();

        let index = Arc::new(PatternIndex::open(&dir.path().join("idx.sqlite")).unwrap());
        let options = EngineOptions {
            workers,
            scan_chunk_size: 3,
            page_size: 1,
            use_index: true,
        };
        let engine =
            SearchEngine::new(Arc::new(Catalog::new(prefix_size)), Some(index.clone()), options)
                .unwrap();
        let stream = engine.stream(&path).unwrap();
        Fixture {
            _dir: dir,
            engine,
            stream,
            index,
        }
    }

    fn pi(prefix_size: usize) -> Fixture {
        fixture("pi.txt", &format!("3.{}", DIGITS), prefix_size, 4)
    }

    #[test]
    fn test_locate_in_prefix() {
        let f = pi(1000);
        let outcome = f.engine.locate(&f.stream, b"265").unwrap();
        assert_eq!(
            outcome,
            SearchOutcome::Found {
                position: 6,
                source: Source::Prefix
            }
        );
        assert_eq!(outcome.offset(), 6);
    }

    #[test]
    fn test_not_found_is_minus_one_and_not_cached() {
        let f = pi(4);
        let outcome = f.engine.locate(&f.stream, b"99").unwrap();
        assert_eq!(outcome, SearchOutcome::NotFound);
        assert_eq!(outcome.offset(), -1);
        assert_eq!(f.index.count(f.stream.identity()).unwrap(), 0);
    }

    #[test]
    fn test_repeat_query_hits_cache() {
        let f = pi(4);
        let first = f.engine.locate(&f.stream, b"3238").unwrap();
        assert_eq!(
            first,
            SearchOutcome::Found {
                position: 15,
                source: Source::FullScan
            }
        );

        let second = f.engine.locate(&f.stream, b"3238").unwrap();
        assert_eq!(
            second,
            SearchOutcome::Found {
                position: 15,
                source: Source::Cache
            }
        );
    }

    #[test]
    fn test_broken_index_falls_back_to_scan() {
        let f = pi(4);
        let identity = f.stream.identity().clone();
        // A namespace row without its table: both lookup and write-back fail
        rusqlite::Connection::open(f.index.path())
            .unwrap()
            .execute(
                "INSERT INTO namespaces (namespace, name, base, format, key_encoding)
                 VALUES (?1, ?2, ?3, ?4, 'TEXT')",
                rusqlite::params![
                    identity.namespace(),
                    identity.name,
                    identity.base,
                    identity.format.as_str()
                ],
            )
            .unwrap();

        for _ in 0..2 {
            let outcome = f.engine.locate(&f.stream, b"3238").unwrap();
            assert_eq!(
                outcome,
                SearchOutcome::Found {
                    position: 15,
                    source: Source::FullScan
                }
            );
        }
        assert!(f.index.lookup(&identity, b"3238").is_err());
    }

    #[test]
    fn test_match_straddling_prefix_end() {
        // Prefix "14159"; "5926" starts inside it and ends after it
        let f = pi(5);
        let outcome = f.engine.locate(&f.stream, b"5926").unwrap();
        assert_eq!(outcome.position(), Some(4));
        assert_eq!(outcome.source(), Some(Source::FullScan));
    }

    #[test]
    fn test_prefix_and_full_scan_agree() {
        let digits = DIGITS.as_bytes();
        for len in 1..=3 {
            for p in 0..=digits.len() - len {
                let pattern = &digits[p..p + len];
                let in_prefix = pi(1000);
                let on_disk = pi(0);

                let a = in_prefix.engine.locate(&in_prefix.stream, pattern).unwrap();
                let b = on_disk.engine.locate(&on_disk.stream, pattern).unwrap();
                assert_eq!(a.source(), Some(Source::Prefix));
                assert_eq!(b.source(), Some(Source::FullScan));
                assert_eq!(a.position(), b.position(), "{:?}", pattern);
            }
        }
    }

    #[test]
    fn test_unknown_stream_is_not_written_back() {
        let f = fixture("mystery.txt", "0.00000123450000067890", 4, 2);
        assert!(!f.stream.identity().is_known());

        let outcome = f.engine.locate(&f.stream, b"6789").unwrap();
        assert_eq!(outcome.position(), Some(16));
        assert_eq!(outcome.source(), Some(Source::FullScan));
        // Still a full scan the second time
        let again = f.engine.locate(&f.stream, b"6789").unwrap();
        assert_eq!(again.source(), Some(Source::FullScan));
        assert!(f.index.namespaces().unwrap().is_empty());
    }

    #[test]
    fn test_without_index() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pi.txt");
        fs::write(&path, format!("3.{}", DIGITS)).unwrap();

        let options = EngineOptions {
            workers: 2,
            scan_chunk_size: 8,
            page_size: 1,
            use_index: true,
        };
        let engine = SearchEngine::new(Arc::new(Catalog::new(4)), None, options).unwrap();
        let first = engine.locate_path(&path, b"846").unwrap();
        let second = engine.locate_path(&path, b"846").unwrap();
        assert_eq!(first, second);
        assert_eq!(second.source(), Some(Source::FullScan));
    }

    #[test]
    fn test_empty_pattern_rejected() {
        let f = pi(4);
        assert!(matches!(
            f.engine.locate(&f.stream, b""),
            Err(Error::InvalidPattern(_))
        ));
        assert!(matches!(
            f.engine.locate_text(&f.stream, "!?"),
            Err(Error::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_locate_text() {
        // "ea" encodes to "0400"
        let f = fixture("pi.txt", "3.1234040012", 100, 1);
        let outcome = f.engine.locate_text(&f.stream, "ea").unwrap();
        assert_eq!(outcome.position(), Some(5));
    }

    #[test]
    fn test_context_around_hit() {
        let f = pi(4);
        let excerpt = f.engine.context(&f.stream, 6, 3, 2).unwrap();
        assert_eq!(excerpt.start, 4);
        assert_eq!(excerpt.before, b"59");
        assert_eq!(excerpt.hit, b"265");
        assert_eq!(excerpt.after, b"35");

        let edge = f.engine.context(&f.stream, 1, 2, 5).unwrap();
        assert_eq!(edge.start, 1);
        assert!(edge.before.is_empty());
        assert_eq!(edge.after, b"15926");
    }

    #[test]
    fn test_closed_stream_is_fatal() {
        let f = pi(4);
        f.engine.locate(&f.stream, b"3238").unwrap();
        f.stream.close();
        assert!(matches!(
            f.engine.locate(&f.stream, b"0"),
            Err(Error::ClosedStream(_))
        ));
        // Cached patterns are no exception
        assert!(matches!(
            f.engine.locate(&f.stream, b"3238"),
            Err(Error::ClosedStream(_))
        ));
        // The engine reopens closed streams for new path lookups
        let reopened = f.engine.stream(f.stream.path()).unwrap();
        assert!(!reopened.is_closed());
    }
}
