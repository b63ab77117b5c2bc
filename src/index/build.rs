//! Offline index builder.
//!
//! Walks the leading window of every discovered stream and records the
//! first offset of each substring up to `max_len` digits long. Streams
//! are claimed whole by a small pool of worker threads; each worker
//! streams its file in chunks and commits one bulk insert per chunk.

use crate::error::Result;
use crate::index::store::PatternIndex;
use crate::stream::{DigitStream, Digits, Position, StreamDescriptor, StreamIdentity};
use crate::utils::progress::{ProgressBar, ProgressStyle};
use crate::utils::{format_count, format_duration, AppConfig};
use log::{debug, info, warn};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Builder settings, taken from [`AppConfig`]
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Leading digits of each stream to index
    pub window: u64,
    /// Longest substring recorded
    pub max_len: usize,
    /// Start positions per bulk insert
    pub chunk_size: usize,
    /// Streams processed concurrently
    pub workers: usize,
    pub progress_interval: Duration,
    pub show_progress: bool,
}

impl BuildOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            window: config.build_window,
            max_len: config.build_max_length.max(1),
            chunk_size: config.build_chunk_size.max(1),
            workers: config.build_workers.max(1),
            progress_interval: Duration::from_millis(config.progress_interval_ms.max(1)),
            show_progress: false,
        }
    }
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// What a build run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub streams_processed: usize,
    pub streams_skipped: usize,
    pub patterns_emitted: u64,
    pub rows_inserted: u64,
    pub elapsed: Duration,
}

/// Counters shared between workers and the progress reporter
#[derive(Default)]
struct BuildProgress {
    streams_done: AtomicU64,
    patterns: AtomicU64,
}

/// A run of consecutive start positions plus the lookahead digits needed
/// to emit every substring that starts inside it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternChunk {
    digits: Vec<u8>,
    first_position: Position,
    starts: usize,
    max_len: usize,
}

impl PatternChunk {
    pub fn first_position(&self) -> Position {
        self.first_position
    }

    pub fn starts(&self) -> usize {
        self.starts
    }

    /// Every `(substring, position)` pair in this chunk, shortest first at
    /// each start position
    pub fn patterns(&self) -> impl Iterator<Item = (&[u8], Position)> + '_ {
        (0..self.starts).flat_map(move |p| {
            let limit = self.max_len.min(self.digits.len() - p);
            (1..=limit).map(move |len| (&self.digits[p..p + len], self.first_position + p as u64))
        })
    }

    pub fn pattern_count(&self) -> u64 {
        self.patterns().count() as u64
    }
}

/// Chunked walk over a stream's digit window
pub struct PatternChunks {
    digits: Digits,
    buf: Vec<u8>,
    next_start: u64,
    total_starts: u64,
    chunk_size: usize,
    max_len: usize,
}

impl PatternChunks {
    /// Start positions run over `[0, window - max_len)`, where `window` is
    /// clamped to the stream length
    pub fn new(
        stream: &DigitStream,
        window: u64,
        max_len: usize,
        chunk_size: usize,
    ) -> Result<Self> {
        let window = window.min(stream.total_digits());
        Ok(Self {
            digits: stream.iterate()?,
            buf: Vec::new(),
            next_start: 0,
            total_starts: window.saturating_sub(max_len as u64),
            chunk_size: chunk_size.max(1),
            max_len: max_len.max(1),
        })
    }

    pub fn total_starts(&self) -> u64 {
        self.total_starts
    }
}

impl Iterator for PatternChunks {
    type Item = PatternChunk;

    fn next(&mut self) -> Option<PatternChunk> {
        if self.next_start >= self.total_starts {
            return None;
        }

        let starts = (self.total_starts - self.next_start).min(self.chunk_size as u64) as usize;
        let needed = starts + self.max_len - 1;
        if self.buf.len() < needed {
            let missing = needed - self.buf.len();
            self.digits.fill(&mut self.buf, missing);
        }

        let starts = starts.min(self.buf.len());
        if starts == 0 {
            return None;
        }

        let chunk = PatternChunk {
            digits: self.buf.clone(),
            first_position: self.next_start + 1,
            starts,
            max_len: self.max_len,
        };

        // Keep the lookahead as the head of the next chunk
        self.buf.drain(..starts);
        self.next_start += starts as u64;
        Some(chunk)
    }
}

/// Every `(substring, position)` pair for the first `window` digits of a
/// stream
pub fn enumerate(
    stream: &DigitStream,
    window: u64,
    max_len: usize,
) -> Result<impl Iterator<Item = (Vec<u8>, Position)>> {
    let chunks = PatternChunks::new(stream, window, max_len, BuildOptions::default().chunk_size)?;
    Ok(chunks.flat_map(|chunk| {
        chunk
            .patterns()
            .map(|(pattern, position)| (pattern.to_vec(), position))
            .collect::<Vec<_>>()
    }))
}

/// Fills a [`PatternIndex`] from digit files
pub struct IndexBuilder {
    index: Arc<PatternIndex>,
    options: BuildOptions,
}

impl IndexBuilder {
    pub fn new(index: Arc<PatternIndex>, options: BuildOptions) -> Self {
        Self { index, options }
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Index every stream in `descriptors`.
    ///
    /// Unknown constants are skipped and files sharing an identity are
    /// indexed once, using the longest file. Safe to re-run.
    pub fn build(&self, descriptors: Vec<StreamDescriptor>) -> Result<BuildReport> {
        let started = Instant::now();
        let mut report = BuildReport::default();

        let mut unique: BTreeMap<StreamIdentity, StreamDescriptor> = BTreeMap::new();
        for desc in descriptors {
            if !desc.identity.is_known() {
                warn!("skipping {}: unrecognized constant", desc.path.display());
                report.streams_skipped += 1;
                continue;
            }
            match unique.get(&desc.identity) {
                Some(existing) if existing.total_digits >= desc.total_digits => {
                    debug!("skipping duplicate {}", desc.path.display());
                    report.streams_skipped += 1;
                }
                Some(_) => {
                    report.streams_skipped += 1;
                    unique.insert(desc.identity.clone(), desc);
                }
                None => {
                    unique.insert(desc.identity.clone(), desc);
                }
            }
        }

        let queue: VecDeque<StreamDescriptor> = unique.into_values().collect();
        let stream_count = queue.len();
        let expected: u64 = queue.iter().map(|d| self.expected_patterns(d)).sum();
        info!(
            "indexing {} streams, {} patterns expected",
            stream_count,
            format_count(expected as f64)
        );

        let queue = Mutex::new(queue);
        let progress = BuildProgress::default();
        let done = AtomicBool::new(false);
        let workers = self.options.workers.min(stream_count).max(1);

        let (results, inserted) = thread::scope(|s| {
            let reporter =
                s.spawn(|| self.report_progress(&progress, &done, expected, stream_count));

            let handles: Vec<_> = (0..workers)
                .map(|_| s.spawn(|| self.run_worker(&queue, &progress)))
                .collect();

            let results: Vec<Result<u64>> = handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect();

            done.store(true, Ordering::Release);
            if let Err(e) = reporter.join() {
                std::panic::resume_unwind(e);
            }

            let inserted = results.iter().filter_map(|r| r.as_ref().ok()).sum::<u64>();
            (results, inserted)
        });

        for result in results {
            result?;
        }

        report.streams_processed = progress.streams_done.load(Ordering::Relaxed) as usize;
        report.patterns_emitted = progress.patterns.load(Ordering::Relaxed);
        report.rows_inserted = inserted;
        report.elapsed = started.elapsed();

        info!(
            "indexed {} streams ({} patterns, {} new) in {}",
            report.streams_processed,
            format_count(report.patterns_emitted as f64),
            format_count(report.rows_inserted as f64),
            format_duration(report.elapsed)
        );
        Ok(report)
    }

    /// Pull streams off the queue until it is empty. Returns rows inserted.
    fn run_worker(
        &self,
        queue: &Mutex<VecDeque<StreamDescriptor>>,
        progress: &BuildProgress,
    ) -> Result<u64> {
        let mut inserted = 0;
        loop {
            let next = queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
            let Some(desc) = next else {
                return Ok(inserted);
            };
            inserted += self.index_stream(&desc, progress)?;
            progress.streams_done.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn index_stream(&self, desc: &StreamDescriptor, progress: &BuildProgress) -> Result<u64> {
        debug!("indexing {}", desc);
        // The prefix tier is not used while building
        let stream = DigitStream::from_descriptor(desc.clone(), 0)?;
        self.index.create_namespace(&desc.identity, desc.format().key_encoding())?;

        let chunks = PatternChunks::new(
            &stream,
            self.options.window,
            self.options.max_len,
            self.options.chunk_size,
        )?;

        let mut inserted = 0;
        for chunk in chunks {
            let mut emitted = 0u64;
            let rows = self.index.bulk_insert(
                &desc.identity,
                chunk.patterns().inspect(|_| emitted += 1),
            )?;
            inserted += rows as u64;
            progress.patterns.fetch_add(emitted, Ordering::Relaxed);
        }

        stream.close();
        Ok(inserted)
    }

    fn expected_patterns(&self, desc: &StreamDescriptor) -> u64 {
        let window = self.options.window.min(desc.total_digits);
        let starts = window.saturating_sub(self.options.max_len as u64);
        starts * self.options.max_len as u64
    }

    /// Poll the shared counters until `done` is set
    fn report_progress(
        &self,
        progress: &BuildProgress,
        done: &AtomicBool,
        expected: u64,
        streams: usize,
    ) {
        let pb = if self.options.show_progress {
            let pb = ProgressBar::new(expected);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template(
                        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent}% {msg}",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("█▓▒░  "),
            );
            pb
        } else {
            ProgressBar::hidden()
        };

        let update = |pb: &ProgressBar| {
            let patterns = progress.patterns.load(Ordering::Relaxed);
            pb.set_position(patterns.min(expected));
            pb.set_message(format!(
                "streams {}/{} | {} patterns",
                progress.streams_done.load(Ordering::Relaxed),
                streams,
                format_count(patterns as f64)
            ));
        };

        while !done.load(Ordering::Acquire) {
            update(&pb);
            thread::sleep(self.options.progress_interval);
        }
        update(&pb);
        pb.finish_with_message(format!(
            "{} streams indexed",
            progress.streams_done.load(Ordering::Relaxed)
        ));
    }
}
