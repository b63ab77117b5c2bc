//! Parallel full scan over the part of a stream past the prefix.
//!
//! The scanned range is split into ascending, disjoint sectors whose
//! interior boundaries fall on page boundaries of the underlying file.
//! Each sector is extended by `pattern.len() - 1` digits so a match that
//! starts in one sector and ends in the next is still seen by the sector
//! it starts in. Workers scan their sector front to back in fixed-size
//! windows, each window mapped on its own.

use crate::error::Result;
use crate::stream::DigitStream;
use log::debug;
use memchr::memmem::Finder;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::sync::atomic::{AtomicU64, Ordering};

/// No match recorded yet
const NONE_FOUND: u64 = u64::MAX;

/// One worker's share of a full scan, in 0-based digit offsets.
///
/// Matches are reported only if they start in `[start, end)`; bytes up to
/// `scan_end` are read so such matches can finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sector {
    pub start: u64,
    pub end: u64,
    pub scan_end: u64,
}

/// Split `[start, total)` into at most `workers` sectors.
///
/// `data_offset` is where digit 0 sits in the file, so interior boundaries
/// can be aligned to `page_size` in file terms.
pub fn plan_sectors(
    start: u64,
    total: u64,
    workers: usize,
    page_size: u64,
    data_offset: u64,
    pattern_len: usize,
) -> Vec<Sector> {
    if start >= total {
        return Vec::new();
    }

    let page = page_size.max(1);
    let span = total - start;
    let share = span.div_ceil(workers.max(1) as u64);

    let mut sectors = Vec::with_capacity(workers.max(1));
    let mut cursor = start;
    while cursor < total {
        let raw = data_offset + cursor + share;
        let aligned = raw.div_ceil(page) * page - data_offset;
        let end = aligned.min(total);
        sectors.push(Sector {
            start: cursor,
            end,
            scan_end: (end + pattern_len as u64 - 1).min(total),
        });
        cursor = end;
    }
    sectors
}

/// Scan one sector and return the first match inside it.
///
/// Stops early once `best` holds a match before the window being scanned,
/// since nothing this sector could find would beat it.
pub fn scan_sector(
    stream: &DigitStream,
    sector: Sector,
    finder: &Finder<'_>,
    chunk_size: usize,
    best: &AtomicU64,
) -> Result<Option<u64>> {
    let overlap = finder.needle().len().saturating_sub(1) as u64;
    let chunk = chunk_size.max(1) as u64;

    let mut pos = sector.start;
    while pos < sector.end {
        if best.load(Ordering::Relaxed) < pos {
            debug!("sector {}..{} pruned at {}", sector.start, sector.end, pos);
            return Ok(None);
        }

        let window_end = (pos + chunk).min(sector.end);
        let map_end = (window_end + overlap).min(sector.scan_end);
        let map = stream.map_range(pos, (map_end - pos) as usize)?;

        if let Some(i) = finder.find(&map) {
            let found = pos + i as u64;
            best.fetch_min(found, Ordering::Relaxed);
            return Ok(Some(found));
        }
        pos = window_end;
    }
    Ok(None)
}

/// Settings for a full scan
#[derive(Debug, Clone, Copy)]
pub struct ScanPlan {
    pub workers: usize,
    pub chunk_size: usize,
    pub page_size: u64,
}

/// Find the first match at or after 0-based `start`.
///
/// Every sector is waited for; the answer is the smallest offset any of
/// them reports. An I/O error in any sector fails the whole scan.
pub fn full_scan(
    pool: &ThreadPool,
    stream: &DigitStream,
    pattern: &[u8],
    start: u64,
    plan: ScanPlan,
) -> Result<Option<u64>> {
    let sectors = plan_sectors(
        start,
        stream.total_digits(),
        plan.workers,
        plan.page_size,
        stream.descriptor().data_offset,
        pattern.len(),
    );
    debug!(
        "full scan of {} from {}: {} sectors",
        stream.path().display(),
        start,
        sectors.len()
    );
    if sectors.is_empty() {
        return Ok(None);
    }

    let finder = Finder::new(pattern);
    let best = AtomicU64::new(NONE_FOUND);

    let results: Vec<Result<Option<u64>>> = pool.install(|| {
        sectors
            .par_iter()
            .map(|&sector| scan_sector(stream, sector, &finder, plan.chunk_size, &best))
            .collect()
    });

    let mut first = None;
    for result in results {
        if let Some(found) = result? {
            first = Some(first.map_or(found, |f: u64| f.min(found)));
        }
    }
    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const DIGITS: &str = "14159265358979323846";

    fn pool(n: usize) -> ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(n).build().unwrap()
    }

    #[test]
    fn test_plan_covers_range_in_order() {
        let sectors = plan_sectors(1000, 50_000, 4, 4096, 2, 5);
        assert_eq!(sectors.first().unwrap().start, 1000);
        assert_eq!(sectors.last().unwrap().end, 50_000);
        for pair in sectors.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        for s in &sectors[..sectors.len() - 1] {
            assert_eq!((s.end + 2) % 4096, 0);
            assert_eq!(s.scan_end, s.end + 4);
        }
        assert!(sectors.len() <= 4);
    }

    #[test]
    fn test_plan_small_range_is_one_sector() {
        let sectors = plan_sectors(3, 20, 8, 4096, 2, 4);
        assert_eq!(
            sectors,
            vec![Sector {
                start: 3,
                end: 20,
                scan_end: 20
            }]
        );
        assert!(plan_sectors(20, 20, 4, 4096, 0, 1).is_empty());
    }

    #[test]
    fn test_pattern_straddling_sector_boundary() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pi.txt");
        fs::write(&path, format!("3.{}", DIGITS)).unwrap();
        let stream = DigitStream::open(&path, 0).unwrap();

        // Page size 1 gives sectors [0,5) [5,10) [10,15) [15,20):
        // "3238" starts at offset 14 and ends in the last sector
        let sectors = plan_sectors(0, 20, 4, 1, 2, 4);
        assert_eq!(sectors[2], Sector { start: 10, end: 15, scan_end: 18 });

        let plan = ScanPlan {
            workers: 4,
            chunk_size: 2,
            page_size: 1,
        };
        assert_eq!(full_scan(&pool(4), &stream, b"3238", 0, plan).unwrap(), Some(14));
    }

    #[test]
    fn test_matches_linear_scan_for_every_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pi.txt");
        fs::write(&path, format!("3.{}", DIGITS)).unwrap();
        let stream = DigitStream::open(&path, 0).unwrap();
        let digits = DIGITS.as_bytes();

        for workers in 1..=6 {
            let pool = pool(workers);
            for chunk_size in [1, 3, 64] {
                let plan = ScanPlan {
                    workers,
                    chunk_size,
                    page_size: 1,
                };
                for start in 0..digits.len() {
                    for len in 1..=4 {
                        for p in 0..digits.len() - len {
                            let pattern = &digits[p..p + len];
                            let expected = memchr::memmem::find(&digits[start..], pattern)
                                .map(|i| (start + i) as u64);
                            let got =
                                full_scan(&pool, &stream, pattern, start as u64, plan).unwrap();
                            assert_eq!(got, expected, "{:?} from {}", pattern, start);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_pruned_sector_reports_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pi.txt");
        fs::write(&path, format!("3.{}", DIGITS)).unwrap();
        let stream = DigitStream::open(&path, 0).unwrap();

        let finder = Finder::new(b"9");
        let best = AtomicU64::new(3);
        let sector = Sector {
            start: 10,
            end: 20,
            scan_end: 20,
        };
        assert_eq!(scan_sector(&stream, sector, &finder, 4, &best).unwrap(), None);

        let best = AtomicU64::new(NONE_FOUND);
        assert_eq!(scan_sector(&stream, sector, &finder, 4, &best).unwrap(), Some(11));
        assert_eq!(best.load(Ordering::Relaxed), 11);
    }

    #[test]
    fn test_missing_pattern() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pi.txt");
        fs::write(&path, format!("3.{}", DIGITS)).unwrap();
        let stream = DigitStream::open(&path, 0).unwrap();

        let plan = ScanPlan {
            workers: 3,
            chunk_size: 4,
            page_size: 1,
        };
        assert_eq!(full_scan(&pool(3), &stream, b"99", 0, plan).unwrap(), None);
        // Longer than the stream
        assert_eq!(
            full_scan(&pool(3), &stream, b"141592653589793238462", 0, plan).unwrap(),
            None
        );
    }
}
