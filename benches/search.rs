//! Search latency per tier
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use irrfind::index::PatternIndex;
use irrfind::search::{EngineOptions, SearchEngine};
use irrfind::stream::Catalog;
use irrfind::utils::{num_cpus, page_size};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

const DIGITS: usize = 32 * 1024 * 1024;
const PREFIX: usize = 1_000_000;

/// Pseudo-random decimal digits, deterministic across runs
fn create_digit_file() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("bench - Dec - synthetic.txt");

    let mut content = Vec::with_capacity(DIGITS + 2);
    content.extend_from_slice(b"3.");
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    for _ in 0..DIGITS {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        content.push(b'0' + (state % 10) as u8);
    }
    fs::write(&path, &content).expect("Failed to write digit file");

    (temp_dir, path)
}

fn engine(workers: usize, index: Option<Arc<PatternIndex>>) -> SearchEngine {
    let options = EngineOptions {
        workers,
        scan_chunk_size: 8 * 1024 * 1024,
        page_size: page_size(),
        use_index: true,
    };
    SearchEngine::new(Arc::new(Catalog::new(PREFIX)), index, options)
        .expect("Failed to build engine")
}

fn bench_prefix(c: &mut Criterion) {
    let (_dir, path) = create_digit_file();
    let engine = engine(num_cpus(), None);
    let stream = engine.stream(&path).unwrap();
    stream.prefix().unwrap();

    c.bench_function("prefix_4_digits", |b| {
        b.iter(|| engine.locate(&stream, black_box(b"7391")).unwrap())
    });
}

fn bench_full_scan(c: &mut Criterion) {
    let (_dir, path) = create_digit_file();
    // Long enough that it is almost surely absent
    let pattern = b"0123456789012";

    let mut group = c.benchmark_group("full_scan");
    group.sample_size(10);
    for workers in [1, 2, 4, num_cpus()] {
        let engine = engine(workers, None);
        let stream = engine.stream(&path).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, _| {
            b.iter(|| engine.locate(&stream, black_box(pattern)).unwrap())
        });
    }
    group.finish();
}

fn bench_cache(c: &mut Criterion) {
    let (dir, path) = create_digit_file();
    let index = Arc::new(PatternIndex::open(&dir.path().join("idx.sqlite")).unwrap());
    let engine = engine(num_cpus(), Some(index));
    let stream = engine.stream(&path).unwrap();
    // Prime the cache
    engine.locate(&stream, b"7391").unwrap();

    c.bench_function("cache_hit", |b| {
        b.iter(|| engine.locate(&stream, black_box(b"7391")).unwrap())
    });
}

criterion_group!(benches, bench_prefix, bench_full_scan, bench_cache);
criterion_main!(benches);
