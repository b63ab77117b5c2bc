#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Layout {
    start: u32,
    len: u32,
    workers: u8,
    page_size: u16,
    data_offset: u16,
    pattern_len: u8,
}

fuzz_target!(|l: Layout| {
    let start = l.start as u64;
    let total = start + l.len as u64;
    let pattern_len = l.pattern_len.max(1) as usize;
    let sectors = irrfind::search::plan_sectors(
        start,
        total,
        l.workers as usize,
        l.page_size as u64,
        l.data_offset as u64,
        pattern_len,
    );

    // Sectors tile [start, total) in order, each overlapping by at most pattern_len - 1
    let mut cursor = start;
    for s in &sectors {
        assert_eq!(s.start, cursor);
        assert!(s.end > s.start);
        assert!(s.scan_end >= s.end && s.scan_end <= total);
        assert!(s.scan_end - s.end <= pattern_len as u64 - 1);
        cursor = s.end;
    }
    assert_eq!(cursor, total);
    assert!(sectors.len() <= (l.workers as usize).max(1));
});
