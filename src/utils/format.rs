//! Human-readable numbers and durations for progress and stats output

use std::time::Duration;

/// Format a count with a metric suffix, e.g. `1.50M`
pub fn format_count(value: f64) -> String {
    const SUFFIXES: [&str; 7] = ["", "k", "M", "G", "T", "P", "E"];

    if value < 1000.0 {
        return format!("{}", value.round() as u64);
    }

    let mut scaled = value;
    let mut idx = 0;
    while scaled >= 1000.0 && idx < SUFFIXES.len() - 1 {
        scaled /= 1000.0;
        idx += 1;
    }
    format!("{:.2}{}", scaled, SUFFIXES[idx])
}

/// Format byte size to human readable
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Format a duration as `1.2ms`, `03:07 mm:ss`, `02:15 hh:mm` or `N days`
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();

    if secs >= 86_400.0 {
        format!("{} days", (secs / 86_400.0) as u64)
    } else if secs >= 3_600.0 {
        let total = secs as u64;
        format!("{:02}:{:02} hh:mm", total / 3600, (total / 60) % 60)
    } else if secs >= 60.0 {
        let total = secs as u64;
        format!("{:02}:{:02} mm:ss", total / 60, total % 60)
    } else if secs >= 1.0 {
        format!("{:.1}s", secs)
    } else if secs >= 1e-3 {
        format!("{:.1}ms", secs * 1e3)
    } else {
        format!("{:.1}us", secs * 1e6)
    }
}
