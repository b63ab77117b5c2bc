use crate::index::store::PatternIndex;
use crate::utils::{format_count, format_size};
use anyhow::Result;
use std::path::Path;

/// Display pattern index statistics
pub fn show_stats(index: &PatternIndex) -> Result<()> {
    let namespaces = index.namespaces()?;

    println!("Index Statistics");
    println!("================");
    println!();
    println!("Index location:   {}", index.path().display());
    println!("Namespaces:       {}", namespaces.len());

    if let Some(size) = store_size(index.path()) {
        println!("Index size:       {}", format_size(size));
    }

    if namespaces.is_empty() {
        println!();
        println!("No streams indexed yet.");
        return Ok(());
    }

    println!();
    println!("Records by stream:");
    let mut total = 0;
    for ns in &namespaces {
        total += ns.records;
        println!(
            "  {:20} {:>10}  ({})",
            ns.identity.namespace(),
            format_count(ns.records as f64),
            ns.key_encoding.sql_type().to_lowercase()
        );
    }
    println!();
    println!("Total records:    {}", total);

    Ok(())
}

/// Size of the database plus its WAL side files
fn store_size(path: &Path) -> Option<u64> {
    let mut size = std::fs::metadata(path).ok()?.len();
    for suffix in ["-wal", "-shm"] {
        let mut side = path.as_os_str().to_owned();
        side.push(suffix);
        if let Ok(meta) = std::fs::metadata(&side) {
            size += meta.len();
        }
    }
    Some(size)
}
