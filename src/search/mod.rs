//! First-occurrence search over digit streams.
//!
//! - `engine`: the cache / prefix / full-scan state machine
//! - `sector`: sector planning and the parallel full scan

pub mod engine;
pub mod sector;

pub use engine::{EngineOptions, Excerpt, SearchEngine, SearchOutcome, Source};
pub use sector::{full_scan, plan_sectors, ScanPlan, Sector};
