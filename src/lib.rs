//! # irrfind - first-occurrence search in digit expansions
//!
//! irrfind answers "where does this digit string first appear in pi (or e,
//! or sqrt2 ...)?" over expansion files far larger than memory.
//!
//! ## Architecture
//!
//! - [`stream`] - Identifying digit files and reading them (prefix + mmap)
//! - [`index`] - Persistent first-occurrence index and its offline builder
//! - [`search`] - The cache / prefix / full-scan lookup state machine
//! - [`output`] - Terminal formatting
//! - [`utils`] - Configuration, encodings, progress bars
//!
//! ## Quick Start
//!
//! ```no_run
//! use irrfind::search::{EngineOptions, SearchEngine};
//! use irrfind::stream::Catalog;
//! use irrfind::utils::AppConfig;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let config = AppConfig::default();
//! let catalog = Arc::new(Catalog::new(config.prefix_size));
//! let engine = SearchEngine::new(catalog, None, EngineOptions::from_config(&config)).unwrap();
//!
//! let outcome = engine.locate_path(Path::new("pi.txt"), b"265").unwrap();
//! println!("{}", outcome.offset()); // 6
//! ```
//!
//! ## Lookup tiers
//!
//! 1. **Index** - previously answered patterns, stored in SQLite
//! 2. **Prefix** - the first million digits, held in memory
//! 3. **Full scan** - page-aligned sectors scanned in parallel over mmap
//!
//! Positions are 1-based: position 1 is the first digit after the radix
//! point. A miss is reported as -1.

pub mod error;
pub mod index;
pub mod output;
pub mod search;
pub mod stream;
pub mod utils;

pub use error::{Error, Result};
pub use index::{IndexBuilder, PatternIndex};
pub use search::{SearchEngine, SearchOutcome, Source};
pub use stream::{Catalog, DigitStream, Position, StreamDescriptor, StreamIdentity};
