//! The persistent pattern index and the offline builder that fills it.

pub mod build;
pub mod stats;
pub mod store;

pub use build::{BuildOptions, BuildReport, IndexBuilder, PatternChunk, PatternChunks};
pub use store::{NamespaceInfo, PatternIndex};
