//! Digit files and the streams that read them.
//!
//! - `types`: identities, descriptors, storage formats
//! - `catalog`: identifies files and discovers them on disk
//! - `digits`: the two-tier (prefix + mmap) [`DigitStream`]

pub mod catalog;
pub mod digits;
pub mod types;

pub use catalog::Catalog;
pub use digits::{DigitStream, Digits};
pub use types::*;
