//! Utility functions shared across irrfind.
//!
//! ## Modules
//!
//! - [`app_data`] - Configuration and application data directory (XDG-compliant)
//! - [`encoding`] - Word-to-digit pattern encoding
//! - [`format`] - Human-readable counts, sizes and durations
//! - [`progress`] - Progress bars (no-op without the `progress` feature)
//!
//! ```no_run
//! use irrfind::utils::text_to_digits;
//!
//! // Letters become their two-digit alphabet index
//! assert_eq!(text_to_digits("pi"), "1508");
//! ```

pub mod app_data;
pub mod encoding;
pub mod format;
pub mod progress;

pub use app_data::*;
pub use encoding::*;
pub use format::*;
