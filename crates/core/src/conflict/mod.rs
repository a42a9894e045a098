//! Conflict classification and diagnostics.
//!
//! When a cherry-pick fails, the conflicting paths are split into:
//! 1. **Real** conflicts -- inside a package the fork tracks for this
//!    upstream. These block the batch and are escalated.
//! 2. **Auto-resolvable** conflicts -- everything else. The upstream side is
//!    dropped silently.

pub mod classifier;
pub mod diagnostics;

pub use classifier::{classify, ConflictRecord, Resolution};
pub use diagnostics::{capture_diagnostics, format_file_excerpt};
