//! Conflict classification.

use std::collections::BTreeSet;
use std::fmt;

use tracing::debug;

use crate::packages::is_tracked_path;
use crate::upstream::UpstreamDefinition;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Conflicting paths of one failed cherry-pick. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictRecord {
    /// Paths in packages the fork tracks for this upstream.
    pub real: Vec<String>,
    /// Everything else: foreign prefixes, untracked packages, stray paths.
    pub auto_resolve: Vec<String>,
}

/// What to do with a failed cherry-pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Only auto-resolvable conflicts: drop the commit.
    Skip,
    /// Real conflicts, or a failure with no conflicting paths at all.
    Escalate,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip => write!(f, "skip"),
            Self::Escalate => write!(f, "escalate"),
        }
    }
}

impl ConflictRecord {
    pub fn is_empty(&self) -> bool {
        self.real.is_empty() && self.auto_resolve.is_empty()
    }

    pub fn resolution(&self) -> Resolution {
        if self.real.is_empty() && !self.auto_resolve.is_empty() {
            Resolution::Skip
        } else {
            Resolution::Escalate
        }
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Partition `paths` into real and auto-resolvable conflicts.
///
/// A path is real iff it lies in `<packages_dir>/<name>/` where `name` carries
/// the upstream prefix and is in `local`.
pub fn classify(
    paths: &[String],
    packages_dir: &str,
    upstream: &UpstreamDefinition,
    local: &BTreeSet<String>,
) -> ConflictRecord {
    let mut record = ConflictRecord::default();
    for path in paths {
        if is_tracked_path(path, packages_dir, upstream, local) {
            debug!(path = %path, "real conflict");
            record.real.push(path.clone());
        } else {
            debug!(path = %path, "auto-resolvable conflict");
            record.auto_resolve.push(path.clone());
        }
    }
    debug!(
        real = record.real.len(),
        auto_resolve = record.auto_resolve.len(),
        "classified conflicts"
    );
    record
}
