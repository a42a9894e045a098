//! Cherry-pick and filter engine.
//!
//! Applies one upstream commit onto the checked-out branch:
//!
//! 1. Skip when the commit's content is already present.
//! 2. `cherry-pick --no-commit -X no-renames`.
//! 3. On success keep only paths in locally tracked packages and re-commit
//!    with the upstream message plus a provenance trailer.
//! 4. On failure classify the conflicts and either skip or escalate.
//!
//! Every return path leaves the working tree clean.

use std::collections::BTreeSet;
use std::fmt;

use tracing::{debug, info, instrument, warn};

use crate::conflict::{self, Resolution};
use crate::errors::{ApplyError, GitError};
use crate::git::{GitRepo, PickOutcome};
use crate::packages::{self, is_tracked_path};
use crate::trailer;
use crate::upstream::UpstreamDefinition;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Why a commit produced no downstream commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Every relevant path already matches the branch tip.
    AlreadyApplied,
    /// The cherry-pick succeeded but touched nothing tracked.
    NoRelevantChanges,
    /// Conflicts only in paths the fork does not track.
    AutoResolvableConflicts,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyApplied => write!(f, "already applied"),
            Self::NoRelevantChanges => write!(f, "no relevant changes"),
            Self::AutoResolvableConflicts => write!(f, "auto-resolvable conflicts only"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A downstream commit was created.
    Applied { sha: String },
    Skipped(SkipReason),
}

// ---------------------------------------------------------------------------
// Applier
// ---------------------------------------------------------------------------

/// Applies upstream commits for one upstream onto the current branch.
pub struct CommitApplier<'a> {
    git: &'a GitRepo,
    upstream: &'a UpstreamDefinition,
    packages_dir: &'a str,
}

impl<'a> CommitApplier<'a> {
    pub fn new(git: &'a GitRepo, upstream: &'a UpstreamDefinition, packages_dir: &'a str) -> Self {
        Self {
            git,
            upstream,
            packages_dir,
        }
    }

    fn local_packages(&self) -> Result<BTreeSet<String>, GitError> {
        packages::local_packages(self.git, "HEAD", self.packages_dir, self.upstream)
    }

    /// Paths touched by `commit` that fall in locally tracked packages.
    fn relevant_paths(
        &self,
        commit: &str,
        local: &BTreeSet<String>,
    ) -> Result<Vec<String>, GitError> {
        Ok(self
            .git
            .touched_paths(commit)?
            .into_iter()
            .filter(|p| is_tracked_path(p, self.packages_dir, self.upstream, local))
            .collect())
    }

    /// Whether every relevant path of `commit` already has the same content
    /// (or is absent on both sides) at HEAD. A commit with no relevant paths
    /// counts as applied.
    fn already_applied(
        &self,
        commit: &str,
        local: &BTreeSet<String>,
    ) -> Result<bool, GitError> {
        let relevant = self.relevant_paths(commit, local)?;
        if relevant.is_empty() {
            debug!(commit = %trailer::short(commit), "no relevant paths");
            return Ok(true);
        }
        for path in &relevant {
            if self.git.blob_at(commit, path)? != self.git.blob_at("HEAD", path)? {
                debug!(commit = %trailer::short(commit), path = %path, "path differs from HEAD");
                return Ok(false);
            }
        }
        info!(commit = %trailer::short(commit), "all changes already present");
        Ok(true)
    }

    /// Apply `commit`. Returns [`ApplyError::Conflict`] on a blocking
    /// conflict, after the tree has been restored.
    #[instrument(skip(self), fields(prefix = %self.upstream.prefix))]
    pub async fn apply(&self, commit: &str) -> Result<ApplyOutcome, ApplyError> {
        let local = self.local_packages()?;

        if self.already_applied(commit, &local)? {
            info!(commit = %trailer::short(commit), "already applied, skipping");
            return Ok(ApplyOutcome::Skipped(SkipReason::AlreadyApplied));
        }

        info!(commit = %commit, "applying upstream commit");
        match self.git.cherry_pick_no_commit(commit).await? {
            PickOutcome::Clean => match self.filter_and_commit(commit, &local).await? {
                Some(sha) => Ok(ApplyOutcome::Applied { sha }),
                None => {
                    info!(commit = %trailer::short(commit), "no tracked changes to apply");
                    Ok(ApplyOutcome::Skipped(SkipReason::NoRelevantChanges))
                }
            },
            PickOutcome::Conflicted { stderr } => {
                self.handle_conflict(commit, &stderr, &local).await
            }
        }
    }

    /// Keep only tracked paths from the staged cherry-pick and commit them.
    /// `None` when nothing tracked was staged.
    async fn filter_and_commit(
        &self,
        commit: &str,
        local: &BTreeSet<String>,
    ) -> Result<Option<String>, GitError> {
        let staged = self.git.staged_paths().await?;
        let keep: Vec<String> = staged
            .into_iter()
            .filter(|p| {
                let tracked = is_tracked_path(p, self.packages_dir, self.upstream, local);
                if !tracked {
                    debug!(path = %p, "dropping untracked path");
                }
                tracked
            })
            .collect();

        if keep.is_empty() {
            self.git.restore_clean_state().await?;
            return Ok(None);
        }

        self.git.unstage_all().await?;
        self.git.stage(&keep).await?;

        let full = self.git.resolve(commit)?;
        let message = trailer::append(&self.git.message(commit)?, &self.upstream.trailer_key, &full);
        let author = self.git.author(commit)?;
        let sha = self.git.commit(&message, Some(&author), false).await?;

        // Dropped paths are still in the tree, unstaged.
        self.git.reset_hard_and_clean().await?;
        info!(
            commit = %trailer::short(&full),
            downstream = %trailer::short(&sha),
            files = keep.len(),
            "applied upstream commit"
        );
        Ok(Some(sha))
    }

    async fn handle_conflict(
        &self,
        commit: &str,
        stderr: &str,
        local: &BTreeSet<String>,
    ) -> Result<ApplyOutcome, ApplyError> {
        warn!(commit = %commit, "conflict during cherry-pick");
        debug!(stderr = %stderr.trim(), "cherry-pick stderr");

        let already = match self.already_applied(commit, local) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "could not re-check whether commit is applied");
                false
            }
        };
        if already {
            self.git.restore_clean_state().await?;
            info!(commit = %trailer::short(commit), "already applied, skipping");
            return Ok(ApplyOutcome::Skipped(SkipReason::AlreadyApplied));
        }

        let conflicted = self.git.conflicted_paths().await?;
        let record = conflict::classify(&conflicted, self.packages_dir, self.upstream, local);

        if record.resolution() == Resolution::Skip {
            self.git.restore_clean_state().await?;
            info!(
                commit = %trailer::short(commit),
                "conflicts only in untracked or foreign packages, skipping"
            );
            return Ok(ApplyOutcome::Skipped(SkipReason::AutoResolvableConflicts));
        }

        let diagnostics = if conflicted.is_empty() {
            let stderr = stderr.trim();
            if stderr.is_empty() {
                "No conflict details available".to_string()
            } else {
                stderr.to_string()
            }
        } else {
            let shown = if record.real.is_empty() {
                &conflicted
            } else {
                &record.real
            };
            conflict::capture_diagnostics(self.git.workdir(), shown)
        };

        if !record.real.is_empty() {
            warn!(paths = ?record.real, "real conflicts in local packages");
        }
        self.git.restore_clean_state().await?;
        Err(ApplyError::Conflict {
            commit: commit.to_string(),
            real_paths: record.real,
            diagnostics,
        })
    }
}
