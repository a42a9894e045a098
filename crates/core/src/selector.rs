//! Commit selection and relevance filtering.

use std::collections::BTreeSet;

use tracing::debug;

use crate::errors::GitError;
use crate::git::GitRepo;
use crate::packages;
use crate::trailer;
use crate::upstream::UpstreamDefinition;

/// Upstream commits in `(pointer, tip]`, oldest first. No pointer means no
/// commits; full history is only ever walked during onboarding.
pub fn commits_since(
    git: &GitRepo,
    pointer: Option<&str>,
    upstream: &UpstreamDefinition,
) -> Result<Vec<String>, GitError> {
    let Some(pointer) = pointer else {
        return Ok(Vec::new());
    };
    let commits = git.rev_list(Some(pointer), &upstream.remote_ref())?;
    debug!(
        prefix = %upstream.prefix,
        pointer = %trailer::short(pointer),
        count = commits.len(),
        "upstream commits since pointer"
    );
    Ok(commits)
}

/// Packages of `upstream` touched by `commit`.
pub fn touched_packages(
    git: &GitRepo,
    commit: &str,
    packages_dir: &str,
    upstream: &UpstreamDefinition,
) -> Result<BTreeSet<String>, GitError> {
    let paths = git.touched_paths(commit)?;
    Ok(packages::touched_packages(&paths, packages_dir, upstream))
}

/// The sync batch: commits since the pointer that touch at least one local
/// package.
pub fn select_batch(
    git: &GitRepo,
    pointer: Option<&str>,
    upstream: &UpstreamDefinition,
    packages_dir: &str,
    local: &BTreeSet<String>,
) -> Result<Vec<String>, GitError> {
    let mut batch = Vec::new();
    for commit in commits_since(git, pointer, upstream)? {
        let touched = touched_packages(git, &commit, packages_dir, upstream)?;
        if touched.iter().any(|p| local.contains(p)) {
            batch.push(commit);
        } else {
            debug!(commit = %trailer::short(&commit), "commit touches no local package");
        }
    }
    Ok(batch)
}
