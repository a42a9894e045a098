//! Sync pointer resolution and first-time baseline detection.
//!
//! The pointer is never stored. It is re-derived every run from the trailers
//! on the downstream base branch.

use tracing::{debug, info, warn};

use crate::errors::GitError;
use crate::git::GitRepo;
use crate::packages::{self, package_path};
use crate::trailer;
use crate::upstream::UpstreamDefinition;

/// The last synced upstream commit, from the most recent base-branch commit
/// carrying `upstream`'s trailer key. `None` means the upstream has never been
/// onboarded.
pub fn resolve_pointer(
    git: &GitRepo,
    base_ref: &str,
    upstream: &UpstreamDefinition,
) -> Result<Option<String>, GitError> {
    let key = &upstream.trailer_key;
    debug!(base_ref, key = %key, "resolving sync pointer");

    let Some(entry) = git.find_in_log(base_ref, |msg| trailer::has_key(msg, key))? else {
        debug!(key = %key, "no sync pointer found");
        return Ok(None);
    };

    let trailers = trailer::extract(&entry.message, key);
    if trailers.len() > 1 {
        debug!(
            commit = %trailer::short(&entry.sha),
            count = trailers.len(),
            "squash-merge commit carries several trailers"
        );
    }

    let chosen = pick_most_recent(&trailers, |a, b| match git.is_ancestor(a, b) {
        Ok(related) => related,
        Err(e) => {
            warn!(ancestor = a, descendant = b, error = %e, "ancestry check failed");
            false
        }
    });

    Ok(chosen.map(|sha| git.resolve(&sha).unwrap_or(sha)))
}

/// Furthest-along candidate under the ancestry order. When two candidates are
/// unrelated the first seen is kept and a warning is logged.
pub fn pick_most_recent<F>(candidates: &[String], mut is_ancestor: F) -> Option<String>
where
    F: FnMut(&str, &str) -> bool,
{
    let mut most_recent = candidates.first()?.clone();
    for candidate in &candidates[1..] {
        if is_ancestor(&most_recent, candidate) {
            debug!(
                from = %trailer::short(&most_recent),
                to = %trailer::short(candidate),
                "pointer advanced within squash-merge"
            );
            most_recent = candidate.clone();
        } else if !is_ancestor(candidate, &most_recent) {
            warn!(
                kept = %trailer::short(&most_recent),
                other = %trailer::short(candidate),
                "trailers in one commit are not related, keeping the first"
            );
        }
    }
    Some(most_recent)
}

/// Onboarding baseline: the lowest common ancestor of every local package's
/// own baseline. `None` when no local package matches any upstream commit.
pub fn detect_baseline(
    git: &GitRepo,
    base_ref: &str,
    packages_dir: &str,
    upstream: &UpstreamDefinition,
) -> Result<Option<String>, GitError> {
    info!(prefix = %upstream.prefix, "detecting upstream baseline");
    let local = packages::local_packages(git, base_ref, packages_dir, upstream)?;
    if local.is_empty() {
        warn!(prefix = %upstream.prefix, "no local packages found");
        return Ok(None);
    }

    let upstream_history = git.rev_list(None, &upstream.remote_ref())?;
    let mut matches = Vec::new();
    for package in &local {
        let path = package_path(packages_dir, package);
        if let Some(commit) = find_package_baseline(git, base_ref, &path, &upstream_history)? {
            matches.push(commit);
        }
    }

    let Some((first, rest)) = matches.split_first() else {
        warn!(prefix = %upstream.prefix, "no baseline match for any package");
        return Ok(None);
    };

    let mut baseline = first.clone();
    for other in rest {
        baseline = git.merge_base(&baseline, other)?;
    }
    info!(prefix = %upstream.prefix, baseline = %baseline, "baseline detected");
    Ok(Some(baseline))
}

/// Earliest commit in `upstream_history` (oldest first) whose tree at `path`
/// is identical to the one at `base_ref`.
pub fn find_package_baseline(
    git: &GitRepo,
    base_ref: &str,
    path: &str,
    upstream_history: &[String],
) -> Result<Option<String>, GitError> {
    let Some(local_id) = git.tree_id_at(base_ref, path)? else {
        return Ok(None);
    };
    for commit in upstream_history {
        if git.tree_id_at(commit, path)? == Some(local_id) {
            debug!(path, commit = %trailer::short(commit), "package baseline match");
            return Ok(Some(commit.clone()));
        }
    }
    debug!(path, "no baseline match for package");
    Ok(None)
}
