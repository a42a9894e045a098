//! Package layout: a package is a directory `<packages_dir>/<name>` whose name
//! carries an upstream prefix.

use std::collections::BTreeSet;

use tracing::debug;

use crate::errors::GitError;
use crate::git::GitRepo;
use crate::upstream::UpstreamDefinition;

/// Package name of `path`, when it lies inside a package directory.
///
/// `cookbooks/fb_apt/recipes/default.rb` → `fb_apt`. Paths outside
/// `packages_dir` or without a package component yield `None`.
pub fn package_of_path<'a>(path: &'a str, packages_dir: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(packages_dir)?.strip_prefix('/')?;
    let name = rest.split('/').next()?;
    (!name.is_empty()).then_some(name)
}

/// Path of a package directory.
pub fn package_path(packages_dir: &str, package: &str) -> String {
    format!("{packages_dir}/{package}")
}

/// Packages of `upstream` present at `rev`: prefix-matched, not ignored.
/// Always read from the committed tree, never the filesystem.
pub fn local_packages(
    git: &GitRepo,
    rev: &str,
    packages_dir: &str,
    upstream: &UpstreamDefinition,
) -> Result<BTreeSet<String>, GitError> {
    let packages: BTreeSet<String> = git
        .list_dirs(rev, packages_dir)?
        .into_iter()
        .filter(|name| upstream.owns_package(name))
        .collect();
    debug!(
        prefix = %upstream.prefix,
        count = packages.len(),
        "listed local packages"
    );
    Ok(packages)
}

/// Packages of `upstream` that `paths` fall into.
pub fn touched_packages<'a, I>(
    paths: I,
    packages_dir: &str,
    upstream: &UpstreamDefinition,
) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a String>,
{
    paths
        .into_iter()
        .filter_map(|p| package_of_path(p, packages_dir))
        .filter(|name| upstream.owns_package(name))
        .map(str::to_string)
        .collect()
}

/// Whether `path` belongs to a package of `upstream` that is tracked locally.
pub fn is_tracked_path(
    path: &str,
    packages_dir: &str,
    upstream: &UpstreamDefinition,
    local: &BTreeSet<String>,
) -> bool {
    package_of_path(path, packages_dir)
        .is_some_and(|name| upstream.owns_package(name) && local.contains(name))
}
