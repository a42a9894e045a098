//! Upstream registry.
//!
//! One [`UpstreamDefinition`] per configured source repository. The registry
//! is built once from [`AppConfig`] and is read-only for the rest of the run.

use std::fmt;

use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::errors::ConfigError;
use crate::trailer;

/// Trailer key used by the primary upstream. Auxiliary upstreams prepend
/// their prefix.
pub const TRAILER_KEY: &str = "Upstream-Commit";

/// Identity of one upstream source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamDefinition {
    /// Config name (`primary` for the primary upstream).
    pub name: String,
    /// Path-namespace prefix; unique across all upstreams.
    pub prefix: String,
    pub repo_url: String,
    /// `<prefix>upstream`.
    pub remote_name: String,
    pub tracked_branch: String,
    /// `Upstream-Commit` for the primary, `<prefix>Upstream-Commit` otherwise.
    pub trailer_key: String,
    /// Package names never synced even though they carry the prefix.
    pub ignore_list: Vec<String>,
    pub is_primary: bool,
}

impl UpstreamDefinition {
    fn new(
        name: &str,
        prefix: &str,
        repo_url: &str,
        branch: &str,
        ignore: &[String],
        is_primary: bool,
    ) -> Self {
        let trailer_key = if is_primary {
            TRAILER_KEY.to_string()
        } else {
            format!("{prefix}{TRAILER_KEY}")
        };
        Self {
            name: name.to_string(),
            prefix: prefix.to_string(),
            repo_url: repo_url.to_string(),
            remote_name: format!("{prefix}upstream"),
            tracked_branch: branch.to_string(),
            trailer_key,
            ignore_list: ignore.to_vec(),
            is_primary,
        }
    }

    /// `<remote>/<branch>`, the ref the upstream tip is read from.
    pub fn remote_ref(&self) -> String {
        format!("{}/{}", self.remote_name, self.tracked_branch)
    }

    /// Whether `package` is eligible for sync: prefix-matched and not ignored.
    pub fn owns_package(&self, package: &str) -> bool {
        package.starts_with(&self.prefix) && !self.ignore_list.iter().any(|i| i == package)
    }

    /// Working branch for normal sync PRs.
    pub fn sync_branch(&self, pr_branch_prefix: &str) -> String {
        format!("{pr_branch_prefix}/{}update", self.prefix)
    }

    /// Branch carrying the onboarding marker commit.
    pub fn onboard_branch(&self, pr_branch_prefix: &str) -> String {
        format!("{pr_branch_prefix}/{}onboard", self.prefix)
    }

    /// Branch for the remainder of a split, named after its first commit.
    pub fn split_branch(&self, pr_branch_prefix: &str, first_sha: &str) -> String {
        format!(
            "{pr_branch_prefix}/{}{}",
            self.prefix,
            trailer::short(first_sha)
        )
    }
}

impl fmt::Display for UpstreamDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.prefix, self.repo_url)
    }
}

/// All configured upstreams, primary first, then auxiliaries in registration
/// order.
#[derive(Debug, Clone)]
pub struct UpstreamRegistry {
    upstreams: Vec<UpstreamDefinition>,
}

impl UpstreamRegistry {
    /// Build the registry. Runs config validation, so duplicate prefixes and
    /// missing fields fail here.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let primary = &config.upstream;
        let mut upstreams = vec![UpstreamDefinition::new(
            "primary",
            &primary.prefix,
            &primary.repo_url,
            &primary.branch,
            &primary.ignore,
            true,
        )];

        for entry in &config.universe {
            // validate() guarantees both are present and non-empty.
            let (Some(prefix), Some(url)) = (entry.prefix.as_deref(), entry.repo_url.as_deref())
            else {
                return Err(ConfigError::MissingUpstreamField {
                    name: entry.name.clone(),
                    field: "prefix".into(),
                });
            };
            upstreams.push(UpstreamDefinition::new(
                &entry.name,
                prefix,
                url,
                &entry.branch,
                &entry.ignore,
                false,
            ));
        }

        debug!(count = upstreams.len(), "upstream registry built");
        Ok(Self { upstreams })
    }

    pub fn iter(&self) -> impl Iterator<Item = &UpstreamDefinition> {
        self.upstreams.iter()
    }

    pub fn len(&self) -> usize {
        self.upstreams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upstreams.is_empty()
    }

    pub fn primary(&self) -> &UpstreamDefinition {
        // from_config always pushes the primary first.
        &self.upstreams[0]
    }

    pub fn by_prefix(&self, prefix: &str) -> Option<&UpstreamDefinition> {
        self.upstreams.iter().find(|u| u.prefix == prefix)
    }

    /// Work out which upstream a PR belongs to: by branch name, then by the
    /// trailer keys in the body, then fall back to the primary.
    pub fn for_pull_request(
        &self,
        head_ref: &str,
        body: &str,
        pr_branch_prefix: &str,
    ) -> &UpstreamDefinition {
        // Longest prefix wins so `fb_` never shadows `fb_x_`.
        let by_branch = self
            .upstreams
            .iter()
            .filter(|u| head_ref.contains(&format!("{pr_branch_prefix}/{}", u.prefix)))
            .max_by_key(|u| u.prefix.len());
        if let Some(upstream) = by_branch {
            return upstream;
        }

        let by_trailer = self
            .upstreams
            .iter()
            .filter(|u| !u.is_primary)
            .chain(std::iter::once(self.primary()))
            .find(|u| trailer::has_key(body, &u.trailer_key));
        if let Some(upstream) = by_trailer {
            return upstream;
        }

        warn!(head_ref, "could not determine upstream for PR, defaulting to primary");
        self.primary()
    }
}
