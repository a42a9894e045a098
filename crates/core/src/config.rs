//! TOML-based configuration for forkline.
//!
//! The configuration is loaded once per run, resolved against the process
//! environment, validated, and then passed by reference to every component.
//! Nothing reads configuration ambiently after startup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Labels, command prefix and logging.
    #[serde(default)]
    pub bot: BotConfig,

    /// Local clone and downstream branch settings.
    #[serde(default)]
    pub repository: RepositoryConfig,

    /// GitHub repository and API settings.
    #[serde(default)]
    pub github: GitHubConfig,

    /// The primary upstream.
    #[serde(default)]
    pub upstream: PrimaryUpstreamConfig,

    /// Auxiliary ("universe") upstreams, in registration order.
    #[serde(default)]
    pub universe: Vec<UniverseUpstreamConfig>,
}

// ---------------------------------------------------------------------------
// Bot
// ---------------------------------------------------------------------------

/// Bot identity on the hosting side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Label applied to every PR and issue the bot files.
    #[serde(default = "default_label")]
    pub label: String,

    /// Label marking PRs produced by a split.
    #[serde(default = "default_split_label")]
    pub split_label: String,

    /// Prefix that introduces a command in a PR comment.
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,

    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_label() -> String {
    "line-cook".into()
}
fn default_split_label() -> String {
    "line-cook-pr-split".into()
}
fn default_command_prefix() -> String {
    "#linecook".into()
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            label: default_label(),
            split_label: default_split_label(),
            command_prefix: default_command_prefix(),
            log_level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// Local working clone and downstream branch layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Path to the local working clone.
    #[serde(default = "default_repo_path")]
    pub path: PathBuf,

    /// Downstream branch that sync PRs target. `BASE_BRANCH` overrides.
    #[serde(default = "default_branch")]
    pub base_branch: String,

    /// Prefix for every branch the bot creates. `PR_BRANCH_PREFIX` overrides.
    #[serde(default = "default_pr_branch_prefix")]
    pub pr_branch_prefix: String,

    /// Remote that branches are pushed to. `TARGET_REMOTE` overrides.
    #[serde(default = "default_target_remote")]
    pub target_remote: String,

    /// Directory holding the packages; a package is `<packages_dir>/<name>`.
    #[serde(default = "default_packages_dir")]
    pub packages_dir: String,

    /// Committer name for bot commits.
    #[serde(default = "default_author_name")]
    pub author_name: String,

    /// Committer email for bot commits.
    #[serde(default = "default_author_email")]
    pub author_email: String,
}

fn default_repo_path() -> PathBuf {
    PathBuf::from(".")
}
fn default_branch() -> String {
    "main".into()
}
fn default_pr_branch_prefix() -> String {
    "line-cook".into()
}
fn default_target_remote() -> String {
    "origin".into()
}
fn default_packages_dir() -> String {
    "cookbooks".into()
}
fn default_author_name() -> String {
    "line-cook".into()
}
fn default_author_email() -> String {
    "line-cook@users.noreply.github.com".into()
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            path: default_repo_path(),
            base_branch: default_branch(),
            pr_branch_prefix: default_pr_branch_prefix(),
            target_remote: default_target_remote(),
            packages_dir: default_packages_dir(),
            author_name: default_author_name(),
            author_email: default_author_email(),
        }
    }
}

// ---------------------------------------------------------------------------
// GitHub
// ---------------------------------------------------------------------------

/// GitHub repository and API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// GitHub API base URL (default `https://api.github.com`).
    #[serde(default = "default_github_api_url")]
    pub api_url: String,

    /// Downstream repository in `owner/repo` format.
    #[serde(default)]
    pub repo: String,

    /// Environment variable holding the API token.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Resolved token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_github_api_url() -> String {
    "https://api.github.com".into()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".into()
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_github_api_url(),
            repo: String::new(),
            token_env: default_token_env(),
            token: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Upstreams
// ---------------------------------------------------------------------------

/// The primary upstream. Every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryUpstreamConfig {
    #[serde(default = "default_primary_prefix")]
    pub prefix: String,

    #[serde(default = "default_primary_repo_url")]
    pub repo_url: String,

    #[serde(default = "default_branch")]
    pub branch: String,

    /// Package names never synced even though they carry the prefix.
    #[serde(default = "default_primary_ignore")]
    pub ignore: Vec<String>,
}

fn default_primary_prefix() -> String {
    "fb_".into()
}
fn default_primary_repo_url() -> String {
    "https://www.github.com/facebook/chef-cookbooks.git".into()
}
fn default_primary_ignore() -> Vec<String> {
    vec!["fb_init".into(), "fb_init_sample".into()]
}

impl Default for PrimaryUpstreamConfig {
    fn default() -> Self {
        Self {
            prefix: default_primary_prefix(),
            repo_url: default_primary_repo_url(),
            branch: default_branch(),
            ignore: default_primary_ignore(),
        }
    }
}

/// An auxiliary upstream. `prefix` and `repo_url` are required; they are
/// optional here so that a missing field is reported by name at validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseUpstreamConfig {
    pub name: String,

    #[serde(default)]
    pub prefix: Option<String>,

    #[serde(default)]
    pub repo_url: Option<String>,

    #[serde(default = "default_branch")]
    pub branch: String,

    #[serde(default)]
    pub ignore: Vec<String>,
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** apply environment overrides -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: AppConfig =
            toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Load from `path` when it exists, otherwise start from built-in
    /// defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load_from_file(path)
        } else {
            debug!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Apply `BASE_BRANCH`, `PR_BRANCH_PREFIX` and `TARGET_REMOTE` overrides
    /// and resolve the API token from its environment variable.
    pub fn resolve_env_vars(&mut self) {
        self.resolve_with(|name| std::env::var(name).ok());
    }

    fn resolve_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("BASE_BRANCH").filter(|v| !v.is_empty()) {
            self.repository.base_branch = v;
        }
        if let Some(v) = lookup("PR_BRANCH_PREFIX").filter(|v| !v.is_empty()) {
            self.repository.pr_branch_prefix = v;
        }
        if let Some(v) = lookup("TARGET_REMOTE").filter(|v| !v.is_empty()) {
            self.repository.target_remote = v;
        }

        self.github.token = match lookup(&self.github.token_env) {
            Some(val) if !val.is_empty() => {
                debug!(env_name = %self.github.token_env, "resolved API token");
                Some(val)
            }
            _ => {
                warn!(env_name = %self.github.token_env, "API token env var not set");
                None
            }
        };
    }

    /// Validate upstream definitions and repository settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream.prefix.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "upstream.prefix".into(),
                detail: "prefix must not be empty".into(),
            });
        }
        if self.upstream.repo_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "upstream.repo_url".into(),
                detail: "repo URL must not be empty".into(),
            });
        }

        let mut prefixes = vec![self.upstream.prefix.clone()];
        for entry in &self.universe {
            let prefix = match entry.prefix.as_deref() {
                Some(p) if !p.is_empty() => p,
                _ => {
                    return Err(ConfigError::MissingUpstreamField {
                        name: entry.name.clone(),
                        field: "prefix".into(),
                    })
                }
            };
            if entry.repo_url.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::MissingUpstreamField {
                    name: entry.name.clone(),
                    field: "repo_url".into(),
                });
            }
            prefixes.push(prefix.to_string());
        }

        let mut duplicates: Vec<String> = prefixes
            .iter()
            .filter(|p| prefixes.iter().filter(|q| q == p).count() > 1)
            .cloned()
            .collect();
        duplicates.sort();
        duplicates.dedup();
        if !duplicates.is_empty() {
            return Err(ConfigError::DuplicatePrefix(duplicates));
        }

        if self.repository.packages_dir.is_empty() || self.repository.packages_dir.contains('/') {
            return Err(ConfigError::InvalidValue {
                field: "repository.packages_dir".into(),
                detail: "must be a single top-level directory name".into(),
            });
        }
        if !self.github.repo.is_empty() && !self.github.repo.contains('/') {
            return Err(ConfigError::InvalidValue {
                field: "github.repo".into(),
                detail: "GitHub repo must be in 'owner/repo' format".into(),
            });
        }

        Ok(())
    }

    /// Convenience: load (or default), resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_or_default(path)?;
        config.resolve_env_vars();
        config.validate()?;
        Ok(config)
    }
}
