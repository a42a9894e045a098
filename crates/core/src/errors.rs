//! Error types for the forkline core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them for callers that want a single
//! error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Command(#[from] CommandError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation. All of these are fatal
/// at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// An auxiliary upstream entry lacks a required field.
    #[error("invalid universe upstream '{name}': missing required '{field}'")]
    MissingUpstreamField { name: String, field: String },

    /// Two upstreams share a prefix.
    #[error("duplicate upstream prefixes detected: {0:?}; each upstream must have a unique prefix")]
    DuplicatePrefix(Vec<String>),

    /// A git remote already exists but points somewhere else.
    #[error("remote '{remote}' exists with URL '{actual}' but expected '{expected}'; please fix the remote URL manually")]
    RemoteMismatch {
        remote: String,
        actual: String,
        expected: String,
    },

    /// Labels the bot relies on are absent from the hosting repository.
    #[error("required labels missing in repository: {0:?}; create them before running the bot")]
    MissingLabels(Vec<String>),

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from the local repository adapter (git2 reads and `git` CLI calls).
#[derive(Debug, Error)]
pub enum GitError {
    /// The repository path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A ref (branch, tag, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// A `git` command exited with a non-zero status.
    #[error("git {command} failed (exit {exit_code}): {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// A rebase stopped on conflicts.
    #[error("rebase of '{branch}' onto '{onto}' stopped on conflicts")]
    RebaseConflict { branch: String, onto: String },

    /// Neither the structured abort nor the hard reset could restore a clean
    /// working tree. The clone is in an undefined state.
    #[error("failed to restore a clean working tree: {0}")]
    CleanupFailed(String),

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Code-hosting errors
// ---------------------------------------------------------------------------

/// Errors from the code-hosting (GitHub REST) API.
#[derive(Debug, Error)]
pub enum HostError {
    /// HTTP-level transport error (network, TLS, etc.).
    #[error("GitHub HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The API returned a non-success status code.
    #[error("GitHub API error (HTTP {status}): {body}")]
    ApiError { status: u16, body: String },

    /// Authentication token is missing or invalid.
    #[error("GitHub authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Rate limit exceeded.
    #[error("GitHub rate limit exceeded, resets at {reset_at}")]
    RateLimited { reset_at: String },

    /// JSON deserialization failure.
    #[error("GitHub response parse error: {0}")]
    ParseError(String),
}

// ---------------------------------------------------------------------------
// Apply errors
// ---------------------------------------------------------------------------

/// Errors from applying one upstream commit.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The cherry-pick hit conflicts in tracked, locally present packages.
    /// The working tree has already been restored when this is returned.
    #[error("conflict while applying {commit}")]
    Conflict {
        commit: String,
        real_paths: Vec<String>,
        diagnostics: String,
    },

    #[error(transparent)]
    Git(#[from] GitError),
}

// ---------------------------------------------------------------------------
// Sync errors
// ---------------------------------------------------------------------------

/// Errors that abort the sync of a single upstream. Other upstreams proceed.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Onboarding could not find any baseline commit.
    #[error("unable to detect upstream baseline for '{prefix}'")]
    BaselineNotFound { prefix: String },

    #[error("sync git error: {0}")]
    Git(#[from] GitError),

    #[error("sync GitHub error: {0}")]
    Host(#[from] HostError),

    #[error("sync apply error: {0}")]
    Apply(#[from] ApplyError),
}

// ---------------------------------------------------------------------------
// Command errors
// ---------------------------------------------------------------------------

/// Errors raised while executing a command from the command channel. These
/// are reported back as a comment and never crash the run.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("invalid split command format; expected `split <sha1>-<sha2>`, got `{0}`")]
    MalformedSplitArgs(String),

    #[error("invalid commit SHAs; could not find `{start}` or `{end}` in this PR. Available SHAs: {available}")]
    UnknownCommits {
        start: String,
        end: String,
        available: String,
    },

    #[error("split must be contiguous from one end of the PR, not from the middle. The range `{start}-{end}` is in the middle (positions {start_idx} to {end_idx} out of {total} commits). Please choose a range that starts at the beginning or ends at the end of the commit list.")]
    NonContiguousRange {
        start: String,
        end: String,
        start_idx: usize,
        end_idx: usize,
        total: usize,
    },

    #[error("could not determine which upstream PR #{0} belongs to")]
    UnknownUpstream(u64),

    #[error("rebase failed with conflicts. Please resolve conflicts manually. You may need to checkout the branch locally and run:\n```\ngit checkout {branch}\ngit rebase {onto}\n# Resolve conflicts\ngit rebase --continue\ngit push --force-with-lease\n```")]
    RebaseConflict { branch: String, onto: String },

    #[error("invalid event payload: {0}")]
    EventPayload(String),

    #[error("command git error: {0}")]
    Git(#[from] GitError),

    #[error("command GitHub error: {0}")]
    Host(#[from] HostError),

    #[error("command apply error: {0}")]
    Apply(#[from] ApplyError),
}
