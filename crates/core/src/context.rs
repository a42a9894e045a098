//! Per-run context shared by the sync engine, split engine, rebase handler
//! and command channel.

use tracing::{debug, info, warn};

use crate::apply::CommitApplier;
use crate::config::AppConfig;
use crate::errors::{ConfigError, CoreError, GitError, HostError};
use crate::git::{GitRepo, PushMode};
use crate::hosting::{CodeHost, PullRequest};
use crate::upstream::{UpstreamDefinition, UpstreamRegistry};

/// Flags that change what a run is allowed to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// No pushes and no hosting mutations. Local branch work still happens.
    pub dry_run: bool,
    /// Ignore any resolvable pointer and run onboarding.
    pub force_bootstrap: bool,
}

/// Everything one run needs, borrowed for the run's duration. Only one
/// logical operation drives the working clone at a time.
pub struct BotContext<'a> {
    pub config: &'a AppConfig,
    pub registry: &'a UpstreamRegistry,
    pub git: &'a GitRepo,
    pub host: &'a dyn CodeHost,
    pub options: RunOptions,
}

impl<'a> BotContext<'a> {
    pub fn new(
        config: &'a AppConfig,
        registry: &'a UpstreamRegistry,
        git: &'a GitRepo,
        host: &'a dyn CodeHost,
        options: RunOptions,
    ) -> Self {
        Self {
            config,
            registry,
            git,
            host,
            options,
        }
    }

    pub fn base_branch(&self) -> &str {
        &self.config.repository.base_branch
    }

    pub fn pr_branch_prefix(&self) -> &str {
        &self.config.repository.pr_branch_prefix
    }

    pub fn packages_dir(&self) -> &str {
        &self.config.repository.packages_dir
    }

    pub fn target_remote(&self) -> &str {
        &self.config.repository.target_remote
    }

    pub fn bot_label(&self) -> &str {
        &self.config.bot.label
    }

    pub fn split_label(&self) -> &str {
        &self.config.bot.split_label
    }

    pub fn applier(&self, upstream: &'a UpstreamDefinition) -> CommitApplier<'a> {
        CommitApplier::new(self.git, upstream, &self.config.repository.packages_dir)
    }

    /// Push `branch` to the target remote unless this is a dry run.
    pub async fn push(&self, branch: &str, mode: PushMode) -> Result<(), GitError> {
        if self.options.dry_run {
            info!(branch, "[dry-run] would push branch");
            return Ok(());
        }
        self.git.push(self.target_remote(), branch, mode).await
    }

    /// Create a PR and apply `labels` to it.
    pub async fn open_pull_request(
        &self,
        title: &str,
        body: &str,
        head: &str,
        labels: &[&str],
    ) -> Result<PullRequest, HostError> {
        let pr = self
            .host
            .create_pull_request(title, body, head, self.base_branch())
            .await?;
        self.host.add_labels(pr.number, labels).await?;
        info!(number = pr.number, head, "opened pull request");
        Ok(pr)
    }

    // -----------------------------------------------------------------------
    // Startup checks
    // -----------------------------------------------------------------------

    /// Add `<prefix>upstream` remotes that are missing; fail when one exists
    /// with a different URL.
    pub fn initialize_remotes(&self) -> Result<(), CoreError> {
        for upstream in self.registry.iter() {
            match self.git.remote_url(&upstream.remote_name)? {
                Some(actual) if actual != upstream.repo_url => {
                    return Err(ConfigError::RemoteMismatch {
                        remote: upstream.remote_name.clone(),
                        actual,
                        expected: upstream.repo_url.clone(),
                    }
                    .into());
                }
                Some(_) => {
                    debug!(remote = %upstream.remote_name, "validated remote");
                }
                None => self.git.add_remote(&upstream.remote_name, &upstream.repo_url)?,
            }
        }
        Ok(())
    }

    /// Fail when the bot or split label is missing. An unreadable label list
    /// only warns.
    pub async fn check_labels(&self) -> Result<(), ConfigError> {
        let labels = match self.host.list_labels().await {
            Ok(labels) => labels,
            Err(e) => {
                warn!(error = %e, "could not list labels, skipping label check");
                return Ok(());
            }
        };
        let missing: Vec<String> = [self.bot_label(), self.split_label()]
            .into_iter()
            .filter(|l| !labels.iter().any(|have| have == l))
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingLabels(missing));
        }
        info!(
            label = self.bot_label(),
            split_label = self.split_label(),
            "verified required labels"
        );
        Ok(())
    }
}
