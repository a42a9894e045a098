//! Multi-upstream sync orchestrator.
//!
//! The [`SyncEngine`] drives one state machine per upstream, in registration
//! order:
//!
//! 1. **Fetching** -- fetch the upstream remote.
//! 2. **Onboarding** (no pointer) -- detect the baseline and open a PR with an
//!    empty marker commit carrying its trailer.
//! 3. **NormalSync** (pointer found) -- close resolved conflict issues, select
//!    the batch, apply it in order on the sync branch, stop at the first
//!    blocking conflict, push, and create or update the sync PR.
//! 4. **Done** -- check out the base branch again.
//!
//! A failure in one upstream is logged and recorded; the others proceed.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::apply::ApplyOutcome;
use crate::context::BotContext;
use crate::errors::{ApplyError, GitError, HostError, SyncError};
use crate::git::PushMode;
use crate::hosting::PullRequest;
use crate::packages::{self, package_of_path, package_path};
use crate::pointer;
use crate::report::{self, CommitLine};
use crate::selector;
use crate::trailer;
use crate::upstream::UpstreamDefinition;

// ---------------------------------------------------------------------------
// Sync state machine
// ---------------------------------------------------------------------------

/// States of one upstream's sync.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Fetching,
    Onboarding,
    NormalSync,
    Done,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Fetching => write!(f, "fetching"),
            Self::Onboarding => write!(f, "onboarding"),
            Self::NormalSync => write!(f, "normal_sync"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// What happened to one upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpstreamOutcome {
    /// A marker commit for `baseline` was pushed for review.
    Onboarding { baseline: String, pr: Option<u64> },
    /// No relevant upstream commits since the pointer.
    UpToDate { pointer: String },
    Synced {
        /// Upstream commits that produced a downstream commit, in order.
        applied: Vec<String>,
        pr: Option<u64>,
        /// Upstream commit that stopped the batch.
        conflict: Option<String>,
        /// Packages whose content differs from the upstream tip.
        diverged: Vec<String>,
    },
    Failed { error: String },
}

/// Outcome of a full run, one entry per upstream in registration order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncReport {
    pub upstreams: Vec<(String, UpstreamOutcome)>,
}

impl SyncReport {
    pub fn has_failures(&self) -> bool {
        self.upstreams
            .iter()
            .any(|(_, o)| matches!(o, UpstreamOutcome::Failed { .. }))
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SyncEngine<'a> {
    ctx: &'a BotContext<'a>,
}

impl<'a> SyncEngine<'a> {
    pub fn new(ctx: &'a BotContext<'a>) -> Self {
        Self { ctx }
    }

    /// Sync every upstream. Per-upstream errors are recorded in the report;
    /// only a failure to restore a clean tree aborts the run.
    pub async fn sync_all(&self) -> Result<SyncReport, SyncError> {
        info!(
            dry_run = self.ctx.options.dry_run,
            force_bootstrap = self.ctx.options.force_bootstrap,
            "starting sync"
        );
        let mut report = SyncReport::default();

        for upstream in self.ctx.registry.iter() {
            info!(prefix = %upstream.prefix, "processing upstream");
            let outcome = match self.sync_upstream(upstream).await {
                Ok(outcome) => outcome,
                Err(e) if is_fatal(&e) => return Err(e),
                Err(e) => {
                    error!(prefix = %upstream.prefix, error = %e, "upstream sync failed");
                    UpstreamOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };
            // Leave the clone on the base branch for the next upstream.
            if let Err(e) = self.ctx.git.checkout(self.ctx.base_branch()).await {
                warn!(error = %e, "could not return to base branch");
            }
            report.upstreams.push((upstream.prefix.clone(), outcome));
        }

        info!(upstreams = report.upstreams.len(), "sync complete");
        Ok(report)
    }

    /// Run the state machine for one upstream.
    pub async fn sync_upstream(
        &self,
        upstream: &'a UpstreamDefinition,
    ) -> Result<UpstreamOutcome, SyncError> {
        let base = self.ctx.base_branch();

        self.transition(upstream, SyncState::Fetching);
        self.ctx
            .git
            .fetch(&upstream.remote_name, Some(&upstream.tracked_branch))
            .await?;
        self.ctx.git.checkout(base).await?;

        let pointer = if self.ctx.options.force_bootstrap {
            None
        } else {
            pointer::resolve_pointer(self.ctx.git, base, upstream)?
        };

        let outcome = match pointer {
            None => {
                self.transition(upstream, SyncState::Onboarding);
                self.onboard(upstream).await?
            }
            Some(pointer) => {
                self.transition(upstream, SyncState::NormalSync);
                self.normal_sync(upstream, &pointer).await?
            }
        };
        self.transition(upstream, SyncState::Done);
        Ok(outcome)
    }

    fn transition(&self, upstream: &UpstreamDefinition, state: SyncState) {
        debug!(prefix = %upstream.prefix, state = %state, "sync state");
    }

    // -----------------------------------------------------------------------
    // Onboarding
    // -----------------------------------------------------------------------

    async fn onboard(&self, upstream: &UpstreamDefinition) -> Result<UpstreamOutcome, SyncError> {
        info!(prefix = %upstream.prefix, "no sync pointer, onboarding");
        let base = self.ctx.base_branch();
        let baseline =
            pointer::detect_baseline(self.ctx.git, base, self.ctx.packages_dir(), upstream)?
                .ok_or_else(|| SyncError::BaselineNotFound {
                    prefix: upstream.prefix.clone(),
                })?;

        let branch = upstream.onboard_branch(self.ctx.pr_branch_prefix());
        self.ctx.git.checkout_fresh(&branch, base).await?;
        let message = report::onboard_commit_message(&upstream.trailer_key, &baseline);
        self.ctx.git.commit(&message, None, true).await?;
        self.ctx.push(&branch, PushMode::Force).await?;

        let body = report::onboard_pr_body(&baseline);
        let pr = match self.find_open_pr(&branch).await? {
            Some(existing) => {
                self.ctx
                    .host
                    .update_pull_request(existing.number, Some(report::ONBOARD_TITLE), Some(&body))
                    .await?;
                existing.number
            }
            None => {
                self.ctx
                    .open_pull_request(report::ONBOARD_TITLE, &body, &branch, &[self.ctx.bot_label()])
                    .await?
                    .number
            }
        };
        info!(prefix = %upstream.prefix, baseline = %baseline, pr, "onboarding PR ready");

        Ok(UpstreamOutcome::Onboarding {
            baseline,
            pr: Some(pr),
        })
    }

    // -----------------------------------------------------------------------
    // Normal sync
    // -----------------------------------------------------------------------

    async fn normal_sync(
        &self,
        upstream: &'a UpstreamDefinition,
        pointer: &str,
    ) -> Result<UpstreamOutcome, SyncError> {
        info!(prefix = %upstream.prefix, pointer = %trailer::short(pointer), "normal sync");
        let base = self.ctx.base_branch();
        let packages_dir = self.ctx.packages_dir();

        self.close_resolved_conflicts(pointer).await;

        let local = packages::local_packages(self.ctx.git, base, packages_dir, upstream)?;
        let batch = selector::select_batch(self.ctx.git, Some(pointer), upstream, packages_dir, &local)?;
        if batch.is_empty() {
            info!(prefix = %upstream.prefix, "no new commits to sync");
            return Ok(UpstreamOutcome::UpToDate {
                pointer: pointer.to_string(),
            });
        }
        info!(prefix = %upstream.prefix, count = batch.len(), "commits to process");

        let branch = upstream.sync_branch(self.ctx.pr_branch_prefix());
        self.ctx.git.checkout_fresh(&branch, base).await?;

        let applier = self.ctx.applier(upstream);
        let mut applied: Vec<String> = Vec::new();
        let mut conflict: Option<String> = None;

        for commit in &batch {
            match applier.apply(commit).await {
                Ok(ApplyOutcome::Applied { .. }) => applied.push(commit.clone()),
                Ok(ApplyOutcome::Skipped(reason)) => {
                    debug!(commit = %trailer::short(commit), %reason, "skipped");
                }
                Err(ApplyError::Conflict {
                    commit: blocked,
                    real_paths,
                    diagnostics,
                }) => {
                    warn!(commit = %trailer::short(&blocked), "blocking conflict, stopping batch");
                    self.escalate_conflict(upstream, &blocked, &real_paths, &diagnostics)
                        .await;
                    conflict = Some(blocked);
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let mut pr = None;
        if !applied.is_empty() {
            info!(prefix = %upstream.prefix, count = applied.len(), "applied commits");
            if conflict.is_none() {
                if let Some(last) = applied.last() {
                    self.close_resolved_conflicts(last).await;
                }
            }
            self.ctx.push(&branch, PushMode::Force).await?;
            pr = Some(self.upsert_sync_pr(upstream, &branch, &applied).await?);
        } else {
            info!(prefix = %upstream.prefix, "no commits were applied");
        }

        // Divergence is only meaningful when the batch went through.
        let mut diverged = Vec::new();
        if conflict.is_none() {
            diverged = self.find_diverged_packages(upstream, &local)?;
            let last_sync = applied.last().map(String::as_str).unwrap_or(pointer);
            for package in &diverged {
                self.report_local_changes(package, last_sync).await;
            }
        }

        Ok(UpstreamOutcome::Synced {
            applied,
            pr,
            conflict,
            diverged,
        })
    }

    /// Open PR on the base branch whose head is exactly `branch`.
    async fn find_open_pr(&self, branch: &str) -> Result<Option<PullRequest>, HostError> {
        Ok(self
            .ctx
            .host
            .list_open_pull_requests(self.ctx.base_branch())
            .await?
            .into_iter()
            .find(|pr| pr.head_ref == branch))
    }

    /// The open sync PR for `upstream`, ignoring PRs already marked as split.
    pub async fn existing_sync_pr(
        &self,
        upstream: &UpstreamDefinition,
    ) -> Result<Option<PullRequest>, HostError> {
        let branch = upstream.sync_branch(self.ctx.pr_branch_prefix());
        let split_label = self.ctx.split_label();
        Ok(self
            .ctx
            .host
            .list_open_pull_requests(self.ctx.base_branch())
            .await?
            .into_iter()
            .find(|pr| pr.head_ref == branch && !pr.has_label(split_label)))
    }

    async fn upsert_sync_pr(
        &self,
        upstream: &UpstreamDefinition,
        branch: &str,
        applied: &[String],
    ) -> Result<u64, SyncError> {
        let (title, body) = pr_title_and_body(self.ctx, upstream, applied)?;
        match self.existing_sync_pr(upstream).await? {
            Some(pr) => {
                info!(number = pr.number, prefix = %upstream.prefix, "updating sync PR");
                self.ctx
                    .host
                    .update_pull_request(pr.number, Some(&title), Some(&body))
                    .await?;
                self.ctx
                    .host
                    .add_labels(pr.number, &[self.ctx.bot_label()])
                    .await?;
                Ok(pr.number)
            }
            None => {
                info!(prefix = %upstream.prefix, "creating sync PR");
                let pr = self
                    .ctx
                    .open_pull_request(&title, &body, branch, &[self.ctx.bot_label()])
                    .await?;
                Ok(pr.number)
            }
        }
    }

    /// Local packages whose tree at the sync tip differs from the upstream
    /// tip.
    fn find_diverged_packages(
        &self,
        upstream: &UpstreamDefinition,
        local: &std::collections::BTreeSet<String>,
    ) -> Result<Vec<String>, GitError> {
        let tip = upstream.remote_ref();
        let mut diverged = Vec::new();
        for package in local {
            let path = package_path(self.ctx.packages_dir(), package);
            if self.ctx.git.tree_id_at("HEAD", &path)? != self.ctx.git.tree_id_at(&tip, &path)? {
                diverged.push(package.clone());
            }
        }
        if !diverged.is_empty() {
            warn!(prefix = %upstream.prefix, packages = ?diverged, "packages with local changes");
        }
        Ok(diverged)
    }

    // -----------------------------------------------------------------------
    // Issues
    // -----------------------------------------------------------------------

    /// Close open conflict issues whose commit is a strict ancestor of
    /// `pointer`. Errors are logged, never propagated.
    pub async fn close_resolved_conflicts(&self, pointer: &str) {
        let issues = match self
            .ctx
            .host
            .find_open_issues(self.ctx.bot_label(), report::CONFLICT_TITLE_PREFIX)
            .await
        {
            Ok(issues) => issues,
            Err(e) => {
                warn!(error = %e, "could not search conflict issues");
                return;
            }
        };

        for issue in issues {
            let Some(short) = report::conflict_issue_commit(&issue.title) else {
                debug!(number = issue.number, "issue title not in conflict format");
                continue;
            };
            let Ok(full) = self.ctx.git.resolve(short) else {
                warn!(number = issue.number, commit = short, "could not resolve issue commit");
                continue;
            };
            let resolved = full != pointer
                && self.ctx.git.is_ancestor(&full, pointer).unwrap_or(false);
            if !resolved {
                debug!(number = issue.number, commit = short, "conflict still blocking");
                continue;
            }

            info!(number = issue.number, commit = short, "conflict resolved, closing issue");
            let comment = report::conflict_resolved_comment(&full);
            if let Err(e) = self.ctx.host.comment(issue.number, &comment).await {
                error!(number = issue.number, error = %e, "failed to comment on issue");
                continue;
            }
            if let Err(e) = self.ctx.host.close_issue(issue.number).await {
                error!(number = issue.number, error = %e, "failed to close issue");
            }
        }
    }

    async fn escalate_conflict(
        &self,
        upstream: &UpstreamDefinition,
        commit: &str,
        real_paths: &[String],
        diagnostics: &str,
    ) {
        let mut involved: Vec<String> = real_paths
            .iter()
            .filter_map(|p| package_of_path(p, self.ctx.packages_dir()))
            .map(str::to_string)
            .collect();
        if involved.is_empty() {
            involved = selector::touched_packages(self.ctx.git, commit, self.ctx.packages_dir(), upstream)
                .map(|set| set.into_iter().collect())
                .unwrap_or_default();
        }
        involved.sort();
        involved.dedup();

        // This commit is now the blocker; older blockers are resolved.
        self.close_resolved_conflicts(commit).await;

        let title = report::conflict_issue_title(commit);
        let body = report::conflict_issue_body(commit, &involved, diagnostics);
        let result = async {
            let existing = self
                .ctx
                .host
                .find_open_issues(self.ctx.bot_label(), &title)
                .await?
                .into_iter()
                .find(|i| i.title == title);
            match existing {
                Some(issue) => {
                    self.ctx.host.update_issue_body(issue.number, &body).await?;
                    info!(number = issue.number, "updated conflict issue");
                }
                None => {
                    let issue = self
                        .ctx
                        .host
                        .create_issue(&title, &body, &[self.ctx.bot_label()])
                        .await?;
                    info!(number = issue.number, "created conflict issue");
                }
            }
            Ok::<(), HostError>(())
        }
        .await;
        if let Err(e) = result {
            error!(error = %e, "failed to create or update conflict issue");
        }
    }

    async fn report_local_changes(&self, package: &str, last_sync: &str) {
        let title = report::local_changes_title(package);
        let body = report::local_changes_body(package, last_sync);
        let result = async {
            let existing = self
                .ctx
                .host
                .find_open_issues(self.ctx.bot_label(), &title)
                .await?
                .into_iter()
                .find(|i| i.title == title);
            match existing {
                Some(issue) => self.ctx.host.update_issue_body(issue.number, &body).await,
                None => self
                    .ctx
                    .host
                    .create_issue(&title, &body, &[self.ctx.bot_label()])
                    .await
                    .map(|_| ()),
            }
        }
        .await;
        if let Err(e) = result {
            error!(package, error = %e, "failed to create or update local changes issue");
        }
    }
}

/// Title and body for a PR listing the upstream `commits`.
pub fn pr_title_and_body(
    ctx: &BotContext<'_>,
    upstream: &UpstreamDefinition,
    commits: &[String],
) -> Result<(String, String), GitError> {
    let lines = commits
        .iter()
        .map(|sha| {
            Ok(CommitLine {
                sha: sha.clone(),
                summary: ctx.git.summary(sha)?,
            })
        })
        .collect::<Result<Vec<_>, GitError>>()?;
    Ok(report::sync_pr(
        &lines,
        &upstream.trailer_key,
        &ctx.config.bot.command_prefix,
    ))
}

fn is_fatal(e: &SyncError) -> bool {
    matches!(
        e,
        SyncError::Git(GitError::CleanupFailed(_))
            | SyncError::Apply(ApplyError::Git(GitError::CleanupFailed(_)))
    )
}
