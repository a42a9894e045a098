//! PR split engine.
//!
//! Splits a sync PR's batch in two. The requested span stays on the original
//! branch; the complementary commits move to a new branch and PR. Both
//! branches are rebuilt from the base tip, reusing already-resolved downstream
//! commits where the original branch has them and applying the rest fresh.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex_lite::Regex;
use tracing::{debug, info, instrument};

use crate::apply::{ApplyOutcome, CommitApplier};
use crate::context::BotContext;
use crate::errors::CommandError;
use crate::git::PushMode;
use crate::report;
use crate::sync_engine::pr_title_and_body;
use crate::trailer;
use crate::upstream::UpstreamDefinition;

const MAX_LISTED: usize = 10;

fn split_args_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([0-9a-f]{7,40})-([0-9a-f]{7,40})").expect("split pattern is a valid literal")
    })
}

/// Parse `<shaA>-<shaB>` out of the split command's arguments.
pub fn parse_split_args(args: &str) -> Result<(String, String), CommandError> {
    let lowered = args.trim().to_ascii_lowercase();
    let caps = split_args_regex()
        .captures(&lowered)
        .ok_or_else(|| CommandError::MalformedSplitArgs(args.trim().to_string()))?;
    Ok((caps[1].to_string(), caps[2].to_string()))
}

/// How an intended commit list is partitioned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPlan {
    /// Commits that stay on the original PR, in order.
    pub first: Vec<String>,
    /// Commits that move to a new PR, in order. May be empty.
    pub second: Vec<String>,
}

/// Partition `intended` around the span between `a` and `b` (short or full
/// ids, in either order). The span must touch one end of the list. A span
/// ending at the last index keeps that tail and moves the head of the list to
/// the new PR, so `first` and `second` together always cover `intended`.
pub fn plan_split(intended: &[String], a: &str, b: &str) -> Result<SplitPlan, CommandError> {
    let find = |id: &str| intended.iter().position(|sha| sha.starts_with(id));
    let (Some(ia), Some(ib)) = (find(a), find(b)) else {
        let mut listed = intended
            .iter()
            .take(MAX_LISTED)
            .map(|s| trailer::short(s))
            .collect::<Vec<_>>()
            .join(", ");
        if intended.len() > MAX_LISTED {
            listed.push_str(&format!(", ... ({} total)", intended.len()));
        }
        return Err(CommandError::UnknownCommits {
            start: trailer::short(a).to_string(),
            end: trailer::short(b).to_string(),
            available: listed,
        });
    };

    let (start, end) = if ia <= ib { (ia, ib) } else { (ib, ia) };
    let last = intended.len() - 1;
    if start != 0 && end != last {
        return Err(CommandError::NonContiguousRange {
            start: trailer::short(a).to_string(),
            end: trailer::short(b).to_string(),
            start_idx: start,
            end_idx: end,
            total: intended.len(),
        });
    }

    let first = intended[start..=end].to_vec();
    let second = if start == 0 {
        intended[end + 1..].to_vec()
    } else {
        intended[..start].to_vec()
    };
    debug!(start, end, first = first.len(), second = second.len(), "split plan");
    Ok(SplitPlan { first, second })
}

/// Result of an executed split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitResult {
    pub first: Vec<String>,
    pub second: Vec<String>,
    pub new_pr: Option<u64>,
}

pub struct SplitEngine<'a> {
    ctx: &'a BotContext<'a>,
}

impl<'a> SplitEngine<'a> {
    pub fn new(ctx: &'a BotContext<'a>) -> Self {
        Self { ctx }
    }

    /// Run `split <args>` against PR `number` and comment the outcome.
    #[instrument(skip(self))]
    pub async fn split(&self, number: u64, args: &str) -> Result<SplitResult, CommandError> {
        let (a, b) = parse_split_args(args)?;
        info!(number, start = %a, end = %b, "split requested");

        let pr = self.ctx.host.get_pull_request(number).await?;
        let upstream = self.ctx.registry.for_pull_request(
            &pr.head_ref,
            &pr.body,
            self.ctx.pr_branch_prefix(),
        );
        let intended = trailer::extract(&pr.body, &upstream.trailer_key);
        if intended.is_empty() {
            return Err(CommandError::UnknownUpstream(number));
        }
        let plan = plan_split(&intended, &a, &b)?;

        let remote = self.ctx.target_remote();
        let base = self.ctx.base_branch();
        self.ctx.git.fetch(remote, Some(base)).await?;
        self.ctx.git.fetch(remote, Some(&pr.head_ref)).await?;
        self.ctx
            .git
            .fetch(&upstream.remote_name, Some(&upstream.tracked_branch))
            .await?;
        let base_tip = format!("{remote}/{base}");
        let head_tip = format!("{remote}/{}", pr.head_ref);
        let applied = self.applied_commits(upstream, &base_tip, &head_tip)?;
        debug!(applied = applied.len(), intended = intended.len(), "recovered PR history");

        let applier = self.ctx.applier(upstream);

        // Original PR keeps the requested span.
        self.ctx.git.checkout_fresh(&pr.head_ref, &base_tip).await?;
        self.replay(&applier, &plan.first, &applied).await?;
        self.ctx.push(&pr.head_ref, PushMode::Force).await?;
        let (title, body) = pr_title_and_body(self.ctx, upstream, &plan.first)?;
        self.ctx
            .host
            .update_pull_request(number, Some(&title), Some(&body))
            .await?;
        self.ctx
            .host
            .add_labels(number, &[self.ctx.split_label()])
            .await?;

        let mut new_pr = None;
        if let Some(head) = plan.second.first() {
            let branch = upstream.split_branch(self.ctx.pr_branch_prefix(), head);
            info!(branch = %branch, count = plan.second.len(), "creating branch for remainder");
            self.ctx.git.checkout_fresh(&branch, &base_tip).await?;
            self.replay(&applier, &plan.second, &applied).await?;
            self.ctx.push(&branch, PushMode::Force).await?;
            let (title, body) = pr_title_and_body(self.ctx, upstream, &plan.second)?;
            let created = self
                .ctx
                .open_pull_request(
                    &title,
                    &body,
                    &branch,
                    &[self.ctx.bot_label(), self.ctx.split_label()],
                )
                .await?;
            new_pr = Some(created.number);
        }

        self.ctx.git.checkout(base).await?;
        let comment = report::split_success_comment(plan.first.len(), plan.second.len(), new_pr);
        self.ctx.host.comment(number, &comment).await?;
        info!(number, first = plan.first.len(), second = plan.second.len(), "split complete");

        Ok(SplitResult {
            first: plan.first,
            second: plan.second,
            new_pr,
        })
    }

    /// Upstream commit -> downstream commit for every commit the PR branch
    /// carries beyond the base tip. Later mappings win.
    fn applied_commits(
        &self,
        upstream: &UpstreamDefinition,
        base_tip: &str,
        head: &str,
    ) -> Result<HashMap<String, String>, CommandError> {
        let mut map = HashMap::new();
        for downstream in self.ctx.git.rev_list(Some(base_tip), head)? {
            let message = self.ctx.git.message(&downstream)?;
            if let Some(up) = trailer::first(&message, &upstream.trailer_key) {
                map.insert(up, downstream);
            }
        }
        Ok(map)
    }

    /// Rebuild `commits` onto the checked-out branch: cherry-pick the resolved
    /// downstream commit when there is one, else apply the upstream commit.
    async fn replay(
        &self,
        applier: &CommitApplier<'_>,
        commits: &[String],
        applied: &HashMap<String, String>,
    ) -> Result<(), CommandError> {
        for upstream_commit in commits {
            match applied.get(upstream_commit) {
                Some(downstream) => {
                    debug!(
                        downstream = %trailer::short(downstream),
                        upstream = %trailer::short(upstream_commit),
                        "reusing resolved commit"
                    );
                    self.ctx.git.cherry_pick(downstream).await?;
                }
                None => match applier.apply(upstream_commit).await? {
                    ApplyOutcome::Applied { .. } => {}
                    ApplyOutcome::Skipped(reason) => {
                        debug!(upstream = %trailer::short(upstream_commit), %reason, "skipped");
                    }
                },
            }
        }
        Ok(())
    }
}
