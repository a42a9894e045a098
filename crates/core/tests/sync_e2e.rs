//! End-to-end tests for the sync orchestrator.
//!
//! These drive the real `SyncEngine` against local git repositories (see
//! `common`) and an in-memory recording host.

mod common;

use common::{git, messages, Fixture, RecordingHost, APT, SYSCTL};

use forkline_core::apply::{ApplyOutcome, SkipReason};
use forkline_core::hosting::DryRunHost;
use forkline_core::report;
use forkline_core::sync_engine::UpstreamOutcome;
use forkline_core::trailer;
use forkline_core::{BotContext, RunOptions, SyncEngine, UpstreamRegistry};

const SYNC_BRANCH: &str = "line-cook/fb_update";

macro_rules! require_git {
    () => {
        if !common::git_available() {
            eprintln!("SKIPPED: git not found in PATH");
            return;
        }
    };
}

/// Run one full sync and return the single upstream's outcome.
async fn run_sync(fx: &Fixture, host: &RecordingHost, options: RunOptions) -> UpstreamOutcome {
    let config = fx.config();
    let registry = UpstreamRegistry::from_config(&config).unwrap();
    let repo = fx.open(&config);
    let ctx = BotContext::new(&config, &registry, &repo, host, options);
    ctx.initialize_remotes().unwrap();
    ctx.check_labels().await.unwrap();
    let report = SyncEngine::new(&ctx).sync_all().await.expect("sync aborted");
    assert_eq!(report.upstreams.len(), 1);
    report.upstreams.into_iter().next().unwrap().1
}

fn trailers_on(fx: &Fixture, range: &str) -> Vec<String> {
    messages(&fx.work, range)
        .iter()
        .filter_map(|m| trailer::first(m, "Upstream-Commit"))
        .collect()
}

// ===========================================================================
// Normal sync
// ===========================================================================

/// Commits touching only untracked packages are not selected, and foreign
/// paths are dropped from commits that are.
#[tokio::test]
async fn test_sync_batch_filters_and_orders() {
    require_git!();
    let fx = Fixture::onboarded();
    let c1 = fx.upstream_commit(&[(APT, "package 'apt'\npackage 'apt-utils'\n")], "fb_apt: add apt-utils");
    let _c2 = fx.upstream_commit(&[("cookbooks/fb_other/README.md", "other\n")], "fb_other: new cookbook");
    let c3 = fx.upstream_commit(
        &[
            (SYSCTL, "sysctl 'vm.swappiness'\nsysctl 'fs.file-max'\n"),
            ("cookbooks/fb_other/extra.rb", "extra\n"),
        ],
        "fb_sysctl: raise file-max",
    );

    let host = RecordingHost::new();
    let outcome = run_sync(&fx, &host, RunOptions::default()).await;

    match outcome {
        UpstreamOutcome::Synced {
            applied,
            pr,
            conflict,
            diverged,
        } => {
            assert_eq!(applied, vec![c1.clone(), c3.clone()]);
            assert_eq!(pr, Some(1));
            assert!(conflict.is_none());
            assert!(diverged.is_empty(), "unexpected divergence: {diverged:?}");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    assert_eq!(trailers_on(&fx, &format!("main..{SYNC_BRANCH}")), vec![c1, c3]);
    let files = git(&fx.work, &["ls-tree", "-r", "--name-only", SYNC_BRANCH]);
    assert!(!files.contains("fb_other"), "foreign package leaked: {files}");
    assert!(fx.origin_has_branch(SYNC_BRANCH));

    let prs = host.prs();
    assert_eq!(prs.len(), 1);
    assert_eq!(prs[0].title, "Sync upstream (2 commits)");
    assert_eq!(prs[0].head_ref, SYNC_BRANCH);
    assert!(prs[0].has_label("line-cook"));

    // The clone is left clean on the base branch.
    assert_eq!(git(&fx.work, &["rev-parse", "--abbrev-ref", "HEAD"]), "main");
    assert_eq!(git(&fx.work, &["status", "--porcelain"]), "");
}

/// The downstream commit keeps the upstream author and gains a trailer.
#[tokio::test]
async fn test_applied_commit_keeps_author() {
    require_git!();
    let fx = Fixture::onboarded();
    std::fs::write(fx.upstream.join(APT), "package 'apt'\npackage 'gpg'\n").unwrap();
    git(&fx.upstream, &["add", "-A"]);
    let status = std::process::Command::new("git")
        .current_dir(&fx.upstream)
        .args([
            "-c",
            "user.name=Committer",
            "-c",
            "user.email=c@example.com",
            "commit",
            "-q",
            "--author",
            "Upstream Dev <dev@example.com>",
            "-m",
            "fb_apt: add gpg",
        ])
        .status()
        .unwrap();
    assert!(status.success(), "upstream commit failed");

    let host = RecordingHost::new();
    run_sync(&fx, &host, RunOptions::default()).await;

    let author = git(&fx.work, &["log", "-1", "--format=%an <%ae>", SYNC_BRANCH]);
    assert_eq!(author, "Upstream Dev <dev@example.com>");
    let msg = git(&fx.work, &["log", "-1", "--format=%B", SYNC_BRANCH]);
    assert!(msg.starts_with("fb_apt: add gpg"));
    assert!(trailer::has_key(&msg, "Upstream-Commit"));
}

/// Re-running before the PR merges rebuilds the branch and updates the one
/// existing PR.
#[tokio::test]
async fn test_rerun_updates_single_pr() {
    require_git!();
    let fx = Fixture::onboarded();
    fx.upstream_commit(&[(APT, "package 'apt'\npackage 'curl'\n")], "fb_apt: curl");

    let host = RecordingHost::new();
    run_sync(&fx, &host, RunOptions::default()).await;
    let c2 = fx.upstream_commit(&[(SYSCTL, "sysctl 'kernel.pid_max'\n")], "fb_sysctl: pid_max");
    let outcome = run_sync(&fx, &host, RunOptions::default()).await;

    match outcome {
        UpstreamOutcome::Synced { applied, pr, .. } => {
            assert_eq!(applied.len(), 2);
            assert_eq!(applied[1], c2);
            assert_eq!(pr, Some(1));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    let prs = host.prs();
    assert_eq!(prs.len(), 1);
    assert_eq!(prs[0].title, "Sync upstream (2 commits)");
    assert_eq!(trailer::extract(&prs[0].body, "Upstream-Commit").len(), 2);
}

/// A PR marked as split is never reused as the sync PR.
#[tokio::test]
async fn test_split_pr_not_reused() {
    require_git!();
    let fx = Fixture::onboarded();
    fx.upstream_commit(&[(APT, "package 'apt'\npackage 'curl'\n")], "fb_apt: curl");

    let host = RecordingHost::new();
    run_sync(&fx, &host, RunOptions::default()).await;
    host.state.lock().unwrap().prs[0]
        .labels
        .push("line-cook-pr-split".into());

    run_sync(&fx, &host, RunOptions::default()).await;
    assert_eq!(host.prs().len(), 2);
}

/// Once the sync PR merges, the pointer moves and nothing is left to do.
#[tokio::test]
async fn test_merged_sync_is_up_to_date() {
    require_git!();
    let fx = Fixture::onboarded();
    let c1 = fx.upstream_commit(&[(APT, "package 'apt'\npackage 'curl'\n")], "fb_apt: curl");

    let host = RecordingHost::new();
    run_sync(&fx, &host, RunOptions::default()).await;
    fx.merge_branch(SYNC_BRANCH);

    let outcome = run_sync(&fx, &host, RunOptions::default()).await;
    assert_eq!(outcome, UpstreamOutcome::UpToDate { pointer: c1 });
    assert_eq!(host.prs().len(), 1);
}

/// A squash-merge carries every trailer; the pointer is the latest one.
#[tokio::test]
async fn test_squash_merge_pointer_takes_latest_trailer() {
    require_git!();
    let fx = Fixture::onboarded();
    fx.upstream_commit(&[(APT, "package 'apt'\npackage 'curl'\n")], "fb_apt: curl");
    let c2 = fx.upstream_commit(&[(SYSCTL, "sysctl 'kernel.pid_max'\n")], "fb_sysctl: pid_max");

    let host = RecordingHost::new();
    run_sync(&fx, &host, RunOptions::default()).await;
    let body = host.prs()[0].body.clone();
    fx.squash_merge(SYNC_BRANCH, &format!("Sync upstream (2 commits)\n\n{body}"));

    let outcome = run_sync(&fx, &host, RunOptions::default()).await;
    assert_eq!(outcome, UpstreamOutcome::UpToDate { pointer: c2 });
}

// ===========================================================================
// Conflicts
// ===========================================================================

/// A real conflict in a local package stops the batch and files an issue.
#[tokio::test]
async fn test_blocking_conflict_stops_batch() {
    require_git!();
    let fx = Fixture::onboarded();
    fx.work_commit(&[(APT, "package 'apt-local'\n")], "local apt tweak");
    let c1 = fx.upstream_commit(&[(APT, "package 'apt-upstream'\n")], "fb_apt: rename");
    fx.upstream_commit(&[(SYSCTL, "sysctl 'kernel.pid_max'\n")], "fb_sysctl: pid_max");

    let host = RecordingHost::new();
    let outcome = run_sync(&fx, &host, RunOptions::default()).await;

    assert_eq!(
        outcome,
        UpstreamOutcome::Synced {
            applied: Vec::new(),
            pr: None,
            conflict: Some(c1.clone()),
            diverged: Vec::new(),
        }
    );
    assert!(host.prs().is_empty());

    let issues = host.open_issues();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].title, report::conflict_issue_title(&c1));
    assert!(issues[0].body.contains("**Packages involved:** fb_apt"));
    assert!(issues[0].body.contains("## Conflict Details"));
    assert!(issues[0].body.contains(APT));
    assert!(issues[0].labels.contains(&"line-cook".to_string()));

    assert_eq!(git(&fx.work, &["status", "--porcelain"]), "");

    // A second run updates the same issue rather than filing another.
    run_sync(&fx, &host, RunOptions::default()).await;
    assert_eq!(host.open_issues().len(), 1);
}

/// An open issue whose title merely contains the conflict title is left
/// alone; the conflict gets its own issue.
#[tokio::test]
async fn test_conflict_issue_matches_exact_title() {
    require_git!();
    let fx = Fixture::onboarded();
    fx.work_commit(&[(APT, "package 'apt-local'\n")], "local apt tweak");
    let c1 = fx.upstream_commit(&[(APT, "package 'apt-upstream'\n")], "fb_apt: rename");

    let host = RecordingHost::new();
    let title = report::conflict_issue_title(&c1);
    let decoy = host.seed_issue(&format!("Follow-up to {title}"), &["line-cook"]);
    run_sync(&fx, &host, RunOptions::default()).await;

    let issues = host.open_issues();
    assert_eq!(issues.len(), 2);
    let untouched = issues.iter().find(|i| i.number == decoy).unwrap();
    assert!(untouched.body.is_empty());
    let filed = issues.iter().find(|i| i.number != decoy).unwrap();
    assert_eq!(filed.title, title);
    assert!(filed.body.contains(&c1));
}

/// Conflicts only outside tracked packages are skipped silently; the
/// resulting divergence is reported per package.
#[tokio::test]
async fn test_auto_resolvable_conflict_skipped() {
    require_git!();
    let fx = Fixture::onboarded();
    fx.work_commit(&[("README.md", "our fork\n")], "fork readme");
    fx.upstream_commit(
        &[
            ("README.md", "upstream readme v2\n"),
            (APT, "package 'apt'\npackage 'curl'\n"),
        ],
        "readme and apt",
    );

    let host = RecordingHost::new();
    let outcome = run_sync(&fx, &host, RunOptions::default()).await;

    assert_eq!(
        outcome,
        UpstreamOutcome::Synced {
            applied: Vec::new(),
            pr: None,
            conflict: None,
            diverged: vec!["fb_apt".to_string()],
        }
    );
    let issues = host.open_issues();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].title, "Local changes detected in fb_apt");
    assert_eq!(git(&fx.work, &["status", "--porcelain"]), "");
}

/// Conflict issues whose commit is now behind the pointer are closed.
#[tokio::test]
async fn test_resolved_conflict_issue_closed() {
    require_git!();
    let fx = Fixture::onboarded();
    let c1 = fx.upstream_commit(&[(APT, "package 'apt'\npackage 'curl'\n")], "fb_apt: curl");
    fx.upstream_commit(&[(SYSCTL, "sysctl 'kernel.pid_max'\n")], "fb_sysctl: pid_max");

    let host = RecordingHost::new();
    run_sync(&fx, &host, RunOptions::default()).await;
    fx.merge_branch(SYNC_BRANCH);

    let stale = host.seed_issue(&report::conflict_issue_title(&c1), &["line-cook"]);
    run_sync(&fx, &host, RunOptions::default()).await;

    assert!(host.open_issues().is_empty());
    assert_eq!(host.closed_issues()[0].number, stale);
    let comments = host.comments();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].0, stale);
    assert!(comments[0].1.contains(trailer::short(&c1)));
}

// ===========================================================================
// Onboarding
// ===========================================================================

/// Without a pointer the baseline is detected from package contents and a
/// marker PR is opened; once merged, sync resumes after the baseline.
#[tokio::test]
async fn test_onboarding_then_sync() {
    require_git!();
    let fx = Fixture::new();
    let u1 = fx.upstream_commit(&[(APT, "package 'apt'\npackage 'curl'\n")], "fb_apt: curl");

    let host = RecordingHost::new();
    let outcome = run_sync(&fx, &host, RunOptions::default()).await;
    assert_eq!(
        outcome,
        UpstreamOutcome::Onboarding {
            baseline: fx.base_commit.clone(),
            pr: Some(1),
        }
    );

    let branch = "line-cook/fb_onboard";
    assert!(fx.origin_has_branch(branch));
    let pr = host.pr(1);
    assert_eq!(pr.title, report::ONBOARD_TITLE);
    assert_eq!(pr.head_ref, branch);
    assert_eq!(
        trailers_on(&fx, &format!("main..{branch}")),
        vec![fx.base_commit.clone()]
    );

    // Onboarding again updates the same PR.
    run_sync(&fx, &host, RunOptions::default()).await;
    assert_eq!(host.prs().len(), 1);

    fx.merge_branch(branch);
    match run_sync(&fx, &host, RunOptions::default()).await {
        UpstreamOutcome::Synced { applied, .. } => assert_eq!(applied, vec![u1]),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

/// `force_bootstrap` ignores an existing pointer.
#[tokio::test]
async fn test_force_bootstrap_onboards() {
    require_git!();
    let fx = Fixture::onboarded();
    let host = RecordingHost::new();
    let options = RunOptions {
        dry_run: false,
        force_bootstrap: true,
    };
    match run_sync(&fx, &host, options).await {
        UpstreamOutcome::Onboarding { baseline, .. } => assert_eq!(baseline, fx.base_commit),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

// ===========================================================================
// Dry run
// ===========================================================================

#[tokio::test]
async fn test_dry_run_pushes_nothing() {
    require_git!();
    let fx = Fixture::onboarded();
    fx.upstream_commit(&[(APT, "package 'apt'\npackage 'curl'\n")], "fb_apt: curl");

    let config = fx.config();
    let registry = UpstreamRegistry::from_config(&config).unwrap();
    let repo = fx.open(&config);
    let host = DryRunHost::new(RecordingHost::new());
    let options = RunOptions {
        dry_run: true,
        force_bootstrap: false,
    };
    let ctx = BotContext::new(&config, &registry, &repo, &host, options);
    ctx.initialize_remotes().unwrap();
    let report = SyncEngine::new(&ctx).sync_all().await.unwrap();

    match &report.upstreams[0].1 {
        UpstreamOutcome::Synced { applied, pr, .. } => {
            assert_eq!(applied.len(), 1);
            assert_eq!(*pr, Some(0));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(!fx.origin_has_branch(SYNC_BRANCH));
    // Local branch work still happens.
    assert_eq!(trailers_on(&fx, &format!("main..{SYNC_BRANCH}")).len(), 1);
}

// ===========================================================================
// Applier
// ===========================================================================

/// Only tracked paths land downstream, and a second apply of the same commit
/// finds identical content and creates nothing.
#[tokio::test]
async fn test_apply_twice_is_idempotent() {
    require_git!();
    let fx = Fixture::onboarded();
    let commit = fx.upstream_commit(
        &[
            (APT, "package 'apt'\npackage 'apt-transport-https'\n"),
            ("cookbooks/fb_init/recipes/default.rb", "init\n"),
            ("cookbooks/pd_pager/recipes/default.rb", "pager\n"),
            ("README.md", "chef cookbooks, upstream edition\n"),
        ],
        "fb_apt: https transport",
    );

    let mut config = fx.config();
    config.upstream.ignore = vec!["fb_init".into()];
    let registry = UpstreamRegistry::from_config(&config).unwrap();
    let repo = fx.open(&config);
    let host = RecordingHost::new();
    let ctx = BotContext::new(&config, &registry, &repo, &host, RunOptions::default());
    ctx.initialize_remotes().unwrap();
    let upstream = registry.primary();
    repo.fetch(&upstream.remote_name, Some(&upstream.tracked_branch))
        .await
        .unwrap();
    let applier = ctx.applier(upstream);

    let first = applier.apply(&commit).await.unwrap();
    let sha = match first {
        ApplyOutcome::Applied { sha } => sha,
        other => panic!("expected an applied commit, got {other:?}"),
    };
    assert_eq!(git(&fx.work, &["rev-parse", "HEAD"]), sha);
    assert_eq!(
        git(&fx.work, &["show", "--name-only", "--format=", "HEAD"]),
        APT
    );
    let msg = git(&fx.work, &["log", "-1", "--format=%B"]);
    assert_eq!(trailer::first(&msg, "Upstream-Commit"), Some(commit.clone()));

    let second = applier.apply(&commit).await.unwrap();
    assert_eq!(second, ApplyOutcome::Skipped(SkipReason::AlreadyApplied));
    assert_eq!(git(&fx.work, &["rev-parse", "HEAD"]), sha);
    assert_eq!(git(&fx.work, &["status", "--porcelain"]), "");
}
