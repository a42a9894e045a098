//! Titles and bodies for the pull requests, issues and comments the bot
//! writes.

use crate::trailer;

/// Title prefix shared by every conflict issue.
pub const CONFLICT_TITLE_PREFIX: &str = "Sync conflict applying upstream commit";

/// Title prefix shared by every local-changes issue.
pub const LOCAL_CHANGES_TITLE_PREFIX: &str = "Local changes detected in";

pub const ONBOARD_TITLE: &str = "Initialize upstream sync baseline";

/// One upstream commit as listed in a sync PR body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitLine {
    pub sha: String,
    pub summary: String,
}

/// Title and body of a sync PR listing `commits`.
pub fn sync_pr(commits: &[CommitLine], trailer_key: &str, command_prefix: &str) -> (String, String) {
    let entries: Vec<String> = commits
        .iter()
        .map(|c| format!("* {}\n  * {}\n", c.summary, trailer::format(trailer_key, &c.sha)))
        .collect();

    let mut body = String::from(
        "Syncing upstream commits. The upstream commits are listed below. You can \
         comment in this PR with the commands shown further down. This description \
         is built for squash-merge, so make sure you keep",
    );
    body.push_str(&format!(" all the `{trailer_key}` trailers intact.\n\n"));
    body.push_str(&entries.join("\n"));
    body.push_str("\n\nCommands:\n```\n");
    body.push_str(&format!(
        "{command_prefix} split <shaA>-<shaB>: Split range of commits into a separate PR. Must be first or last commits.\n"
    ));
    body.push_str(&format!("{command_prefix} rebase: Rebase this PR\n"));
    body.push_str("```\n");

    (format!("Sync upstream ({} commits)", commits.len()), body)
}

pub fn conflict_issue_title(commit: &str) -> String {
    format!("{CONFLICT_TITLE_PREFIX} {}", trailer::short(commit))
}

/// Short commit id embedded in a conflict issue title.
pub fn conflict_issue_commit(title: &str) -> Option<&str> {
    let rest = title.strip_prefix(CONFLICT_TITLE_PREFIX)?.trim_start();
    let sha = rest.split_whitespace().next()?;
    (sha.len() >= 7 && sha.chars().all(|c| c.is_ascii_hexdigit())).then_some(sha)
}

pub fn conflict_issue_body(commit: &str, packages: &[String], diagnostics: &str) -> String {
    let mut lines = vec![
        format!("**A conflict occurred** while applying upstream commit `{commit}`."),
        "\nThe changes are blocking the sync and must be resolved before continuing.".to_string(),
    ];
    if !packages.is_empty() {
        lines.push(format!("\n**Packages involved:** {}", packages.join(", ")));
    }
    if !diagnostics.is_empty() {
        lines.push(format!("\n## Conflict Details\n\n```\n{diagnostics}\n```"));
    }
    lines.push("\n**Action required:** Please resolve the conflicts and push the changes.".into());
    lines.join("\n")
}

pub fn conflict_resolved_comment(commit: &str) -> String {
    format!(
        "This conflict has been resolved. The sync has successfully moved past commit {}.",
        trailer::short(commit)
    )
}

pub fn local_changes_title(package: &str) -> String {
    format!("{LOCAL_CHANGES_TITLE_PREFIX} {package}")
}

pub fn local_changes_body(package: &str, last_sync: &str) -> String {
    [
        format!("The package `{package}` has local changes."),
        format!(
            "\n**These changes have not caused conflicts** (last sync: {}).",
            trailer::short(last_sync)
        ),
        "\nHowever, they should be pushed upstream to avoid future conflicts.".to_string(),
        "\n**Action required:** Please push these changes upstream.".to_string(),
    ]
    .join("\n")
}

/// Message of the empty onboarding marker commit.
pub fn onboard_commit_message(trailer_key: &str, baseline: &str) -> String {
    format!(
        "{ONBOARD_TITLE}\n\nThis establishes the initial upstream pointer.\n\n{}\n",
        trailer::format(trailer_key, baseline)
    )
}

pub fn onboard_pr_body(baseline: &str) -> String {
    format!(
        "This PR establishes the initial upstream pointer for automated syncing.\n\n\
         Upstream baseline: `{baseline}`\n\n\
         Merge this PR to enable automated upstream syncing.\n"
    )
}

pub fn split_success_comment(first: usize, second: usize, new_pr: Option<u64>) -> String {
    let mut msg = format!("Split complete. This PR now contains {first} commits.");
    if second > 0 {
        match new_pr {
            Some(n) => msg.push_str(&format!(" The remaining {second} commits moved to #{n}.")),
            None => msg.push_str(&format!(" The remaining {second} commits moved to a new PR.")),
        }
    }
    msg
}

pub fn rebase_success_comment(branch: &str, base: &str) -> String {
    format!("Rebased `{branch}` onto the latest `{base}`.")
}

pub fn command_failed_comment(error: &str) -> String {
    format!("Failed to execute command\n\n```\n{error}\n```")
}

pub fn unknown_command_comment(command: &str, command_prefix: &str) -> String {
    format!(
        "Unknown command `{command}`. Supported commands:\n\
         * `{command_prefix} split <shaA>-<shaB>`\n\
         * `{command_prefix} rebase`"
    )
}
