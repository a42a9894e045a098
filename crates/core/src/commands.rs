//! Command channel and event dispatch.
//!
//! Comments of the form `<prefix> <command> [args]` on a sync PR drive the
//! split engine and the rebase handler. Failures are reported back on the PR
//! as a comment and never abort the process.

use std::path::Path;

use regex_lite::Regex;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::context::BotContext;
use crate::errors::{CommandError, HostError};
use crate::rebase::RebaseHandler;
use crate::report;
use crate::split::SplitEngine;

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// A command found in a comment body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Lowercased command name.
    pub name: String,
    pub args: String,
}

/// Find `<prefix> <name> [args]` anywhere in `body`, case-insensitively.
pub fn parse_command(body: &str, prefix: &str) -> Option<ParsedCommand> {
    let source = format!(
        r"(?i){}\s+(\w+)(?:[ \t]+([^\r\n]+))?",
        regex_lite::escape(prefix)
    );
    let re = match Regex::new(&source) {
        Ok(re) => re,
        Err(e) => {
            warn!(prefix, error = %e, "invalid command prefix pattern");
            return None;
        }
    };
    let caps = re.captures(body)?;
    let parsed = ParsedCommand {
        name: caps[1].to_lowercase(),
        args: caps
            .get(2)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default(),
    };
    debug!(command = %parsed.name, args = %parsed.args, "parsed bot command");
    Some(parsed)
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct EventLabel {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct EventItem {
    number: u64,
    #[serde(default)]
    labels: Vec<EventLabel>,
    /// Present on issues that are really pull requests.
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct EventComment {
    #[serde(default)]
    body: String,
}

#[derive(Debug, Default, Deserialize)]
struct EventPayload {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    issue: Option<EventItem>,
    #[serde(default)]
    pull_request: Option<EventItem>,
    #[serde(default)]
    comment: Option<EventComment>,
}

/// What a hosting-platform event asks the bot to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventAction {
    /// Run the command channel on a PR comment.
    Command { pr: u64, body: String },
    /// Run a full sync.
    Sync,
    /// Nothing to do.
    Ignore,
}

/// Decide what to do for event `name` with JSON `payload`.
pub fn classify_event(
    name: &str,
    payload: &str,
    bot_label: &str,
) -> Result<EventAction, serde_json::Error> {
    match name {
        "issue_comment" => {
            let event: EventPayload = serde_json::from_str(payload)?;
            match (event.issue, event.comment) {
                (Some(issue), Some(comment)) if issue.pull_request.is_some() => {
                    Ok(EventAction::Command {
                        pr: issue.number,
                        body: comment.body,
                    })
                }
                _ => {
                    info!("not a PR comment event, skipping");
                    Ok(EventAction::Ignore)
                }
            }
        }
        "issues" | "pull_request_target" => {
            let event: EventPayload = serde_json::from_str(payload)?;
            if event.action.as_deref() != Some("closed") {
                debug!(event = name, action = ?event.action, "ignoring event action");
                return Ok(EventAction::Ignore);
            }
            let item = event.pull_request.or(event.issue).unwrap_or_default();
            if item.labels.iter().any(|l| l.name == bot_label) {
                info!(number = item.number, "bot item closed, running sync");
                Ok(EventAction::Sync)
            } else {
                info!("closed item is not ours, ignoring");
                Ok(EventAction::Ignore)
            }
        }
        _ => Ok(EventAction::Sync),
    }
}

/// Read and classify the event file at `path`.
pub fn classify_event_file(
    name: &str,
    path: &Path,
    bot_label: &str,
) -> Result<EventAction, CommandError> {
    let payload = std::fs::read_to_string(path)
        .map_err(|e| CommandError::EventPayload(format!("{}: {e}", path.display())))?;
    classify_event(name, &payload, bot_label)
        .map_err(|e| CommandError::EventPayload(format!("{}: {e}", path.display())))
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// How a comment was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// No command in the comment.
    NoCommand,
    Succeeded(String),
    /// Unknown command; usage was posted.
    Unknown(String),
    /// The command failed; the error was posted.
    Failed { command: String, error: String },
}

pub struct CommandDispatcher<'a> {
    ctx: &'a BotContext<'a>,
}

impl<'a> CommandDispatcher<'a> {
    pub fn new(ctx: &'a BotContext<'a>) -> Self {
        Self { ctx }
    }

    /// Parse `body` and run the command it names against PR `pr`. Only a
    /// failure to post the feedback comment is returned as an error.
    pub async fn handle_comment(&self, pr: u64, body: &str) -> Result<CommandOutcome, HostError> {
        let prefix = &self.ctx.config.bot.command_prefix;
        let Some(command) = parse_command(body, prefix) else {
            debug!(pr, "no bot command in comment");
            return Ok(CommandOutcome::NoCommand);
        };
        info!(pr, command = %command.name, args = %command.args, "dispatching command");

        let result = match command.name.as_str() {
            "split" => SplitEngine::new(self.ctx)
                .split(pr, &command.args)
                .await
                .map(|_| ()),
            "rebase" => RebaseHandler::new(self.ctx).rebase(pr).await,
            other => {
                warn!(command = other, "unknown command");
                self.ctx
                    .host
                    .comment(pr, &report::unknown_command_comment(other, prefix))
                    .await?;
                return Ok(CommandOutcome::Unknown(other.to_string()));
            }
        };

        match result {
            Ok(()) => Ok(CommandOutcome::Succeeded(command.name)),
            Err(e) => {
                error!(pr, command = %command.name, error = %e, "command failed");
                // Leave the clone usable for the next invocation.
                if let Err(restore) = self.ctx.git.restore_clean_state().await {
                    error!(error = %restore, "could not restore working tree");
                }
                if let Err(checkout) = self.ctx.git.checkout(self.ctx.base_branch()).await {
                    warn!(error = %checkout, "could not return to base branch");
                }
                self.ctx
                    .host
                    .comment(pr, &report::command_failed_comment(&e.to_string()))
                    .await?;
                Ok(CommandOutcome::Failed {
                    command: command.name,
                    error: e.to_string(),
                })
            }
        }
    }
}
