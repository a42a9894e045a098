//! Forkline command-line entry point.
//!
//! Runs a sync over every configured upstream, executes PR commands, reacts
//! to hosting-platform events, and inspects or validates configuration.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use forkline_core::commands::{self, CommandDispatcher, CommandOutcome, EventAction};
use forkline_core::config::AppConfig;
use forkline_core::git::{CommitIdentity, GitHubClient, GitRepo};
use forkline_core::pointer;
use forkline_core::sync_engine::{SyncReport, UpstreamOutcome};
use forkline_core::trailer;
use forkline_core::{BotContext, CodeHost, DryRunHost, RunOptions, SyncEngine, UpstreamRegistry};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Keep a fork's package directories in sync with one or more upstreams.
#[derive(Parser, Debug)]
#[command(name = "forkline", version, about = "Multi-upstream fork sync bot")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "forkline.toml")]
    config: PathBuf,

    /// Do not push branches or create PRs, issues or comments.
    #[arg(short = 'n', long, global = true)]
    dry_run: bool,

    /// Ignore the current upstream pointer and onboard again.
    #[arg(long, global = true)]
    force_bootstrapping: bool,

    /// Log level (trace, debug, info, warn, error). Overrides the config.
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sync every upstream in registration order.
    Sync,

    /// Run a bot command against a PR, as if it were commented.
    Command {
        /// PR number to operate on.
        #[arg(long)]
        pr: u64,

        /// Command and arguments, e.g. `split abc1234-def5678` or `rebase`.
        #[arg(required = true, num_args = 1..)]
        command: Vec<String>,
    },

    /// Handle a GitHub Actions event.
    Event {
        #[arg(long, env = "GITHUB_EVENT_NAME")]
        event_name: Option<String>,

        #[arg(long, env = "GITHUB_EVENT_PATH")]
        event_path: Option<PathBuf>,
    },

    /// Show each upstream's resolved sync pointer.
    Status,

    /// Validate the configuration file.
    Validate,

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./forkline.toml")]
        output: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Init { ref output } => {
            cmd_init(output)?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Validate => {
            cmd_validate(&cli.config)?;
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    let config = AppConfig::load_and_resolve(&cli.config).context("failed to load configuration")?;
    init_tracing(cli.log_level.as_deref(), &config.bot.log_level);
    info!(config = %cli.config.display(), "starting forkline");

    let registry = UpstreamRegistry::from_config(&config).context("invalid upstream configuration")?;
    let git = GitRepo::open(
        &config.repository.path,
        CommitIdentity::from_config(&config.repository),
    )
    .context("failed to open working clone")?;

    if let Commands::Status = cli.command {
        cmd_status(&config, &registry, &git)?;
        return Ok(ExitCode::SUCCESS);
    }

    let host = build_host(&config, cli.dry_run)?;
    let options = RunOptions {
        dry_run: cli.dry_run,
        force_bootstrap: cli.force_bootstrapping,
    };
    let ctx = BotContext::new(&config, &registry, &git, host.as_ref(), options);
    ctx.initialize_remotes()
        .context("failed to initialize upstream remotes")?;
    ctx.check_labels().await.context("label check failed")?;

    let code = match cli.command {
        Commands::Sync => cmd_sync(&ctx).await?,
        Commands::Command { pr, command } => {
            let body = format!("{} {}", config.bot.command_prefix, command.join(" "));
            info!(pr, body = %body, "running command test");
            cmd_comment(&ctx, pr, &body).await?
        }
        Commands::Event {
            event_name,
            event_path,
        } => cmd_event(&ctx, event_name.as_deref(), event_path.as_deref()).await?,
        Commands::Status | Commands::Validate | Commands::Init { .. } => ExitCode::SUCCESS,
    };

    info!("forkline completed");
    Ok(code)
}

/// `--log-level`, else `RUST_LOG`, else the configured level.
fn init_tracing(flag: Option<&str>, configured: &str) {
    let filter = match flag {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(configured)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn missing_token_message(token_env: &str, dry_run: bool) -> String {
    let mut msg = format!("API token not set; export {token_env} before running");
    if dry_run {
        msg.push_str(" (dry runs still read PRs, issues and labels through the API)");
    }
    msg
}

fn build_host(config: &AppConfig, dry_run: bool) -> Result<Box<dyn CodeHost>> {
    let token = config
        .github
        .token
        .clone()
        .with_context(|| missing_token_message(&config.github.token_env, dry_run))?;
    let client = GitHubClient::new(&config.github.api_url, &config.github.repo, token)
        .context("failed to build GitHub client")?;
    if dry_run {
        info!("dry-run mode: no pushes or hosting changes will be made");
        Ok(Box::new(DryRunHost::new(client)))
    } else {
        Ok(Box::new(client))
    }
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

async fn cmd_sync(ctx: &BotContext<'_>) -> Result<ExitCode> {
    let report = SyncEngine::new(ctx)
        .sync_all()
        .await
        .context("sync aborted")?;
    print_report(&report);
    if report.has_failures() {
        warn!("one or more upstreams failed to sync");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_comment(ctx: &BotContext<'_>, pr: u64, body: &str) -> Result<ExitCode> {
    let outcome = CommandDispatcher::new(ctx)
        .handle_comment(pr, body)
        .await
        .context("failed to report command result")?;
    match outcome {
        CommandOutcome::NoCommand => info!(pr, "no command found"),
        CommandOutcome::Succeeded(name) => info!(pr, command = %name, "command succeeded"),
        CommandOutcome::Unknown(name) => warn!(pr, command = %name, "unknown command"),
        CommandOutcome::Failed { command, error } => {
            warn!(pr, command = %command, error = %error, "command failed");
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_event(
    ctx: &BotContext<'_>,
    name: Option<&str>,
    path: Option<&Path>,
) -> Result<ExitCode> {
    let action = match (name, path) {
        (Some(name), Some(path)) => {
            commands::classify_event_file(name, path, ctx.bot_label())
                .context("failed to read event payload")?
        }
        (Some(name), None) if name == "issue_comment" => {
            anyhow::bail!("issue_comment event requires GITHUB_EVENT_PATH")
        }
        _ => EventAction::Sync,
    };

    match action {
        EventAction::Command { pr, body } => {
            info!(pr, "running in command mode");
            cmd_comment(ctx, pr, &body).await
        }
        EventAction::Sync => {
            info!("running in sync mode");
            cmd_sync(ctx).await
        }
        EventAction::Ignore => {
            info!("nothing to do for this event");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_report(report: &SyncReport) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Upstream", "Outcome", "Commits", "PR", "Notes"]);

    for (prefix, outcome) in &report.upstreams {
        let row = match outcome {
            UpstreamOutcome::Onboarding { baseline, pr } => vec![
                Cell::new("onboarding").fg(Color::Yellow),
                Cell::new("-"),
                Cell::new(pr_cell(*pr)),
                Cell::new(format!("baseline {}", trailer::short(baseline))),
            ],
            UpstreamOutcome::UpToDate { pointer } => vec![
                Cell::new("up to date").fg(Color::Green),
                Cell::new(0),
                Cell::new("-"),
                Cell::new(format!("pointer {}", trailer::short(pointer))),
            ],
            UpstreamOutcome::Synced {
                applied,
                pr,
                conflict,
                diverged,
            } => {
                let mut notes = Vec::new();
                if let Some(c) = conflict {
                    notes.push(format!("blocked at {}", trailer::short(c)));
                }
                if !diverged.is_empty() {
                    notes.push(format!("local changes: {}", diverged.join(", ")));
                }
                let status = if conflict.is_some() {
                    Cell::new("conflict").fg(Color::Red)
                } else {
                    Cell::new("synced").fg(Color::Green)
                };
                vec![
                    status,
                    Cell::new(applied.len()),
                    Cell::new(pr_cell(*pr)),
                    Cell::new(notes.join("; ")),
                ]
            }
            UpstreamOutcome::Failed { error } => vec![
                Cell::new("failed").fg(Color::Red),
                Cell::new("-"),
                Cell::new("-"),
                Cell::new(error),
            ],
        };
        let mut cells = vec![Cell::new(prefix)];
        cells.extend(row);
        table.add_row(cells);
    }

    println!("{table}");
}

fn pr_cell(pr: Option<u64>) -> String {
    pr.map(|n| format!("#{n}")).unwrap_or_else(|| "-".into())
}

fn cmd_status(config: &AppConfig, registry: &UpstreamRegistry, git: &GitRepo) -> Result<()> {
    let base = &config.repository.base_branch;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Prefix", "Remote", "Branch", "Trailer key", "Pointer"]);

    for upstream in registry.iter() {
        let pointer = pointer::resolve_pointer(git, base, upstream)
            .with_context(|| format!("failed to resolve pointer for {}", upstream.prefix))?;
        let pointer_cell = match pointer {
            Some(sha) => Cell::new(trailer::short(&sha)),
            None => Cell::new("onboarding").fg(Color::Yellow),
        };
        table.add_row(vec![
            Cell::new(&upstream.prefix),
            Cell::new(&upstream.remote_name),
            Cell::new(&upstream.tracked_branch),
            Cell::new(&upstream.trailer_key),
            pointer_cell,
        ]);
    }

    println!();
    println!("Sync status (base branch {base})");
    println!();
    println!("{table}");
    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config.resolve_env_vars();
    println!("  [OK] Environment overrides applied");

    match config.validate() {
        Ok(()) => println!("  [OK] All required fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }
    let registry = UpstreamRegistry::from_config(&config)?;

    println!();
    println!("Configuration summary:");
    println!("  Working clone : {}", config.repository.path.display());
    println!("  Base branch   : {}", config.repository.base_branch);
    println!("  Branch prefix : {}", config.repository.pr_branch_prefix);
    println!("  Target remote : {}", config.repository.target_remote);
    println!("  GitHub repo   : {}", config.github.repo);
    println!(
        "  API token     : {}",
        if config.github.token.is_some() {
            "set"
        } else {
            "NOT SET"
        }
    );
    for upstream in registry.iter() {
        println!(
            "  Upstream {:<5}: {} ({})",
            upstream.prefix, upstream.repo_url, upstream.tracked_branch
        );
    }
    println!();
    println!("Configuration is valid.");
    Ok(())
}

const DEFAULT_CONFIG: &str = r##"# Forkline configuration

[bot]
label = "line-cook"
split_label = "line-cook-pr-split"
command_prefix = "#linecook"
log_level = "info"

[repository]
path = "."
base_branch = "main"
pr_branch_prefix = "line-cook"
target_remote = "origin"
packages_dir = "cookbooks"

[github]
api_url = "https://api.github.com"
repo = "owner/repo"
token_env = "GITHUB_TOKEN"

[upstream]
prefix = "fb_"
repo_url = "https://www.github.com/facebook/chef-cookbooks.git"
branch = "main"
ignore = ["fb_init", "fb_init_sample"]

# [[universe]]
# name = "pagerduty"
# prefix = "pd_"
# repo_url = "https://github.com/example/pd-cookbooks.git"
# branch = "main"
"##;

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }
    std::fs::write(output, DEFAULT_CONFIG).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the config file with your repository and upstream details");
    println!("  2. Export the token variable (GITHUB_TOKEN by default)");
    println!("  3. Validate with: forkline validate --config {}", output.display());
    println!("  4. Run a sync: forkline sync --dry-run --config {}", output.display());
    Ok(())
}
