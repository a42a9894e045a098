//! Forkline core library.
//!
//! This crate provides the components of a multi-upstream fork sync bot:
//! configuration and the upstream registry, the provenance trailer grammar,
//! pointer resolution, commit selection, the cherry-pick and filter engine,
//! conflict classification, the sync orchestrator, PR splitting, rebasing,
//! and the command channel.

pub mod apply;
pub mod commands;
pub mod config;
pub mod conflict;
pub mod context;
pub mod errors;
pub mod git;
pub mod hosting;
pub mod packages;
pub mod pointer;
pub mod rebase;
pub mod report;
pub mod selector;
pub mod split;
pub mod sync_engine;
pub mod trailer;
pub mod upstream;

// Re-exports for convenience.
pub use config::AppConfig;
pub use context::{BotContext, RunOptions};
pub use hosting::{CodeHost, DryRunHost};
pub use sync_engine::SyncEngine;
pub use upstream::UpstreamRegistry;
