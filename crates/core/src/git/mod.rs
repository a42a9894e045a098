//! Local repository adapter and the GitHub REST client.

pub mod client;
pub mod github;

pub use client::{CommitIdentity, GitRepo, LogEntry, PickOutcome, PushMode, StatusEntry};
pub use github::GitHubClient;
