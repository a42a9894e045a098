//! Shared fixtures for the end-to-end tests.
//!
//! Every fixture builds three real git repositories in a temp dir:
//! - `upstream/`: a plain repository playing the upstream project
//! - `origin.git`: a bare repository the downstream pushes to
//! - `work/`: the downstream working clone the bot drives
//!
//! No network I/O. Tests skip when `git` is not on PATH.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;

use async_trait::async_trait;
use tempfile::TempDir;

use forkline_core::config::AppConfig;
use forkline_core::errors::HostError;
use forkline_core::git::{CommitIdentity, GitRepo};
use forkline_core::hosting::{CodeHost, Issue, PullRequest};

pub const APT: &str = "cookbooks/fb_apt/recipes/default.rb";
pub const SYSCTL: &str = "cookbooks/fb_sysctl/recipes/default.rb";

// ===========================================================================
// Git helpers
// ===========================================================================

pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Run git in `dir` with a fixed identity; panics on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(dir)
        .args(["-c", "user.name=Test User", "-c", "user.email=test@example.com"])
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

pub fn init_repo(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    git(dir, &["init", "-q"]);
    git(dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
}

pub fn write_files(dir: &Path, files: &[(&str, &str)]) {
    for (rel, content) in files {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }
}

/// Write `files`, commit everything and return the new HEAD.
pub fn commit_files(dir: &Path, files: &[(&str, &str)], message: &str) -> String {
    write_files(dir, files);
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "-q", "-m", message]);
    git(dir, &["rev-parse", "HEAD"])
}

/// Commit messages on `range`, oldest first.
pub fn messages(dir: &Path, range: &str) -> Vec<String> {
    let out = git(dir, &["log", "--reverse", "--format=%B%x00", range]);
    out.split('\0')
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .collect()
}

// ===========================================================================
// Fixture
// ===========================================================================

pub struct Fixture {
    pub tmp: TempDir,
    pub upstream: PathBuf,
    pub origin: PathBuf,
    pub work: PathBuf,
    /// First upstream commit; the downstream starts as a copy of it.
    pub base_commit: String,
}

impl Fixture {
    /// Upstream with `fb_apt`, `fb_sysctl` and a root README; downstream
    /// holds identical copies but no sync trailer yet.
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let upstream = tmp.path().join("upstream");
        let origin = tmp.path().join("origin.git");
        let work = tmp.path().join("work");

        let initial: &[(&str, &str)] = &[
            (APT, "package 'apt'\n"),
            (SYSCTL, "sysctl 'vm.swappiness'\n"),
            ("README.md", "chef cookbooks\n"),
        ];

        init_repo(&upstream);
        let base_commit = commit_files(&upstream, initial, "Initial cookbooks");

        std::fs::create_dir_all(&origin).unwrap();
        git(&origin, &["init", "-q", "--bare"]);
        git(&origin, &["symbolic-ref", "HEAD", "refs/heads/main"]);

        init_repo(&work);
        commit_files(&work, initial, "Import cookbooks");
        git(&work, &["remote", "add", "origin", origin.to_str().unwrap()]);
        git(&work, &["push", "-q", "origin", "main"]);

        Self {
            tmp,
            upstream,
            origin,
            work,
            base_commit,
        }
    }

    /// Like [`Fixture::new`] with the onboarding marker already merged.
    pub fn onboarded() -> Self {
        let fixture = Self::new();
        let message = format!(
            "Initialize upstream sync baseline\n\nUpstream-Commit: {}",
            fixture.base_commit
        );
        git(&fixture.work, &["commit", "-q", "--allow-empty", "-m", &message]);
        git(&fixture.work, &["push", "-q", "origin", "main"]);
        fixture
    }

    pub fn upstream_commit(&self, files: &[(&str, &str)], message: &str) -> String {
        commit_files(&self.upstream, files, message)
    }

    pub fn work_commit(&self, files: &[(&str, &str)], message: &str) -> String {
        let sha = commit_files(&self.work, files, message);
        git(&self.work, &["push", "-q", "origin", "main"]);
        sha
    }

    /// Fast-forward downstream `main` to `branch`, as a merged PR would.
    pub fn merge_branch(&self, branch: &str) {
        git(&self.work, &["checkout", "-q", "main"]);
        git(&self.work, &["merge", "-q", "--ff-only", branch]);
        git(&self.work, &["push", "-q", "origin", "main"]);
    }

    /// Squash-merge `branch` into `main` with `message`, as GitHub does.
    pub fn squash_merge(&self, branch: &str, message: &str) {
        git(&self.work, &["checkout", "-q", "main"]);
        git(&self.work, &["merge", "-q", "--squash", branch]);
        git(&self.work, &["commit", "-q", "-m", message]);
        git(&self.work, &["push", "-q", "origin", "main"]);
    }

    pub fn config(&self) -> AppConfig {
        let mut config = AppConfig::default();
        config.repository.path = self.work.clone();
        config.upstream.repo_url = self.upstream.to_str().unwrap().to_string();
        config.upstream.ignore = Vec::new();
        config.github.repo = "example/chef".into();
        config
    }

    pub fn open(&self, config: &AppConfig) -> GitRepo {
        GitRepo::open(&self.work, CommitIdentity::from_config(&config.repository)).unwrap()
    }

    /// Whether `branch` exists in the bare origin.
    pub fn origin_has_branch(&self, branch: &str) -> bool {
        Command::new("git")
            .current_dir(&self.origin)
            .args(["rev-parse", "--verify", "-q", &format!("refs/heads/{branch}")])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

// ===========================================================================
// Recording host
// ===========================================================================

#[derive(Default)]
pub struct HostState {
    pub labels: Vec<String>,
    pub prs: Vec<PullRequest>,
    pub issues: Vec<(Issue, bool)>,
    pub comments: Vec<(u64, String)>,
    next_number: u64,
}

impl HostState {
    fn next(&mut self) -> u64 {
        self.next_number += 1;
        self.next_number
    }
}

/// In-memory [`CodeHost`] that records every call. PRs and issues share one
/// number sequence, as on GitHub.
pub struct RecordingHost {
    pub state: Mutex<HostState>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HostState {
                labels: vec!["line-cook".into(), "line-cook-pr-split".into()],
                ..Default::default()
            }),
        }
    }

    pub fn prs(&self) -> Vec<PullRequest> {
        self.state.lock().unwrap().prs.clone()
    }

    pub fn pr(&self, number: u64) -> PullRequest {
        self.prs()
            .into_iter()
            .find(|p| p.number == number)
            .expect("no such PR")
    }

    /// Issues that are still open.
    pub fn open_issues(&self) -> Vec<Issue> {
        self.state
            .lock()
            .unwrap()
            .issues
            .iter()
            .filter(|(_, open)| *open)
            .map(|(i, _)| i.clone())
            .collect()
    }

    pub fn closed_issues(&self) -> Vec<Issue> {
        self.state
            .lock()
            .unwrap()
            .issues
            .iter()
            .filter(|(_, open)| !*open)
            .map(|(i, _)| i.clone())
            .collect()
    }

    pub fn comments(&self) -> Vec<(u64, String)> {
        self.state.lock().unwrap().comments.clone()
    }

    /// Seed an open issue directly.
    pub fn seed_issue(&self, title: &str, labels: &[&str]) -> u64 {
        let mut state = self.state.lock().unwrap();
        let number = state.next();
        state.issues.push((
            Issue {
                number,
                title: title.into(),
                body: String::new(),
                labels: labels.iter().map(|l| l.to_string()).collect(),
            },
            true,
        ));
        number
    }
}

#[async_trait]
impl CodeHost for RecordingHost {
    async fn list_labels(&self) -> Result<Vec<String>, HostError> {
        Ok(self.state.lock().unwrap().labels.clone())
    }

    async fn list_open_pull_requests(&self, base: &str) -> Result<Vec<PullRequest>, HostError> {
        Ok(self
            .prs()
            .into_iter()
            .filter(|p| p.base_ref == base)
            .collect())
    }

    async fn get_pull_request(&self, number: u64) -> Result<PullRequest, HostError> {
        self.prs()
            .into_iter()
            .find(|p| p.number == number)
            .ok_or(HostError::ApiError {
                status: 404,
                body: "Not Found".into(),
            })
    }

    async fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<PullRequest, HostError> {
        let mut state = self.state.lock().unwrap();
        let pr = PullRequest {
            number: state.next(),
            title: title.into(),
            body: body.into(),
            head_ref: head.into(),
            base_ref: base.into(),
            labels: Vec::new(),
        };
        state.prs.push(pr.clone());
        Ok(pr)
    }

    async fn update_pull_request(
        &self,
        number: u64,
        title: Option<&str>,
        body: Option<&str>,
    ) -> Result<(), HostError> {
        let mut state = self.state.lock().unwrap();
        if let Some(pr) = state.prs.iter_mut().find(|p| p.number == number) {
            if let Some(title) = title {
                pr.title = title.into();
            }
            if let Some(body) = body {
                pr.body = body.into();
            }
        }
        Ok(())
    }

    async fn add_labels(&self, number: u64, labels: &[&str]) -> Result<(), HostError> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let target = match state.prs.iter_mut().find(|p| p.number == number) {
            Some(pr) => &mut pr.labels,
            None => match state.issues.iter_mut().find(|(i, _)| i.number == number) {
                Some((issue, _)) => &mut issue.labels,
                None => return Ok(()),
            },
        };
        for label in labels {
            if !target.iter().any(|l| l == label) {
                target.push(label.to_string());
            }
        }
        Ok(())
    }

    async fn find_open_issues(
        &self,
        label: &str,
        title_contains: &str,
    ) -> Result<Vec<Issue>, HostError> {
        Ok(self
            .open_issues()
            .into_iter()
            .filter(|i| i.labels.iter().any(|l| l == label) && i.title.contains(title_contains))
            .collect())
    }

    async fn create_issue(
        &self,
        title: &str,
        body: &str,
        labels: &[&str],
    ) -> Result<Issue, HostError> {
        let mut state = self.state.lock().unwrap();
        let issue = Issue {
            number: state.next(),
            title: title.into(),
            body: body.into(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
        };
        state.issues.push((issue.clone(), true));
        Ok(issue)
    }

    async fn update_issue_body(&self, number: u64, body: &str) -> Result<(), HostError> {
        let mut state = self.state.lock().unwrap();
        if let Some((issue, _)) = state.issues.iter_mut().find(|(i, _)| i.number == number) {
            issue.body = body.into();
        }
        Ok(())
    }

    async fn close_issue(&self, number: u64) -> Result<(), HostError> {
        let mut state = self.state.lock().unwrap();
        if let Some((_, open)) = state.issues.iter_mut().find(|(i, _)| i.number == number) {
            *open = false;
        }
        Ok(())
    }

    async fn comment(&self, number: u64, body: &str) -> Result<(), HostError> {
        self.state
            .lock()
            .unwrap()
            .comments
            .push((number, body.to_string()));
        Ok(())
    }
}
