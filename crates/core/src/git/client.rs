//! Local repository adapter.
//!
//! Reads (history walks, trees, blobs, ancestry) go through `git2`. Anything
//! that mutates the working tree or talks to a remote shells out to the `git`
//! binary, since cherry-pick with strategy options, rebase and push with
//! lease are not exposed by libgit2 in a usable form.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use git2::{DiffOptions, ErrorCode, ObjectType, Oid, Repository, Sort};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::config::RepositoryConfig;
use crate::errors::GitError;

/// Porcelain status codes that mean "unmerged".
pub const CONFLICT_CODES: [&str; 7] = ["DD", "AU", "UD", "UA", "DU", "AA", "UU"];

/// Identity used as committer on every commit the bot creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
}

impl CommitIdentity {
    pub fn from_config(config: &RepositoryConfig) -> Self {
        Self {
            name: config.author_name.clone(),
            email: config.author_email.clone(),
        }
    }
}

/// One line of `git status --porcelain=v1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub code: String,
    pub path: String,
}

impl StatusEntry {
    pub fn is_conflicted(&self) -> bool {
        CONFLICT_CODES.contains(&self.code.as_str())
    }
}

/// Result of a non-committing cherry-pick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickOutcome {
    Clean,
    Conflicted { stderr: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushMode {
    Force,
    ForceWithLease,
}

/// A commit id and its full message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub sha: String,
    pub message: String,
}

struct GitOutput {
    success: bool,
    exit_code: i32,
    stdout: String,
    stderr: String,
}

/// Handle on the local working clone.
///
/// Only one logical operation uses the handle at a time; every mutating
/// method leaves the working tree clean or reports why it could not.
pub struct GitRepo {
    repo: Repository,
    workdir: PathBuf,
    identity: CommitIdentity,
}

impl GitRepo {
    /// Open an existing clone at `path`.
    pub fn open<P: AsRef<Path>>(path: P, identity: CommitIdentity) -> Result<Self, GitError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening git repository");
        let repo = Repository::open(path)
            .map_err(|_| GitError::RepositoryNotFound(path.display().to_string()))?;
        let workdir = repo
            .workdir()
            .map(Path::to_path_buf)
            .ok_or_else(|| GitError::RepositoryNotFound(path.display().to_string()))?;
        Ok(Self {
            repo,
            workdir,
            identity,
        })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    // -----------------------------------------------------------------------
    // Reads (git2)
    // -----------------------------------------------------------------------

    fn commit_of(&self, rev: &str) -> Result<git2::Commit<'_>, GitError> {
        let object = self
            .repo
            .revparse_single(rev)
            .map_err(|_| GitError::RefNotFound(rev.to_string()))?;
        Ok(object.peel_to_commit()?)
    }

    /// Full SHA of `rev`.
    pub fn resolve(&self, rev: &str) -> Result<String, GitError> {
        Ok(self.commit_of(rev)?.id().to_string())
    }

    pub fn head_sha(&self) -> Result<String, GitError> {
        Ok(self.repo.head()?.peel_to_commit()?.id().to_string())
    }

    pub fn message(&self, rev: &str) -> Result<String, GitError> {
        Ok(String::from_utf8_lossy(self.commit_of(rev)?.message_bytes()).into_owned())
    }

    /// First line of the commit message.
    pub fn summary(&self, rev: &str) -> Result<String, GitError> {
        let commit = self.commit_of(rev)?;
        Ok(commit.summary().unwrap_or_default().to_string())
    }

    /// `Name <email>` of the commit author, suitable for `--author`.
    pub fn author(&self, rev: &str) -> Result<String, GitError> {
        let commit = self.commit_of(rev)?;
        let author = commit.author();
        Ok(format!(
            "{} <{}>",
            author.name().unwrap_or_default(),
            author.email().unwrap_or_default()
        ))
    }

    /// Paths changed by `rev` relative to its first parent, with rename
    /// detection off. Merge commits report nothing.
    pub fn touched_paths(&self, rev: &str) -> Result<Vec<String>, GitError> {
        let commit = self.commit_of(rev)?;
        if commit.parent_count() > 1 {
            debug!(commit = %commit.id(), "merge commit, no touched paths");
            return Ok(Vec::new());
        }
        let tree = commit.tree()?;
        let parent_tree = match commit.parent_count() {
            0 => None,
            _ => Some(commit.parent(0)?.tree()?),
        };
        let mut opts = DiffOptions::new();
        let diff = self
            .repo
            .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut opts))?;

        let mut paths = Vec::new();
        for delta in diff.deltas() {
            if let Some(path) = delta.new_file().path().or_else(|| delta.old_file().path()) {
                paths.push(path.to_string_lossy().into_owned());
            }
        }
        Ok(paths)
    }

    fn entry_at(&self, rev: &str, path: &str) -> Result<Option<git2::TreeEntry<'static>>, GitError> {
        let tree = self.commit_of(rev)?.tree()?;
        match tree.get_path(Path::new(path)) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Content of the file at `path` in `rev`, or `None` when absent.
    pub fn blob_at(&self, rev: &str, path: &str) -> Result<Option<Vec<u8>>, GitError> {
        match self.entry_at(rev, path)? {
            Some(entry) if entry.kind() == Some(ObjectType::Blob) => {
                let blob = self.repo.find_blob(entry.id())?;
                Ok(Some(blob.content().to_vec()))
            }
            _ => Ok(None),
        }
    }

    /// Object id of whatever sits at `path` in `rev`.
    pub fn tree_id_at(&self, rev: &str, path: &str) -> Result<Option<Oid>, GitError> {
        Ok(self.entry_at(rev, path)?.map(|e| e.id()))
    }

    /// Names of the directories directly under `dir` in `rev`.
    pub fn list_dirs(&self, rev: &str, dir: &str) -> Result<Vec<String>, GitError> {
        let entry = match self.entry_at(rev, dir)? {
            Some(entry) if entry.kind() == Some(ObjectType::Tree) => entry,
            _ => return Ok(Vec::new()),
        };
        let tree = self.repo.find_tree(entry.id())?;
        Ok(tree
            .iter()
            .filter(|e| e.kind() == Some(ObjectType::Tree))
            .filter_map(|e| e.name().map(str::to_string))
            .collect())
    }

    /// Whether `ancestor` is reachable from `descendant`. A commit is its own
    /// ancestor.
    pub fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool, GitError> {
        let a = self.commit_of(ancestor)?.id();
        let d = self.commit_of(descendant)?.id();
        if a == d {
            return Ok(true);
        }
        Ok(self.repo.graph_descendant_of(d, a)?)
    }

    pub fn merge_base(&self, a: &str, b: &str) -> Result<String, GitError> {
        let a = self.commit_of(a)?.id();
        let b = self.commit_of(b)?.id();
        Ok(self.repo.merge_base(a, b)?.to_string())
    }

    /// Commits reachable from `to` but not from `exclusive_from`, oldest
    /// first.
    pub fn rev_list(&self, exclusive_from: Option<&str>, to: &str) -> Result<Vec<String>, GitError> {
        let mut walk = self.repo.revwalk()?;
        walk.push(self.commit_of(to)?.id())?;
        if let Some(from) = exclusive_from {
            walk.hide(self.commit_of(from)?.id())?;
        }
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;

        let mut shas = Vec::new();
        for oid in walk {
            shas.push(oid?.to_string());
        }
        Ok(shas)
    }

    /// Walk history from `rev`, newest first, and return the first commit
    /// whose message satisfies `pred`.
    pub fn find_in_log(
        &self,
        rev: &str,
        mut pred: impl FnMut(&str) -> bool,
    ) -> Result<Option<LogEntry>, GitError> {
        let mut walk = self.repo.revwalk()?;
        walk.push(self.commit_of(rev)?.id())?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
        for oid in walk {
            let commit = self.repo.find_commit(oid?)?;
            let message = String::from_utf8_lossy(commit.message_bytes());
            if pred(&message) {
                return Ok(Some(LogEntry {
                    sha: commit.id().to_string(),
                    message: message.into_owned(),
                }));
            }
        }
        Ok(None)
    }

    pub fn remote_url(&self, name: &str) -> Result<Option<String>, GitError> {
        match self.repo.find_remote(name) {
            Ok(remote) => Ok(remote.url().map(str::to_string)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    pub fn add_remote(&self, name: &str, url: &str) -> Result<(), GitError> {
        self.repo.remote(name, url)?;
        info!(remote = name, url, "added remote");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Working tree and remotes (git CLI)
    // -----------------------------------------------------------------------

    async fn exec(&self, args: &[&str]) -> Result<GitOutput, GitError> {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.workdir)
            .arg("-c")
            .arg(format!("user.name={}", self.identity.name))
            .arg("-c")
            .arg(format!("user.email={}", self.identity.email))
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_EDITOR", "true")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(cmd = ?format!("git {}", args.join(" ")), "running git command");
        let output = cmd.output().await?;
        Ok(GitOutput {
            success: output.status.success(),
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn run(&self, args: &[&str]) -> Result<String, GitError> {
        let output = self.exec(args).await?;
        if !output.success {
            warn!(exit_code = output.exit_code, stderr = %output.stderr.trim(), "git command failed");
            return Err(GitError::CommandFailed {
                command: args.first().copied().unwrap_or_default().to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    #[instrument(skip(self))]
    pub async fn fetch(&self, remote: &str, branch: Option<&str>) -> Result<(), GitError> {
        match branch {
            Some(branch) => self.run(&["fetch", remote, branch]).await?,
            None => self.run(&["fetch", remote]).await?,
        };
        debug!(remote, "fetch completed");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn checkout(&self, branch: &str) -> Result<(), GitError> {
        self.run(&["checkout", "-q", branch]).await?;
        Ok(())
    }

    /// Create or reset `branch` to `start` and check it out.
    #[instrument(skip(self))]
    pub async fn checkout_fresh(&self, branch: &str, start: &str) -> Result<(), GitError> {
        self.run(&["checkout", "-q", "-B", branch, start]).await?;
        Ok(())
    }

    /// `git cherry-pick --no-commit -X no-renames`. Conflicts are an outcome,
    /// not an error.
    #[instrument(skip(self))]
    pub async fn cherry_pick_no_commit(&self, sha: &str) -> Result<PickOutcome, GitError> {
        let output = self
            .exec(&["cherry-pick", "--no-commit", "-X", "no-renames", sha])
            .await?;
        if output.success {
            Ok(PickOutcome::Clean)
        } else {
            Ok(PickOutcome::Conflicted {
                stderr: output.stderr,
            })
        }
    }

    /// Plain committing cherry-pick, used to replay already-resolved
    /// downstream commits.
    #[instrument(skip(self))]
    pub async fn cherry_pick(&self, sha: &str) -> Result<(), GitError> {
        if let Err(e) = self.run(&["cherry-pick", "--allow-empty", sha]).await {
            self.restore_clean_state().await?;
            return Err(e);
        }
        Ok(())
    }

    pub async fn reset_hard_and_clean(&self) -> Result<(), GitError> {
        self.run(&["reset", "-q", "--hard", "HEAD"]).await?;
        self.run(&["clean", "-fdq"]).await?;
        Ok(())
    }

    /// Abort any in-progress cherry-pick; fall back to a hard reset and clean.
    /// Failure of the fallback is fatal for the run.
    pub async fn restore_clean_state(&self) -> Result<(), GitError> {
        let abort = self.exec(&["cherry-pick", "--abort"]).await?;
        if abort.success && self.is_clean().await? {
            return Ok(());
        }
        debug!(stderr = %abort.stderr.trim(), "cherry-pick abort incomplete, resetting");
        self.reset_hard_and_clean()
            .await
            .map_err(|e| GitError::CleanupFailed(e.to_string()))
    }

    /// Status entries with rename detection off and untracked files listed
    /// individually.
    pub async fn status(&self) -> Result<Vec<StatusEntry>, GitError> {
        let out = self
            .run(&[
                "status",
                "--porcelain=v1",
                "-z",
                "--no-renames",
                "--untracked-files=all",
            ])
            .await?;
        Ok(parse_porcelain_z(&out))
    }

    pub async fn is_clean(&self) -> Result<bool, GitError> {
        Ok(self.status().await?.is_empty())
    }

    pub async fn conflicted_paths(&self) -> Result<Vec<String>, GitError> {
        Ok(self
            .status()
            .await?
            .into_iter()
            .filter(StatusEntry::is_conflicted)
            .map(|e| e.path)
            .collect())
    }

    /// Paths staged relative to HEAD.
    pub async fn staged_paths(&self) -> Result<Vec<String>, GitError> {
        let out = self
            .run(&["diff", "--cached", "--name-only", "-z", "--no-renames"])
            .await?;
        Ok(out
            .split('\0')
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub async fn unstage_all(&self) -> Result<(), GitError> {
        self.run(&["reset", "-q"]).await?;
        Ok(())
    }

    /// Stage additions, modifications and deletions of `paths`.
    pub async fn stage(&self, paths: &[String]) -> Result<(), GitError> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add", "-A", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.run(&args).await?;
        Ok(())
    }

    /// Commit the index and return the new HEAD.
    #[instrument(skip(self, message))]
    pub async fn commit(
        &self,
        message: &str,
        author: Option<&str>,
        allow_empty: bool,
    ) -> Result<String, GitError> {
        let mut args = vec!["commit", "-q", "--no-verify", "-m", message];
        if let Some(author) = author {
            args.push("--author");
            args.push(author);
        }
        if allow_empty {
            args.push("--allow-empty");
        }
        self.run(&args).await?;
        let sha = self.head_sha()?;
        debug!(sha = %sha, "created commit");
        Ok(sha)
    }

    #[instrument(skip(self))]
    pub async fn push(&self, remote: &str, branch: &str, mode: PushMode) -> Result<(), GitError> {
        let flag = match mode {
            PushMode::Force => "-f",
            PushMode::ForceWithLease => "--force-with-lease",
        };
        self.run(&["push", "-q", flag, remote, branch]).await?;
        info!(remote, branch, "pushed branch");
        Ok(())
    }

    /// Rebase the checked-out branch onto `onto`. On conflict the rebase is
    /// aborted so the tree is clean again.
    #[instrument(skip(self))]
    pub async fn rebase(&self, branch: &str, onto: &str) -> Result<(), GitError> {
        let output = self.exec(&["rebase", onto]).await?;
        if output.success {
            return Ok(());
        }
        warn!(stderr = %output.stderr.trim(), "rebase failed, aborting");
        let abort = self.exec(&["rebase", "--abort"]).await?;
        if !abort.success {
            self.reset_hard_and_clean()
                .await
                .map_err(|e| GitError::CleanupFailed(e.to_string()))?;
        }
        Err(GitError::RebaseConflict {
            branch: branch.to_string(),
            onto: onto.to_string(),
        })
    }
}

/// Parse `git status --porcelain=v1 -z --no-renames` output.
fn parse_porcelain_z(out: &str) -> Vec<StatusEntry> {
    out.split('\0')
        .filter(|record| record.len() > 3)
        .map(|record| StatusEntry {
            code: record[..2].to_string(),
            path: record[3..].to_string(),
        })
        .collect()
}
