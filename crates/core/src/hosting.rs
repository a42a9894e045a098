//! Code-hosting seam.
//!
//! The sync engine, split engine and command channel talk to the hosting
//! platform only through [`CodeHost`]. The GitHub REST implementation lives in
//! [`crate::git::github`]; [`DryRunHost`] wraps any host and turns every
//! mutation into a log line.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::HostError;

/// An open (or recently closed) pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub head_ref: String,
    pub base_ref: String,
    pub labels: Vec<String>,
}

impl PullRequest {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// An issue. Pull requests are never returned as issues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

/// Operations the bot needs from the hosting platform.
#[async_trait]
pub trait CodeHost: Send + Sync {
    /// Names of every label defined on the repository.
    async fn list_labels(&self) -> Result<Vec<String>, HostError>;

    /// Open pull requests targeting `base`.
    async fn list_open_pull_requests(&self, base: &str) -> Result<Vec<PullRequest>, HostError>;

    async fn get_pull_request(&self, number: u64) -> Result<PullRequest, HostError>;

    async fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<PullRequest, HostError>;

    /// Replace the title and/or body of a pull request.
    async fn update_pull_request(
        &self,
        number: u64,
        title: Option<&str>,
        body: Option<&str>,
    ) -> Result<(), HostError>;

    /// Add labels to a pull request or issue.
    async fn add_labels(&self, number: u64, labels: &[&str]) -> Result<(), HostError>;

    /// Open issues carrying `label` whose title contains `title_contains`.
    async fn find_open_issues(
        &self,
        label: &str,
        title_contains: &str,
    ) -> Result<Vec<Issue>, HostError>;

    async fn create_issue(
        &self,
        title: &str,
        body: &str,
        labels: &[&str],
    ) -> Result<Issue, HostError>;

    async fn update_issue_body(&self, number: u64, body: &str) -> Result<(), HostError>;

    async fn close_issue(&self, number: u64) -> Result<(), HostError>;

    /// Comment on a pull request or issue.
    async fn comment(&self, number: u64, body: &str) -> Result<(), HostError>;
}

/// Forwards reads to the wrapped host and logs every write instead of
/// performing it.
pub struct DryRunHost<H> {
    inner: H,
}

impl<H: CodeHost> DryRunHost<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<H: CodeHost> CodeHost for DryRunHost<H> {
    async fn list_labels(&self) -> Result<Vec<String>, HostError> {
        self.inner.list_labels().await
    }

    async fn list_open_pull_requests(&self, base: &str) -> Result<Vec<PullRequest>, HostError> {
        self.inner.list_open_pull_requests(base).await
    }

    async fn get_pull_request(&self, number: u64) -> Result<PullRequest, HostError> {
        self.inner.get_pull_request(number).await
    }

    async fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<PullRequest, HostError> {
        info!(title, head, base, "[dry-run] would create pull request");
        Ok(PullRequest {
            number: 0,
            title: title.to_string(),
            body: body.to_string(),
            head_ref: head.to_string(),
            base_ref: base.to_string(),
            labels: Vec::new(),
        })
    }

    async fn update_pull_request(
        &self,
        number: u64,
        title: Option<&str>,
        _body: Option<&str>,
    ) -> Result<(), HostError> {
        info!(number, ?title, "[dry-run] would update pull request");
        Ok(())
    }

    async fn add_labels(&self, number: u64, labels: &[&str]) -> Result<(), HostError> {
        info!(number, ?labels, "[dry-run] would add labels");
        Ok(())
    }

    async fn find_open_issues(
        &self,
        label: &str,
        title_contains: &str,
    ) -> Result<Vec<Issue>, HostError> {
        self.inner.find_open_issues(label, title_contains).await
    }

    async fn create_issue(
        &self,
        title: &str,
        body: &str,
        labels: &[&str],
    ) -> Result<Issue, HostError> {
        info!(title, "[dry-run] would create issue");
        Ok(Issue {
            number: 0,
            title: title.to_string(),
            body: body.to_string(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
        })
    }

    async fn update_issue_body(&self, number: u64, _body: &str) -> Result<(), HostError> {
        info!(number, "[dry-run] would update issue");
        Ok(())
    }

    async fn close_issue(&self, number: u64) -> Result<(), HostError> {
        info!(number, "[dry-run] would close issue");
        Ok(())
    }

    async fn comment(&self, number: u64, _body: &str) -> Result<(), HostError> {
        info!(number, "[dry-run] would comment");
        Ok(())
    }
}
