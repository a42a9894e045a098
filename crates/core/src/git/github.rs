//! GitHub REST API client implementing [`CodeHost`].

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::errors::HostError;
use crate::hosting::{CodeHost, Issue, PullRequest};

const PER_PAGE: usize = 100;

#[derive(Debug, Deserialize)]
struct GhLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GhRef {
    #[serde(rename = "ref")]
    ref_name: String,
}

#[derive(Debug, Deserialize)]
struct GhPullRequest {
    number: u64,
    title: String,
    body: Option<String>,
    head: GhRef,
    base: GhRef,
    #[serde(default)]
    labels: Vec<GhLabel>,
}

impl From<GhPullRequest> for PullRequest {
    fn from(pr: GhPullRequest) -> Self {
        Self {
            number: pr.number,
            title: pr.title,
            body: pr.body.unwrap_or_default(),
            head_ref: pr.head.ref_name,
            base_ref: pr.base.ref_name,
            labels: pr.labels.into_iter().map(|l| l.name).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GhIssue {
    number: u64,
    title: String,
    body: Option<String>,
    #[serde(default)]
    labels: Vec<GhLabel>,
    /// Present when the "issue" is really a pull request.
    pull_request: Option<serde_json::Value>,
}

impl From<GhIssue> for Issue {
    fn from(issue: GhIssue) -> Self {
        Self {
            number: issue.number,
            title: issue.title,
            body: issue.body.unwrap_or_default(),
            labels: issue.labels.into_iter().map(|l| l.name).collect(),
        }
    }
}

/// Asynchronous GitHub REST API client bound to one repository.
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    repo: String,
    token: String,
}

impl GitHubClient {
    pub fn new(
        api_url: impl Into<String>,
        repo: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, HostError> {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("forkline/0.1"));
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;
        let repo = repo.into();
        info!(api_url = %api_url, repo = %repo, "created GitHubClient");
        Ok(Self {
            http,
            api_url,
            repo,
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}", self.api_url, self.repo, path)
    }

    /// GET every page of a list endpoint.
    async fn get_paged<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, HostError> {
        let mut items = Vec::new();
        let mut page = 1usize;
        loop {
            let page_str = page.to_string();
            let per_page = PER_PAGE.to_string();
            let resp = self
                .http
                .get(self.url(path))
                .bearer_auth(&self.token)
                .query(query)
                .query(&[("per_page", per_page.as_str()), ("page", page_str.as_str())])
                .send()
                .await?;
            let resp = check_response(resp).await?;
            let batch: Vec<T> = resp
                .json()
                .await
                .map_err(|e| HostError::ParseError(e.to_string()))?;
            let done = batch.len() < PER_PAGE;
            items.extend(batch);
            if done {
                break;
            }
            page += 1;
        }
        Ok(items)
    }

    async fn patch_json(&self, path: &str, payload: serde_json::Value) -> Result<(), HostError> {
        let resp = self
            .http
            .patch(self.url(path))
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        check_response(resp).await?;
        Ok(())
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        payload: serde_json::Value,
    ) -> Result<T, HostError> {
        let resp = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        check_response(resp)
            .await?
            .json()
            .await
            .map_err(|e| HostError::ParseError(e.to_string()))
    }
}

#[async_trait]
impl CodeHost for GitHubClient {
    #[instrument(skip(self))]
    async fn list_labels(&self) -> Result<Vec<String>, HostError> {
        let labels: Vec<GhLabel> = self.get_paged("labels", &[]).await?;
        debug!(count = labels.len(), "fetched labels");
        Ok(labels.into_iter().map(|l| l.name).collect())
    }

    #[instrument(skip(self))]
    async fn list_open_pull_requests(&self, base: &str) -> Result<Vec<PullRequest>, HostError> {
        let prs: Vec<GhPullRequest> = self
            .get_paged("pulls", &[("state", "open"), ("base", base)])
            .await?;
        debug!(count = prs.len(), base, "fetched open pull requests");
        Ok(prs.into_iter().map(PullRequest::from).collect())
    }

    #[instrument(skip(self))]
    async fn get_pull_request(&self, number: u64) -> Result<PullRequest, HostError> {
        let resp = self
            .http
            .get(self.url(&format!("pulls/{number}")))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let pr: GhPullRequest = check_response(resp)
            .await?
            .json()
            .await
            .map_err(|e| HostError::ParseError(e.to_string()))?;
        Ok(pr.into())
    }

    #[instrument(skip(self, body))]
    async fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<PullRequest, HostError> {
        let payload =
            serde_json::json!({ "title": title, "body": body, "head": head, "base": base });
        let pr: GhPullRequest = self.post_json("pulls", payload).await?;
        info!(number = pr.number, "created pull request");
        Ok(pr.into())
    }

    #[instrument(skip(self, body))]
    async fn update_pull_request(
        &self,
        number: u64,
        title: Option<&str>,
        body: Option<&str>,
    ) -> Result<(), HostError> {
        let mut payload = serde_json::Map::new();
        if let Some(title) = title {
            payload.insert("title".into(), title.into());
        }
        if let Some(body) = body {
            payload.insert("body".into(), body.into());
        }
        self.patch_json(&format!("pulls/{number}"), payload.into())
            .await?;
        info!(number, "updated pull request");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn add_labels(&self, number: u64, labels: &[&str]) -> Result<(), HostError> {
        let _: serde_json::Value = self
            .post_json(
                &format!("issues/{number}/labels"),
                serde_json::json!({ "labels": labels }),
            )
            .await?;
        debug!(number, "added labels");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_open_issues(
        &self,
        label: &str,
        title_contains: &str,
    ) -> Result<Vec<Issue>, HostError> {
        let issues: Vec<GhIssue> = self
            .get_paged("issues", &[("state", "open"), ("labels", label)])
            .await?;
        let matching: Vec<Issue> = issues
            .into_iter()
            .filter(|i| i.pull_request.is_none() && i.title.contains(title_contains))
            .map(Issue::from)
            .collect();
        debug!(count = matching.len(), "fetched matching issues");
        Ok(matching)
    }

    #[instrument(skip(self, body))]
    async fn create_issue(
        &self,
        title: &str,
        body: &str,
        labels: &[&str],
    ) -> Result<Issue, HostError> {
        let payload = serde_json::json!({ "title": title, "body": body, "labels": labels });
        let issue: GhIssue = self.post_json("issues", payload).await?;
        info!(number = issue.number, "created issue");
        Ok(issue.into())
    }

    #[instrument(skip(self, body))]
    async fn update_issue_body(&self, number: u64, body: &str) -> Result<(), HostError> {
        self.patch_json(
            &format!("issues/{number}"),
            serde_json::json!({ "body": body }),
        )
        .await?;
        info!(number, "updated issue");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn close_issue(&self, number: u64) -> Result<(), HostError> {
        self.patch_json(
            &format!("issues/{number}"),
            serde_json::json!({ "state": "closed" }),
        )
        .await?;
        info!(number, "closed issue");
        Ok(())
    }

    #[instrument(skip(self, body))]
    async fn comment(&self, number: u64, body: &str) -> Result<(), HostError> {
        let _: serde_json::Value = self
            .post_json(
                &format!("issues/{number}/comments"),
                serde_json::json!({ "body": body }),
            )
            .await?;
        debug!(number, "posted comment");
        Ok(())
    }
}

async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, HostError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(HostError::AuthenticationFailed(format!("HTTP {}", status)));
    }
    if status.as_u16() == 429 {
        let reset = resp
            .headers()
            .get("x-ratelimit-reset")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();
        return Err(HostError::RateLimited { reset_at: reset });
    }
    let body = resp.text().await.unwrap_or_default();
    Err(HostError::ApiError {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_request_from_json() {
        let json = r#"{
            "number": 12,
            "title": "Sync upstream (2 commits)",
            "body": null,
            "head": {"ref": "line-cook/fb_update", "sha": "abc"},
            "base": {"ref": "main", "sha": "def"},
            "labels": [{"name": "line-cook"}]
        }"#;
        let pr: PullRequest = serde_json::from_str::<GhPullRequest>(json).unwrap().into();
        assert_eq!(pr.number, 12);
        assert_eq!(pr.body, "");
        assert_eq!(pr.head_ref, "line-cook/fb_update");
        assert!(pr.has_label("line-cook"));
    }

    #[test]
    fn test_issue_marks_pull_requests() {
        let json = r#"[
            {"number": 1, "title": "a", "body": "x", "labels": []},
            {"number": 2, "title": "b", "body": null, "labels": [], "pull_request": {"url": "u"}}
        ]"#;
        let issues: Vec<GhIssue> = serde_json::from_str(json).unwrap();
        assert!(issues[0].pull_request.is_none());
        assert!(issues[1].pull_request.is_some());
    }

    #[test]
    fn test_client_construction() {
        let client = GitHubClient::new("https://api.github.com/", "acme/fork", "t").unwrap();
        assert_eq!(
            client.url("pulls/3"),
            "https://api.github.com/repos/acme/fork/pulls/3"
        );
    }
}
