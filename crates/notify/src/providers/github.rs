//! GitHub REST pull request provider.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use super::PullRequestProvider;
use crate::error::ProviderError;
use crate::model::{PullRequestInfo, VcsUser};

/// Default GitHub API base URL.
pub const GITHUB_API_URL: &str = "https://api.github.com";

/// Environment variable for the GitHub token.
const ENV_GITHUB_TOKEN: &str = "GITHUB_TOKEN";
/// Environment variable overriding the API base URL.
const ENV_GITHUB_API_URL: &str = "GITHUB_API_URL";

/// Reads pull requests from the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GitHubPullRequests {
    client: reqwest::Client,
    api_base: String,
    token: Option<String>,
}

impl GitHubPullRequests {
    /// Create a provider for `api_base`, authenticating with `token` if given.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(api_base: &str, token: Option<String>) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("pipeline-notify/1.0"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Create a provider from `GITHUB_TOKEN` and `GITHUB_API_URL`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_base =
            std::env::var(ENV_GITHUB_API_URL).unwrap_or_else(|_| GITHUB_API_URL.to_string());
        let token = std::env::var(ENV_GITHUB_TOKEN)
            .ok()
            .filter(|t| !t.is_empty());
        Self::new(&api_base, token)
    }
}

#[async_trait]
impl PullRequestProvider for GitHubPullRequests {
    async fn get_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<PullRequestInfo, ProviderError> {
        let url = format!("{}/repos/{owner}/{repo}/pulls/{number}", self.api_base);
        debug!(url = %url, "Fetching pull request");

        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let response = request.send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                return Err(ProviderError::NotFound(format!(
                    "pull request {owner}/{repo}#{number}"
                )))
            }
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(ProviderError::Request(format!(
                    "GitHub API error: {status} - {body}"
                )));
            }
            _ => {}
        }

        let pr: GitHubPullRequest = response.json().await?;
        Ok(pr.into())
    }
}

// =============================================================================
// GitHub API types
// =============================================================================

#[derive(Debug, Deserialize)]
struct GitHubPullRequest {
    number: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    html_url: String,
    state: String,
    #[serde(default)]
    merged: bool,
    user: GitHubUser,
    #[serde(default)]
    requested_reviewers: Vec<GitHubUser>,
    #[serde(default)]
    labels: Vec<GitHubLabel>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    login: String,
    #[serde(default)]
    html_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubLabel {
    name: String,
}

impl From<GitHubUser> for VcsUser {
    fn from(user: GitHubUser) -> Self {
        Self {
            login: user.login,
            name: None,
            url: user.html_url,
        }
    }
}

impl From<GitHubPullRequest> for PullRequestInfo {
    fn from(pr: GitHubPullRequest) -> Self {
        Self {
            number: pr.number,
            title: pr.title,
            url: pr.html_url,
            author: pr.user.into(),
            requested_reviewers: pr.requested_reviewers.into_iter().map(Into::into).collect(),
            labels: pr
                .labels
                .into_iter()
                .map(|l| l.name)
                .collect::<BTreeSet<_>>(),
            merged: pr.merged,
            closed: pr.state == "closed",
            updated_at: pr.updated_at,
        }
    }
}
