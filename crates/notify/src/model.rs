//! Pipeline activity and pull request types consumed by the engine.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::NotifyError;

/// Branch prefix that marks a pull request pipeline.
const PULL_REQUEST_BRANCH_PREFIX: &str = "pr-";

/// Which kind of message a rule produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Flow {
    Pipeline,
    Review,
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pipeline => f.write_str("pipeline"),
            Self::Review => f.write_str("review"),
        }
    }
}

/// State of a pipeline run or one of its stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Pending,
    Running,
    #[serde(alias = "success")]
    Succeeded,
    #[serde(alias = "failure")]
    Failed,
    Aborted,
    #[default]
    #[serde(other)]
    Unknown,
}

impl PipelineState {
    /// Whether the run has finished.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Aborted)
    }
}

/// A stage of a pipeline run, or a step nested inside a stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: PipelineState,
    #[serde(default)]
    pub steps: Vec<Stage>,
}

/// One observed pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub name: String,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub build_identifier: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub status: PipelineState,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub git_url: String,
    #[serde(default)]
    pub link_url: String,
    #[serde(default)]
    pub log_url: String,
    #[serde(default)]
    pub stages: Vec<Stage>,
}

impl ActivityRecord {
    /// Pull request number encoded in the branch name (`pr-<N>`, any case).
    ///
    /// Returns `Ok(None)` when the branch is not a pull request branch.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Configuration`] when the branch carries the
    /// `pr-` prefix but the remainder is not a number.
    pub fn pull_request_number(&self) -> Result<Option<u64>, NotifyError> {
        let branch = self.branch.to_ascii_lowercase();
        let Some(number) = branch.strip_prefix(PULL_REQUEST_BRANCH_PREFIX) else {
            return Ok(None);
        };
        let number: u64 = number.parse().map_err(|_| {
            NotifyError::Configuration(format!(
                "branch {} of activity {} is not a valid pull request branch",
                self.branch, self.name
            ))
        })?;
        Ok((number > 0).then_some(number))
    }

    /// Build identifier interpreted as an integer.
    #[must_use]
    pub fn build_number(&self) -> Option<u64> {
        self.build_identifier.trim().parse().ok()
    }

    /// Whether this run belongs to the release branch.
    #[must_use]
    pub fn is_release(&self) -> bool {
        self.branch == "master"
    }

    /// Latest of the pull request update time and the run's start and
    /// completion times.
    #[must_use]
    pub fn last_updated(&self, pull_request: Option<&PullRequestInfo>) -> Option<DateTime<Utc>> {
        [
            pull_request.and_then(|pr| pr.updated_at),
            self.start_time,
            self.completion_time,
        ]
        .into_iter()
        .flatten()
        .max()
    }

    /// Status used for colors: a finished run reports its own status,
    /// otherwise the last stage speaks for the run.
    #[must_use]
    pub fn effective_status(&self) -> PipelineState {
        if self.status.is_terminal() {
            return self.status;
        }
        self.stages.last().map_or(self.status, |stage| stage.status)
    }
}

/// A user on the version control host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcsUser {
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl VcsUser {
    #[must_use]
    pub fn new(login: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            ..Self::default()
        }
    }
}

/// A user on the chat platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatIdentity {
    pub user_id: String,
}

/// Pull request metadata, fetched fresh for every activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestInfo {
    pub number: u64,
    pub title: String,
    pub url: String,
    pub author: VcsUser,
    #[serde(default)]
    pub requested_reviewers: Vec<VcsUser>,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default)]
    pub merged: bool,
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl PullRequestInfo {
    #[must_use]
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }
}
