//! Per-rule eligibility: organization/repository allow-list and label
//! ignore-list.

use serde::{Deserialize, Serialize};

use crate::model::{ActivityRecord, PullRequestInfo};

/// Allow-list entry. An empty `repos` list admits every repository of the
/// organization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgFilter {
    pub name: String,
    #[serde(default)]
    pub repos: Vec<String>,
}

impl OrgFilter {
    #[must_use]
    pub fn admits(&self, owner: &str, repo: &str) -> bool {
        self.name == owner && (self.repos.is_empty() || self.repos.iter().any(|r| r == repo))
    }
}

/// Whether `owner/repo` passes the allow-list. An empty list admits everything.
#[must_use]
pub fn repo_allowed(orgs: &[OrgFilter], owner: &str, repo: &str) -> bool {
    orgs.is_empty() || orgs.iter().any(|org| org.admits(owner, repo))
}

/// Outcome of the eligibility check for one rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    /// The repository is not in the rule's allow-list
    NotAllowed,
    /// The pull request carries labels the rule ignores
    IgnoredLabels(Vec<String>),
}

impl Eligibility {
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible)
    }
}

/// Allow-list half of the check; needs no pull request data.
#[must_use]
pub fn check_repo(activity: &ActivityRecord, orgs: &[OrgFilter]) -> Eligibility {
    if repo_allowed(orgs, &activity.owner, &activity.repo) {
        Eligibility::Eligible
    } else {
        Eligibility::NotAllowed
    }
}

/// Full check for one rule. Label checks apply only when the activity
/// resolved to a pull request.
#[must_use]
pub fn check(
    activity: &ActivityRecord,
    orgs: &[OrgFilter],
    ignore_labels: &[String],
    pull_request: Option<&PullRequestInfo>,
) -> Eligibility {
    let repo = check_repo(activity, orgs);
    if !repo.is_eligible() {
        return repo;
    }
    let Some(pr) = pull_request else {
        return Eligibility::Eligible;
    };
    let matched: Vec<String> = ignore_labels
        .iter()
        .filter(|label| pr.has_label(label))
        .cloned()
        .collect();
    if matched.is_empty() {
        Eligibility::Eligible
    } else {
        Eligibility::IgnoredLabels(matched)
    }
}
