//! Mapping of pipeline and pull request state to display statuses.
//!
//! Every status kind has a default glyph and label. A [`StatusPolicy`] can
//! override any of them; kinds it does not mention fall back to the default
//! table, so resolution never fails.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{PipelineState, PullRequestInfo};

/// Label that marks a pull request as reviewed in lgtm repositories.
pub const LABEL_LGTM: &str = "lgtm";
/// Label that marks a pull request as approved.
pub const LABEL_APPROVED: &str = "approved";
/// Label that puts a pull request on hold.
pub const LABEL_HOLD: &str = "do-not-merge/hold";
/// Label that blocks tests until a maintainer allows them.
pub const LABEL_NEEDS_OK_TO_TEST: &str = "needs-ok-to-test";

/// Every status a message can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Merged,
    Closed,
    Aborted,
    Errored,
    Failed,
    Approved,
    NotApproved,
    NeedsOkToTest,
    Hold,
    Pending,
    Running,
    Succeeded,
    Lgtm,
    Unknown,
}

impl StatusKind {
    /// Merged and closed pull requests expect no further builds.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Merged | Self::Closed)
    }
}

/// A display unit: glyph plus label text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub emoji: String,
    pub text: String,
}

impl Status {
    #[must_use]
    pub fn new(emoji: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            emoji: emoji.into(),
            text: text.into(),
        }
    }

    /// Glyph and label as shown in a message field.
    #[must_use]
    pub fn display(&self) -> String {
        format!("{} {}", self.emoji, self.text)
    }
}

/// Built-in status table.
#[must_use]
pub fn default_status(kind: StatusKind) -> Status {
    let (emoji, text) = match kind {
        StatusKind::Merged => (":purple_heart:", "merged"),
        StatusKind::Closed => (":closed_book:", "closed and not merged"),
        StatusKind::Aborted => (":red_circle:", "build aborted"),
        StatusKind::Errored => (":red_circle:", "build errored"),
        StatusKind::Failed => (":red_circle:", "build failed"),
        StatusKind::Approved => (":+1:", "approved"),
        StatusKind::NotApproved => (":wave:", "not approved"),
        StatusKind::NeedsOkToTest => (":wave:", "needs /ok-to-test"),
        StatusKind::Hold => (":octagonal_sign:", "hold"),
        StatusKind::Pending => (":question:", "build pending"),
        StatusKind::Running => (":white_circle:", "build running"),
        StatusKind::Succeeded => (":white_check_mark:", "build succeeded"),
        StatusKind::Lgtm => (":+1:", "lgtm"),
        StatusKind::Unknown => (":grey_question:", ""),
    };
    Status::new(emoji, text)
}

/// Status overrides keyed by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusPolicy {
    overrides: BTreeMap<StatusKind, Status>,
}

impl StatusPolicy {
    /// Add or replace the override for `kind`.
    #[must_use]
    pub fn with_override(mut self, kind: StatusKind, status: Status) -> Self {
        self.overrides.insert(kind, status);
        self
    }

    /// Combine two policies; entries in `self` win over `fallback`.
    #[must_use]
    pub fn layered_over(&self, fallback: &Self) -> Self {
        let mut overrides = fallback.overrides.clone();
        overrides.extend(self.overrides.clone());
        Self { overrides }
    }

    /// Override for `kind` if present, otherwise the default.
    #[must_use]
    pub fn resolve(&self, kind: StatusKind) -> Status {
        self.overrides
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| default_status(kind))
    }

    #[must_use]
    pub fn resolved(&self, kind: StatusKind) -> ResolvedStatus {
        ResolvedStatus {
            kind,
            status: self.resolve(kind),
        }
    }
}

/// A status together with the kind it was resolved from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStatus {
    pub kind: StatusKind,
    pub status: Status,
}

struct ReviewRule {
    kind: StatusKind,
    applies: fn(&PullRequestInfo, bool) -> bool,
}

fn has_lgtm(pr: &PullRequestInfo, lgtm_repo: bool) -> bool {
    lgtm_repo && pr.has_label(LABEL_LGTM)
}

fn has_approved(pr: &PullRequestInfo, lgtm_repo: bool) -> bool {
    !lgtm_repo && pr.has_label(LABEL_APPROVED)
}

fn has_hold(pr: &PullRequestInfo, _: bool) -> bool {
    pr.has_label(LABEL_HOLD)
}

fn needs_ok_to_test(pr: &PullRequestInfo, _: bool) -> bool {
    pr.has_label(LABEL_NEEDS_OK_TO_TEST)
}

// Evaluated in order; the last matching rule wins.
const REVIEW_RULES: &[ReviewRule] = &[
    ReviewRule {
        kind: StatusKind::Lgtm,
        applies: has_lgtm,
    },
    ReviewRule {
        kind: StatusKind::Approved,
        applies: has_approved,
    },
    ReviewRule {
        kind: StatusKind::Hold,
        applies: has_hold,
    },
    ReviewRule {
        kind: StatusKind::NeedsOkToTest,
        applies: needs_ok_to_test,
    },
];

/// Review status of a pull request, derived from its labels.
///
/// `lgtm_repo` selects `lgtm` label semantics instead of `approved`.
#[must_use]
pub fn review_status(
    pull_request: &PullRequestInfo,
    lgtm_repo: bool,
    policy: &StatusPolicy,
) -> ResolvedStatus {
    let kind = REVIEW_RULES
        .iter()
        .rev()
        .find(|rule| (rule.applies)(pull_request, lgtm_repo))
        .map_or(StatusKind::NotApproved, |rule| rule.kind);
    policy.resolved(kind)
}

/// Build status: terminal pull request states win over the CI state.
#[must_use]
pub fn build_status(
    pull_request: Option<&PullRequestInfo>,
    state: PipelineState,
    policy: &StatusPolicy,
) -> ResolvedStatus {
    let kind = match pull_request {
        Some(pr) if pr.merged => StatusKind::Merged,
        Some(pr) if pr.closed => StatusKind::Closed,
        _ => match state {
            PipelineState::Pending => StatusKind::Pending,
            PipelineState::Running => StatusKind::Running,
            PipelineState::Succeeded => StatusKind::Succeeded,
            PipelineState::Failed => StatusKind::Failed,
            PipelineState::Aborted => StatusKind::Aborted,
            PipelineState::Unknown => StatusKind::Unknown,
        },
    };
    policy.resolved(kind)
}

/// Glyph shown in front of a stage or step name.
#[must_use]
pub fn step_glyph(state: PipelineState, policy: &StatusPolicy) -> String {
    match state {
        PipelineState::Failed | PipelineState::Aborted => policy.resolve(StatusKind::Failed).emoji,
        PipelineState::Succeeded => policy.resolve(StatusKind::Succeeded).emoji,
        PipelineState::Running | PipelineState::Pending => {
            policy.resolve(StatusKind::Running).emoji
        }
        PipelineState::Unknown => String::new(),
    }
}

/// Attachment color for a pipeline state.
#[must_use]
pub const fn attachment_color(state: PipelineState) -> &'static str {
    match state {
        PipelineState::Failed => "danger",
        PipelineState::Succeeded => "good",
        PipelineState::Running | PipelineState::Pending => "#3AA3E3",
        PipelineState::Aborted | PipelineState::Unknown => "",
    }
}
