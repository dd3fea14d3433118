//! Consolidation of the pipeline runs of one pull request into a single
//! message thread.
//!
//! A pull request is built many times, but its review message should be one
//! message that keeps getting updated. The oldest run (lowest build number)
//! is the anchor whose name keys that message; the newest run decides
//! whether an incoming update is stale.

use tracing::warn;

use crate::error::ProviderError;
use crate::model::ActivityRecord;
use crate::providers::ActivityProvider;

/// The runs of one pull request, ordered by build number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestThread {
    /// Logical message key for the thread
    pub key: String,
    /// Oldest run
    pub anchor: ActivityRecord,
    /// Newest run
    pub latest: ActivityRecord,
    latest_build: u64,
    /// All runs, oldest first
    pub siblings: Vec<ActivityRecord>,
    /// No siblings were found; the trigger stands in for the whole thread
    pub degenerate: bool,
}

impl PullRequestThread {
    /// Highest known build number.
    #[must_use]
    pub const fn latest_build(&self) -> u64 {
        self.latest_build
    }

    /// Whether an update for `build` is older than what the thread has seen.
    #[must_use]
    pub const fn is_stale(&self, build: u64) -> bool {
        build < self.latest_build
    }
}

/// Key used when no sibling run can anchor the thread.
#[must_use]
pub fn fallback_key(trigger: &ActivityRecord, number: u64) -> String {
    format!("{}/{}/pr-{number}", trigger.owner, trigger.repo)
}

/// Build the thread from already fetched sibling runs.
///
/// `trigger_build` is the build number of the run that triggered the update.
/// Siblings without a numeric build identifier cannot be ordered and are
/// left out.
#[must_use]
pub fn consolidate(
    trigger: &ActivityRecord,
    trigger_build: u64,
    number: u64,
    siblings: Vec<ActivityRecord>,
) -> PullRequestThread {
    let mut numbered: Vec<(u64, ActivityRecord)> = siblings
        .into_iter()
        .filter_map(|sibling| match sibling.build_number() {
            Some(build) => Some((build, sibling)),
            None => {
                warn!(
                    activity = %sibling.name,
                    build = %sibling.build_identifier,
                    "Ignoring sibling activity with non-numeric build identifier"
                );
                None
            }
        })
        .collect();
    // Stable: equal build numbers keep retrieval order.
    numbered.sort_by_key(|(build, _)| *build);

    match (numbered.first(), numbered.last()) {
        (Some((_, anchor)), Some((latest_build, latest))) => PullRequestThread {
            key: anchor.name.clone(),
            anchor: anchor.clone(),
            latest: latest.clone(),
            latest_build: *latest_build,
            siblings: numbered.into_iter().map(|(_, sibling)| sibling).collect(),
            degenerate: false,
        },
        _ => {
            warn!(
                activity = %trigger.name,
                "No pipeline activities exist for {}/{}/pr-{number}, using the trigger as anchor",
                trigger.owner,
                trigger.repo
            );
            PullRequestThread {
                key: fallback_key(trigger, number),
                anchor: trigger.clone(),
                latest: trigger.clone(),
                latest_build: trigger_build,
                siblings: vec![trigger.clone()],
                degenerate: true,
            }
        }
    }
}

/// Fetch the sibling runs of `trigger` and consolidate them.
///
/// A provider answering [`ProviderError::NotFound`] yields a degenerate
/// thread; any other provider failure is returned.
pub async fn find_thread(
    provider: &dyn ActivityProvider,
    trigger: &ActivityRecord,
    trigger_build: u64,
    number: u64,
) -> Result<PullRequestThread, ProviderError> {
    let siblings = match provider
        .list_activities(&trigger.owner, &trigger.repo, number)
        .await
    {
        Ok(siblings) => siblings,
        Err(ProviderError::NotFound(what)) => {
            warn!(activity = %trigger.name, missing = %what, "Sibling lookup found nothing");
            Vec::new()
        }
        Err(e) => return Err(e),
    };
    Ok(consolidate(trigger, trigger_build, number, siblings))
}
