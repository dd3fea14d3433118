//! Data sources the engine reads from.
//!
//! Activities, pull requests and chat identities all come from collaborators
//! behind these traits, so the engine can be driven by the real services or
//! by in-memory fixtures.

pub mod github;
pub mod memory;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::model::{ActivityRecord, ChatIdentity, PullRequestInfo, VcsUser};

pub use github::GitHubPullRequests;
pub use memory::{InMemoryActivities, StaticIdentityResolver};

/// Lists the pipeline runs of a pull request.
#[async_trait]
pub trait ActivityProvider: Send + Sync {
    /// All known runs for `owner/repo` pull request `number`, in no
    /// particular order.
    async fn list_activities(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Vec<ActivityRecord>, ProviderError>;
}

/// Fetches pull request metadata.
#[async_trait]
pub trait PullRequestProvider: Send + Sync {
    /// Fails with [`ProviderError::NotFound`] when the pull request does not exist.
    async fn get_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<PullRequestInfo, ProviderError>;
}

/// Maps version control users to chat users.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, user: &VcsUser) -> Result<Option<ChatIdentity>, ProviderError>;
}

/// Writes message coordinates back onto the stored activity.
#[async_trait]
pub trait ActivityAnnotator: Send + Sync {
    async fn annotate(
        &self,
        activity: &ActivityRecord,
        key: &str,
        value: &str,
    ) -> Result<(), ProviderError>;
}
