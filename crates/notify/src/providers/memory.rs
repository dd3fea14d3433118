//! In-memory providers, used by the CLI and in tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ActivityProvider, IdentityResolver};
use crate::error::ProviderError;
use crate::model::{ActivityRecord, ChatIdentity, VcsUser};

/// Activity history held in memory, in insertion order.
#[derive(Default)]
pub struct InMemoryActivities {
    records: RwLock<Vec<ActivityRecord>>,
}

impl InMemoryActivities {
    #[must_use]
    pub fn new(records: Vec<ActivityRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    /// Record another run.
    pub async fn push(&self, record: ActivityRecord) {
        self.records.write().await.push(record);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ActivityProvider for InMemoryActivities {
    async fn list_activities(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Vec<ActivityRecord>, ProviderError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|record| record.owner == owner && record.repo == repo)
            .filter(|record| matches!(record.pull_request_number(), Ok(Some(n)) if n == number))
            .cloned()
            .collect())
    }
}

/// Resolves VCS logins through a fixed login -> chat user id table.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityResolver {
    users: HashMap<String, String>,
}

impl StaticIdentityResolver {
    #[must_use]
    pub fn new(users: HashMap<String, String>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentityResolver {
    async fn resolve(&self, user: &VcsUser) -> Result<Option<ChatIdentity>, ProviderError> {
        Ok(self.users.get(&user.login).map(|id| ChatIdentity {
            user_id: id.clone(),
        }))
    }
}
