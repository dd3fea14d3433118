//! Message reference store: where each logical message lives on the chat
//! platform.
//!
//! The store maps `(flow, destination, logical key)` to the channel id and
//! timestamp the chat platform assigned when the message was first sent. It
//! is the reconciliation ledger: losing it leads to duplicate messages.
//!
//! Reads and writes are individually atomic, but deciding between create and
//! update spans a lookup, a send and a record. [`KeyLocks`] serializes that
//! cycle per key.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

use crate::error::StoreError;
use crate::model::Flow;

/// Identifies one logical message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageKey {
    /// Pipeline and review messages for the same run are distinct
    pub flow: Flow,
    /// Channel name or user id the message is addressed to
    pub destination: String,
    /// Name of the activity that anchors the message
    pub key: String,
}

impl MessageKey {
    #[must_use]
    pub fn new(flow: Flow, destination: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            flow,
            destination: destination.into(),
            key: key.into(),
        }
    }
}

/// The chat platform's own coordinates of a sent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReference {
    pub channel_id: String,
    pub timestamp: String,
}

#[async_trait]
pub trait ReferenceStore: Send + Sync {
    async fn lookup(&self, key: &MessageKey) -> Result<Option<MessageReference>, StoreError>;

    async fn record(&self, key: MessageKey, reference: MessageReference)
        -> Result<(), StoreError>;
}

/// Process-lifetime store.
#[derive(Default)]
pub struct InMemoryReferenceStore {
    entries: RwLock<HashMap<MessageKey, MessageReference>>,
}

impl InMemoryReferenceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ReferenceStore for InMemoryReferenceStore {
    async fn lookup(&self, key: &MessageKey) -> Result<Option<MessageReference>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn record(
        &self,
        key: MessageKey,
        reference: MessageReference,
    ) -> Result<(), StoreError> {
        self.entries.write().await.insert(key, reference);
        Ok(())
    }
}

/// Persisted layout: flow -> destination -> logical key -> reference.
type ReferenceMap = BTreeMap<String, BTreeMap<String, BTreeMap<String, MessageReference>>>;

/// Store persisted as a JSON file, rewritten after every record.
pub struct JsonFileReferenceStore {
    path: PathBuf,
    entries: Mutex<ReferenceMap>,
}

impl JsonFileReferenceStore {
    /// Open the store at `path`; a missing file starts empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or decoded.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|source| StoreError::Json {
                path: path.display().to_string(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ReferenceMap::new(),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, entries: &ReferenceMap) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.display().to_string(),
            source,
        };
        let raw = serde_json::to_vec_pretty(entries).map_err(|source| StoreError::Json {
            path: self.path.display().to_string(),
            source,
        })?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, raw).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        debug!(path = %self.path.display(), "Persisted message references");
        Ok(())
    }
}

#[async_trait]
impl ReferenceStore for JsonFileReferenceStore {
    async fn lookup(&self, key: &MessageKey) -> Result<Option<MessageReference>, StoreError> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(&key.flow.to_string())
            .and_then(|by_destination| by_destination.get(&key.destination))
            .and_then(|by_key| by_key.get(&key.key))
            .cloned())
    }

    async fn record(
        &self,
        key: MessageKey,
        reference: MessageReference,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        let flow = key.flow.to_string();
        let previous = entries
            .entry(flow.clone())
            .or_default()
            .entry(key.destination.clone())
            .or_default()
            .insert(key.key.clone(), reference);
        if let Err(e) = self.persist(&entries).await {
            // Keep memory and disk in agreement.
            let by_key = entries
                .entry(flow)
                .or_default()
                .entry(key.destination)
                .or_default();
            match previous {
                Some(previous) => {
                    by_key.insert(key.key, previous);
                }
                None => {
                    by_key.remove(&key.key);
                }
            }
            return Err(e);
        }
        Ok(())
    }
}

/// One async lock per message key.
///
/// Holding the guard across lookup, send and record keeps two updates for
/// the same key from racing, while different keys proceed independently.
#[derive(Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<MessageKey, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `key`.
    pub async fn lock(&self, key: &MessageKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Drop locks nobody holds or waits on.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        lock.lock_owned().await
    }
}
