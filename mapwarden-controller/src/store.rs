//! Store seams for match history and expiring pointers.
//!
//! Production uses the SQLite [`Database`]; [`MemoryPointerStore`] keeps
//! pointers in a lock-free map for single-process deployments and tests.

use async_trait::async_trait;
use mapwarden_db::{Database, MatchRecord, PointerEntry};
use scc::HashMap;

use crate::error::StoreError;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Read access to the match history.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Up to `limit` records following the record `before_id` in the store's
    /// natural order. `None` starts a fresh scan from the beginning.
    async fn recent_matches(
        &self,
        before_id: Option<i64>,
        limit: usize,
    ) -> StoreResult<Vec<MatchRecord>>;

    /// Whether the natural order is newest first.
    fn is_newest_first(&self) -> bool {
        true
    }
}

/// Key/value entries with an absolute expiry.
///
/// Each call is one atomic operation; expiry is judged by the caller.
#[async_trait]
pub trait PointerStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<PointerEntry>>;

    async fn set_with_expiry(&self, key: &str, value: &str, expires_at: i64) -> StoreResult<()>;

    async fn delete(&self, key: &str) -> StoreResult<()>;
}

#[async_trait]
impl HistoryStore for Database {
    async fn recent_matches(
        &self,
        before_id: Option<i64>,
        limit: usize,
    ) -> StoreResult<Vec<MatchRecord>> {
        Ok(Database::recent_matches(self, before_id, limit).await?)
    }
}

#[async_trait]
impl PointerStore for Database {
    async fn get(&self, key: &str) -> StoreResult<Option<PointerEntry>> {
        Ok(self.get_pointer(key.to_string()).await?)
    }

    async fn set_with_expiry(&self, key: &str, value: &str, expires_at: i64) -> StoreResult<()> {
        self.set_pointer(key.to_string(), value.to_string(), expires_at)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.delete_pointer(key.to_string()).await?;
        Ok(())
    }
}

/// In-memory pointer store.
pub struct MemoryPointerStore {
    entries: HashMap<String, PointerEntry>,
}

impl MemoryPointerStore {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemoryPointerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PointerStore for MemoryPointerStore {
    async fn get(&self, key: &str) -> StoreResult<Option<PointerEntry>> {
        Ok(self.entries.read_async(key, |_, entry| entry.clone()).await)
    }

    async fn set_with_expiry(&self, key: &str, value: &str, expires_at: i64) -> StoreResult<()> {
        let entry = PointerEntry {
            key: key.to_string(),
            value: value.to_string(),
            expires_at,
        };

        self.entries
            .entry_async(key.to_string())
            .await
            .and_modify(|existing| *existing = entry.clone())
            .or_insert(entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let _ = self.entries.remove_async(key).await;
        Ok(())
    }
}
