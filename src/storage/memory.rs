use super::{TaskStore, DEFAULT_TASK_TTL};
use crate::error::StoreError;
use crate::executor::types::{TaskId, TaskRecord};

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// In-process task store.
///
/// Entries are stored serialized, the same way the Redis backend holds them, so a
/// record read back is always a fresh copy. Expired entries are dropped lazily on read.
pub struct MemoryTaskStore {
    entries: DashMap<String, (String, Instant)>,
    ttl: Duration,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TASK_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Number of live (unexpired) records.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| entry.value().1 > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All live records, in no particular order. Entries that fail to decode are skipped.
    pub fn snapshot(&self) -> Vec<TaskRecord> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| entry.value().1 > now)
            .filter_map(|entry| serde_json::from_str(&entry.value().0).ok())
            .collect()
    }

    /// Removes all expired entries.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
    }
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn put(&self, record: &TaskRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        self.entries.insert(
            record.task_id.store_key(),
            (json, Instant::now() + self.ttl),
        );
        Ok(())
    }

    async fn get(&self, task_id: &TaskId) -> Result<Option<TaskRecord>, StoreError> {
        let key = task_id.store_key();

        let lookup = self
            .entries
            .get(&key)
            .map(|entry| (entry.value().0.clone(), entry.value().1));

        let json = match lookup {
            Some((json, expires_at)) if expires_at > Instant::now() => json,
            Some(_) => {
                self.entries.remove(&key);
                tracing::trace!("Task {} expired", task_id);
                return Ok(None);
            }
            None => return Ok(None),
        };

        Ok(Some(serde_json::from_str(&json)?))
    }
}
