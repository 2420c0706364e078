//! Task Store Module
//!
//! Key-value storage for `TaskRecord`s, one record per task under `task:{task_id}`,
//! each with a fixed expiry. The store is the single source of truth shared by the
//! dispatcher (creates `Pending` records, reads for polling) and the worker (moves
//! records through `Processing` to a terminal state).
//!
//! ## Core Concepts
//! - **Expiry**: Every write (re)sets the TTL. An expired record reads as absent,
//!   whatever its status.
//! - **Single writer**: Status updates are read-modify-write without locking. This is
//!   safe because exactly one worker ever claims a given queued item.
//!
//! ## Backends
//! - **`memory`**: `DashMap` with per-entry expiry instants.
//! - **`redis`**: `SET ... EX` / `GET` on a multiplexed connection.

pub mod memory;
pub mod redis;


use crate::error::StoreError;
use crate::executor::types::{TaskId, TaskRecord};

use async_trait::async_trait;
use std::time::Duration;

/// Default record lifetime.
pub const DEFAULT_TASK_TTL: Duration = Duration::from_secs(3600);

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Writes the whole record, replacing any previous value and resetting its expiry.
    async fn put(&self, record: &TaskRecord) -> Result<(), StoreError>;

    /// Reads a record; `None` if it never existed or has expired.
    async fn get(&self, task_id: &TaskId) -> Result<Option<TaskRecord>, StoreError>;
}

/// Read-modify-write helper for status transitions.
///
/// Fails with `StoreError::NotFound` if the record is absent and propagates any
/// transition error from `apply` without writing.
pub async fn update_task<F>(
    store: &dyn TaskStore,
    task_id: &TaskId,
    apply: F,
) -> Result<TaskRecord, StoreError>
where
    F: FnOnce(&mut TaskRecord) -> Result<(), StoreError> + Send,
{
    let mut record = store
        .get(task_id)
        .await?
        .ok_or_else(|| StoreError::NotFound(task_id.0.clone()))?;

    apply(&mut record)?;
    store.put(&record).await?;

    tracing::debug!("Task {} status updated to {:?}", task_id, record.status);
    Ok(record)
}
