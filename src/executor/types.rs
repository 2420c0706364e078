use crate::error::StoreError;
use crate::extractor::types::ScrapedRecord;
use serde::{Deserialize, Serialize};

/// Unique identifier for a lookup task.
///
/// Wrapper around a UUID string. Callers only ever see it as an opaque token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generates a new random UUID v4-based TaskId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Key under which the record lives in the task store.
    pub fn store_key(&self) -> String {
        format!("task:{}", self.0)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Represents the lifecycle state of a lookup task.
///
/// Only moves forward: `Pending -> Processing -> {Completed, Failed}`.
/// `Pending -> Failed` is reserved for the dispatcher when the work item could
/// not be published.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Record written, work item queued, no worker has picked it up yet.
    Pending,
    /// A worker claimed the message and is running the extractor.
    Processing,
    /// The extractor returned a record.
    Completed,
    /// The extractor (or the dispatch) failed; see `TaskRecord::error`.
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Returns `true` if moving from this status to `next` keeps the lifecycle monotonic.
    ///
    /// `Processing -> Processing` is allowed so a redelivered message can be re-claimed
    /// after a worker crash.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match self {
            TaskStatus::Pending => matches!(next, TaskStatus::Processing | TaskStatus::Failed),
            TaskStatus::Processing => matches!(
                next,
                TaskStatus::Processing | TaskStatus::Completed | TaskStatus::Failed
            ),
            TaskStatus::Completed | TaskStatus::Failed => false,
        }
    }
}

/// The persisted representation of a task, stored under `task:{task_id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRecord {
    pub task_id: TaskId,
    /// The tax id exactly as the caller submitted it.
    pub tax_id: String,
    pub status: TaskStatus,
    /// Timestamp (ms) when the task was accepted.
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ScrapedRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskRecord {
    /// A freshly accepted task.
    pub fn pending(task_id: TaskId, tax_id: impl Into<String>) -> Self {
        Self {
            task_id,
            tax_id: tax_id.into(),
            status: TaskStatus::Pending,
            created_at: now_ms(),
            result: None,
            error: None,
        }
    }

    pub fn mark_processing(&mut self) -> Result<(), StoreError> {
        self.advance(TaskStatus::Processing)
    }

    pub fn mark_completed(&mut self, result: ScrapedRecord) -> Result<(), StoreError> {
        self.advance(TaskStatus::Completed)?;
        self.result = Some(result);
        self.error = None;
        Ok(())
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) -> Result<(), StoreError> {
        self.advance(TaskStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    fn advance(&mut self, next: TaskStatus) -> Result<(), StoreError> {
        if !self.status.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                task_id: self.task_id.0.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

/// The work item published to the queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkItem {
    pub task_id: TaskId,
    pub tax_id: String,
}

/// A work item as read off the wire, before validation.
///
/// Both fields are optional so that malformed messages can be detected and
/// rejected instead of failing deserialization outright. `cnpj` is accepted as
/// a legacy alias for `tax_id`.
#[derive(Debug, Default, Deserialize)]
pub struct RawWorkItem {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default, alias = "cnpj")]
    pub tax_id: Option<String>,
}

impl RawWorkItem {
    /// Decodes a message body; anything that is not a JSON object with both
    /// non-empty fields yields `None`.
    pub fn decode(body: &str) -> Option<WorkItem> {
        let raw: RawWorkItem = serde_json::from_str(body).ok()?;
        match (raw.task_id, raw.tax_id) {
            (Some(task_id), Some(tax_id)) if !task_id.is_empty() && !tax_id.is_empty() => {
                Some(WorkItem {
                    task_id: TaskId(task_id),
                    tax_id,
                })
            }
            _ => None,
        }
    }
}

/// Helper to get the current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
