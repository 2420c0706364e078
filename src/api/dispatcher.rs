use crate::bootstrap::{retry, RetryPolicy};
use crate::error::{DispatchError, StoreError};
use crate::executor::queue::WorkQueue;
use crate::executor::types::{TaskId, TaskRecord, WorkItem};
use crate::extractor::normalize::is_valid_tax_id;
use crate::storage::{update_task, TaskStore};

use std::sync::Arc;

/// Request-facing half of the pipeline.
///
/// Creates task records and publishes work items; never touches a record again
/// after handing it to the queue, except to mark it failed when publishing fails.
pub struct Dispatcher {
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn WorkQueue>,
    publish_policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn TaskStore>, queue: Arc<dyn WorkQueue>) -> Self {
        Self {
            store,
            queue,
            publish_policy: RetryPolicy::quick(),
        }
    }

    pub fn with_publish_policy(mut self, policy: RetryPolicy) -> Self {
        self.publish_policy = policy;
        self
    }

    /// Accepts a lookup and returns its task id without waiting for the result.
    ///
    /// The `Pending` record is written before the work item is published. If the
    /// publish still fails after retrying, the record is marked `failed` so no
    /// orphaned pending task is left behind, and the queue error is returned.
    pub async fn enqueue_task(&self, tax_id: &str) -> Result<TaskId, DispatchError> {
        if !is_valid_tax_id(tax_id) {
            return Err(DispatchError::Validation(format!(
                "tax_id must be exactly 14 digits, got {:?}",
                tax_id
            )));
        }

        let task_id = TaskId::new();
        let record = TaskRecord::pending(task_id.clone(), tax_id);
        self.store.put(&record).await?;

        let item = WorkItem {
            task_id: task_id.clone(),
            tax_id: tax_id.to_string(),
        };

        let published = retry("publish work item", self.publish_policy, || {
            self.queue.publish(&item)
        })
        .await;

        if let Err(e) = published {
            let reason = format!("could not enqueue task: {}", e);
            let marked: Result<TaskRecord, StoreError> =
                update_task(self.store.as_ref(), &task_id, |task| task.mark_failed(reason)).await;
            if let Err(store_err) = marked {
                tracing::error!(
                    "Task {} left pending after publish failure: {}",
                    task_id,
                    store_err
                );
            }
            return Err(e.into());
        }

        tracing::info!("Task submitted successfully: {} (tax id {})", task_id, tax_id);
        Ok(task_id)
    }

    /// Current state of a task; `NotFound` if it was never issued or has expired.
    pub async fn get_task(&self, task_id: &str) -> Result<TaskRecord, DispatchError> {
        let task_id = TaskId(task_id.to_string());
        match self.store.get(&task_id).await? {
            Some(record) => Ok(record),
            None => {
                tracing::debug!("Task not found: {}", task_id);
                Err(DispatchError::NotFound(task_id.0))
            }
        }
    }
}
