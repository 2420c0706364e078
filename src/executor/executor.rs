//! Worker Implementation
//!
//! Consumes work items from the `WorkQueue`, drives the `Extractor` and records the
//! outcome in the `TaskStore`. One message is in flight per worker; throughput scales
//! by running more worker instances against the same queue.
//!
//! ## Message lifecycle
//! `received -> processing -> {completed + ack, failed + reject, malformed + reject}`
//! - **Malformed** (no `task_id` / `tax_id`): rejected without touching the store.
//! - **Success**: record marked `completed` with the result, message acknowledged.
//! - **Extractor failure**: record marked `failed` with the error, message rejected
//!   without requeue. No failure class is retried.
//! - **Redelivery of a finished task**: acknowledged without re-running the extractor.
//!
//! Store write failures are logged and never change the message's fate, so an
//! unavailable store cannot cause endless redelivery.
//!
//! ## Consumer lease
//! The worker registers its consumer name before consuming, renews the lease from a
//! background heartbeat and releases it on shutdown. While idle it periodically
//! requeues messages stranded by consumers whose lease expired.

use super::queue::{Delivery, WorkQueue};
use super::types::*;
use crate::error::{QueueError, StoreError};
use crate::extractor::Extractor;
use crate::storage::{update_task, TaskStore};

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// How often an idle worker looks for messages stranded by crashed consumers.
pub const PEER_RECOVERY_INTERVAL: Duration = Duration::from_secs(30);

/// What happened to a single delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Extraction succeeded; message acknowledged.
    Completed,
    /// Extraction failed; message rejected without requeue.
    Failed,
    /// Message lacked `task_id` or `tax_id`; rejected without requeue.
    Malformed,
    /// Task was already terminal (redelivery); message acknowledged.
    AlreadyFinished,
}

/// The engine that drives task execution.
pub struct TaskExecutor {
    /// Source of work items.
    queue: Arc<dyn WorkQueue>,
    /// Shared task records.
    store: Arc<dyn TaskStore>,
    /// Registry lookup.
    extractor: Arc<dyn Extractor>,
    /// How long to sleep when the queue is empty.
    poll_interval: Duration,
}

impl TaskExecutor {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        store: Arc<dyn TaskStore>,
        extractor: Arc<dyn Extractor>,
        poll_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            store,
            extractor,
            poll_interval,
        })
    }

    /// Spawns the consume loop and returns its handle.
    pub fn start(
        self: Arc<Self>,
        shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<Result<(), QueueError>> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// The consume loop. Returns once `shutdown` flips to `true` (or its sender is
    /// dropped); the in-flight message, if any, is always settled first.
    ///
    /// Fails only if the consumer name cannot be claimed.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), QueueError> {
        self.queue.register().await?;
        let heartbeat = self
            .queue
            .heartbeat_interval()
            .map(|every| self.spawn_heartbeat(every));

        self.recover().await;
        let mut last_recovery = Instant::now();

        tracing::info!("Worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.queue.consume().await {
                Ok(Some(delivery)) => {
                    self.process_delivery(&delivery).await;
                    continue;
                }
                Ok(None) => {
                    tracing::trace!("Queue empty, sleeping {:?}", self.poll_interval);
                    if last_recovery.elapsed() >= PEER_RECOVERY_INTERVAL {
                        self.recover().await;
                        last_recovery = Instant::now();
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to consume from queue: {}", e);
                }
            }

            // Sleep if no work to avoid busy-waiting
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        if let Some(heartbeat) = heartbeat {
            heartbeat.abort();
        }
        if let Err(e) = self.queue.release().await {
            tracing::warn!("Failed to release consumer lease: {}", e);
        }

        tracing::info!("Worker stopped");
        Ok(())
    }

    /// Keeps the consumer lease alive, including while a slow fetch is running.
    fn spawn_heartbeat(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let queue = self.queue.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if let Err(e) = queue.heartbeat().await {
                    tracing::warn!("Consumer heartbeat failed: {}", e);
                }
            }
        })
    }

    /// Requeues own leftovers and messages of crashed consumers. Called only
    /// between messages.
    async fn recover(&self) {
        match self.queue.recover_in_flight().await {
            Ok(0) => {}
            Ok(n) => tracing::info!("Recovered {} unsettled messages", n),
            Err(e) => tracing::warn!("Failed to recover in-flight messages: {}", e),
        }
    }

    /// Runs one delivery through the state machine and settles it on the queue.
    pub async fn process_delivery(&self, delivery: &Delivery) -> DeliveryOutcome {
        let Some(item) = RawWorkItem::decode(&delivery.body) else {
            tracing::warn!("Rejecting malformed message: {}", delivery.body);
            self.settle(delivery, false).await;
            return DeliveryOutcome::Malformed;
        };

        tracing::info!("Received task {} (tax id {})", item.task_id, item.tax_id);

        if self.claim(&item.task_id).await.is_break() {
            self.settle(delivery, true).await;
            return DeliveryOutcome::AlreadyFinished;
        }

        match self.extractor.fetch(&item.tax_id).await {
            Ok(record) => {
                self.record_update(&item.task_id, move |task| {
                    if task.status == TaskStatus::Pending {
                        task.mark_processing()?;
                    }
                    task.mark_completed(record)
                })
                .await;
                tracing::info!("Task {} completed", item.task_id);

                self.settle(delivery, true).await;
                DeliveryOutcome::Completed
            }
            Err(e) => {
                tracing::error!("Task {} failed ({}): {}", item.task_id, e.kind(), e);
                let message = e.to_string();
                self.record_update(&item.task_id, move |task| task.mark_failed(message))
                    .await;

                self.settle(delivery, false).await;
                DeliveryOutcome::Failed
            }
        }
    }

    /// Marks the task `processing`. Breaks if the task already reached a terminal
    /// state, in which case the delivery is a duplicate and must not run again.
    async fn claim(&self, task_id: &TaskId) -> ControlFlow<()> {
        match update_task(self.store.as_ref(), task_id, |task| task.mark_processing()).await {
            Ok(_) => {
                tracing::debug!("Claimed task {}", task_id);
                ControlFlow::Continue(())
            }
            Err(StoreError::InvalidTransition { from, .. }) if from.is_terminal() => {
                tracing::info!("Task {} already {:?}, skipping redelivery", task_id, from);
                ControlFlow::Break(())
            }
            Err(e) => {
                tracing::error!("Failed to mark task {} as processing: {}", task_id, e);
                ControlFlow::Continue(())
            }
        }
    }

    async fn record_update<F>(&self, task_id: &TaskId, apply: F)
    where
        F: FnOnce(&mut TaskRecord) -> Result<(), StoreError> + Send,
    {
        if let Err(e) = update_task(self.store.as_ref(), task_id, apply).await {
            tracing::error!("Failed to store outcome of task {}: {}", task_id, e);
        }
    }

    /// Acknowledges (`ack = true`) or rejects without requeue.
    async fn settle(&self, delivery: &Delivery, ack: bool) {
        let result = if ack {
            self.queue.ack(delivery).await
        } else {
            self.queue.reject(delivery).await
        };

        if let Err(e) = result {
            tracing::error!("Failed to settle message (ack={}): {}", ack, e);
        }
    }
}
