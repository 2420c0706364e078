//! Task Executor Module
//!
//! The queue-facing half of the pipeline: task lifecycle types, the work queue
//! contract and the worker that turns queued work into store updates.
//!
//! ## Architecture Overview
//! 1. **Dispatch**: The API writes a `Pending` record, then publishes a `{task_id, tax_id}`
//!    work item (see `crate::api`).
//! 2. **Delivery**: The queue hands each message to exactly one consumer and keeps it
//!    in flight until it is acknowledged or rejected (at-least-once).
//! 3. **Execution**: A worker marks the task `Processing`, runs the extractor and
//!    writes `Completed`/`Failed`, then settles the message.
//!
//! ## Submodules
//! - **`types`**: `TaskId`, `TaskStatus`, `TaskRecord`, `WorkItem`.
//! - **`queue`**: The `WorkQueue` trait with Redis and in-memory backends.
//! - **`executor`**: The worker loop and its per-message state machine.

pub mod executor;
pub mod queue;
pub mod types;
