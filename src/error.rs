//! Error Taxonomy
//!
//! Typed errors for each layer of the pipeline. Extractor errors never cross the
//! queue boundary: the worker records them into the task and drops the message.
//! Dispatcher errors are the only ones surfaced to HTTP callers.

use crate::executor::types::TaskStatus;
use thiserror::Error;

/// Failure while fetching or interpreting a registry page.
#[derive(Debug, Error)]
pub enum ExtractorError {
    /// The tax id could not be canonicalized into the registry's punctuated form.
    #[error("invalid tax id: {0}")]
    InvalidInput(String),

    /// Network failure, timeout, or non-2xx answer from the registry.
    #[error("transport error: {0}")]
    Transport(String),

    /// The registry answered with a notice instead of a record.
    #[error("registry rejected the query: {0}")]
    RemoteRejection(String),

    /// The page shape was not recognized.
    #[error("unrecognized registry page: {0}")]
    Parse(String),
}

impl ExtractorError {
    /// Stable identifier for the failure class, stored alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractorError::InvalidInput(_) => "invalid_input",
            ExtractorError::Transport(_) => "transport",
            ExtractorError::RemoteRejection(_) => "remote_rejection",
            ExtractorError::Parse(_) => "parse",
        }
    }
}

impl From<reqwest::Error> for ExtractorError {
    fn from(err: reqwest::Error) -> Self {
        ExtractorError::Transport(err.to_string())
    }
}

/// Failure while reading or writing task records.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task store unavailable: {0}")]
    Unavailable(String),

    #[error("stored task record is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("task {0} not found")]
    NotFound(String),

    #[error("task {task_id}: illegal transition {from:?} -> {to:?}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Failure while talking to the work queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("work queue unavailable: {0}")]
    Unavailable(String),

    #[error("failed to encode work item: {0}")]
    Encode(#[from] serde_json::Error),

    /// Another live consumer holds this consumer name.
    #[error("consumer {0} is already active on this queue")]
    ConsumerActive(String),
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::Unavailable(err.to_string())
    }
}

/// Errors surfaced synchronously by the dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0}")]
    Validation(String),

    #[error("task {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}
