//! HTTP API Module
//!
//! The caller-facing side: accepts lookup requests and serves task state for polling.
//!
//! ## Endpoints
//! - `POST /scrape` `{tax_id}` -> `202 {task_id, status: "pending", message}`, `422` on a
//!   malformed tax id.
//! - `GET /results/{task_id}` -> `200 TaskRecord`, `404` if unknown or expired.
//! - `GET /` -> liveness.
//!
//! ## Submodules
//! - **`dispatcher`**: Validation, task creation and publishing (`enqueue_task`, `get_task`).
//! - **`handlers`**: Axum handlers and the router.
//! - **`protocol`**: Endpoint paths and DTOs.

pub mod dispatcher;
pub mod handlers;
pub mod protocol;

#[cfg(test)]
mod tests;
