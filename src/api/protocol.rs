//! HTTP Protocol Definitions
//!
//! Endpoint paths and the request/response bodies of the public API.

use crate::executor::types::TaskId;
use serde::{Deserialize, Serialize};

pub const ENDPOINT_ROOT: &str = "/";
pub const ENDPOINT_SCRAPE: &str = "/scrape";
pub const ENDPOINT_RESULTS: &str = "/results/:task_id";

pub const TASK_CREATED_MESSAGE: &str = "Scraping task created";
pub const API_RUNNING_MESSAGE: &str = "API is running";

/// Body of `POST /scrape`. `cnpj` is accepted as a legacy alias.
#[derive(Debug, Serialize, Deserialize)]
pub struct ScrapeRequest {
    #[serde(alias = "cnpj")]
    pub tax_id: String,
}

/// `202 Accepted` answer to `POST /scrape`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ScrapeResponse {
    pub task_id: TaskId,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Body of every non-2xx answer.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}
