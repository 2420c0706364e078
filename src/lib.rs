//! Sintegra Registry Lookup Service
//!
//! This library crate defines the pipeline that turns a lookup request into a
//! canonical registry record: request -> queue -> worker -> extractor -> store -> poll.
//! It serves as the foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//! - **`api`**: The request-facing side. The `Dispatcher` validates tax ids, allocates
//!   task ids, writes the initial record and publishes the work item; the axum
//!   handlers expose it over HTTP.
//! - **`executor`**: Task lifecycle types, the work queue contract (Redis and in-memory)
//!   and the worker loop that drives extraction with explicit ack/reject semantics.
//! - **`extractor`**: Fetches the registry page and normalizes its label/value blocks
//!   into a `ScrapedRecord`.
//! - **`storage`**: The task store contract with a fixed expiry (Redis and in-memory).
//! - **`bootstrap`** / **`config`**: Startup concerns (bounded retry, CLI/env settings).

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod executor;
pub mod extractor;
pub mod storage;
