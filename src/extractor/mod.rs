//! Registry Extractor Module
//!
//! Turns a tax id into a canonical `ScrapedRecord` by querying the registry portal
//! and normalizing the returned page.
//!
//! ## Workflow
//! 1. **Canonicalize**: Strip non-digits, reformat as `XX.XXX.XXX/XXXX-XX`.
//! 2. **Fetch**: One form POST to the registry with browser-like headers, bounded by a timeout.
//! 3. **Parse**: Detect the not-registered notice, otherwise normalize every
//!    label/value block and the economic activity section.
//! 4. **Assemble**: Fixed fields plus an open extension map.
//!
//! Failures are typed (`Transport`, `RemoteRejection`, `Parse`, `InvalidInput`) so
//! the worker can record a meaningful error; none of them is retried.

pub mod client;
pub mod normalize;
pub mod parser;
pub mod types;


use crate::error::ExtractorError;
use types::ScrapedRecord;

use async_trait::async_trait;

/// Anything that can resolve a tax id into a registry record.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn fetch(&self, tax_id: &str) -> Result<ScrapedRecord, ExtractorError>;
}
