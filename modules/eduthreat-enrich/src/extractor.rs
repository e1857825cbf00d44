//! Structured extraction seam.
//!
//! The extraction service takes one document and returns an opaque
//! structured payload plus a sector-relevance verdict. The payload schema
//! belongs to the service; this crate only counts its non-null fields.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::fetcher::Document;

/// One extraction call's result.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// Whether the service judged the incident education-sector-relevant.
    pub is_relevant: bool,
    /// The structured payload. None when the service could not extract
    /// anything from this document.
    pub payload: Option<Value>,
}

#[derive(Error, Debug)]
pub enum ExtractError {
    /// The service is rate limiting us. Retried with backoff.
    #[error("Extraction service rate limited")]
    RateLimited,

    /// The service answered, but not with parseable structured output.
    /// Carries the raw response for diagnosis.
    #[error("Unparseable extraction response: {0}")]
    InvalidResponse(String),

    #[error("Extraction service error: {0}")]
    Service(String),
}

#[async_trait]
pub trait ExtractionService: Send + Sync {
    async fn extract(&self, document: &Document) -> Result<Extraction, ExtractError>;
}
