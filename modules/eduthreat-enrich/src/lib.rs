//! Enrichment orchestrator.
//!
//! Selects unenriched incidents from the entity store, drives document
//! acquisition and structured extraction through trait seams, classifies
//! each incident's outcome (enriched / permanently skipped / retryable
//! failure), and commits results transactionally alongside a flattened
//! projection for querying and export.

pub mod fetcher;
pub mod extractor;
pub mod ollama;
pub mod orchestrator;
pub mod payload;
pub mod report;

pub use extractor::{ExtractError, Extraction, ExtractionService};
pub use fetcher::{Document, DocumentFetcher, HttpFetcher};
pub use ollama::OllamaExtractor;
pub use orchestrator::{EnrichConfig, Enricher};
pub use report::EnrichReport;
