//! Ingestion & consolidation engine.
//!
//! Source adapters hand raw [`eduthreat_common::IncidentDraft`]s to the
//! [`ConsolidationEngine`], which resolves them against the entity store:
//! per-source idempotency first, then cross-source merge-by-shared-reference.
//! The [`WatermarkTracker`] bounds how far back incremental adapter runs must
//! page, and the [`IngestRunner`] ties adapters, engine, and watermarks into
//! one fault-isolated run.

pub mod adapter;
pub mod engine;
pub mod merge;
pub mod report;
pub mod runner;
pub mod watermark;

pub use adapter::{SourceAdapter, SourceRegistry};
pub use engine::ConsolidationEngine;
pub use report::{IngestReport, SourceReport};
pub use runner::{IngestConfig, IngestRunner};
pub use watermark::WatermarkTracker;
