//! Entity store for the eduthreat core.
//!
//! Owns all durability and transaction boundaries: incidents, source
//! attributions, the per-source idempotency ledger, source watermarks, and
//! enrichment payloads. Consumers talk to the [`IncidentStore`] trait; the
//! Postgres implementation enforces every cross-cutting invariant at the
//! transaction boundary.

pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod pg;
pub mod store;

pub use error::{Result, StoreError};
#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryStore;
pub use pg::PgIncidentStore;
pub use store::{
    ConsolidationPlan, EnrichOrder, EnrichmentRecord, IncidentStore, SaveEnrichment,
};
