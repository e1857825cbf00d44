use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;

use eduthreat_common::{Incident, SourceAttribution, SourceEvent};

use crate::error::Result;

/// Selection order for enrichment candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichOrder {
    OldestFirst,
    NewestFirst,
}

/// The full write set of one consolidation decision, applied atomically.
///
/// A crash mid-apply must leave either no trace of the draft or a fully
/// consistent commit: the surviving incident row, repointed ledger rows,
/// the new attribution, and the new idempotency row all land together.
#[derive(Debug, Clone)]
pub struct ConsolidationPlan {
    /// The surviving incident in its post-merge state (insert or replace).
    pub incident: Incident,
    /// Incidents absorbed by this merge. Their source events and
    /// attributions are repointed to the survivor before the rows go away.
    pub absorbed: Vec<String>,
    /// Attribution for the contributing (source, event) pair. Insert-once.
    pub attribution: SourceAttribution,
    /// Idempotency ledger row for the contributing native item. Insert-once.
    pub source_event: SourceEvent,
}

/// One atomic enrichment commit: opaque payload, flattened projection, and
/// the incident's denormalized enrichment state, all in one transaction.
#[derive(Debug, Clone)]
pub struct SaveEnrichment {
    pub incident_id: String,
    pub primary_url: Option<String>,
    pub summary: Option<String>,
    pub payload: Value,
    pub projection: Value,
    pub extraction_confidence: Option<f64>,
    /// Replace an existing payload even if its confidence is higher.
    pub force_replace: bool,
}

/// Stored enrichment payload plus its flattened projection.
#[derive(Debug, Clone)]
pub struct EnrichmentRecord {
    pub incident_id: String,
    pub payload: Value,
    pub projection: Value,
    pub extraction_confidence: Option<f64>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// The entity store seam. Postgres in production, in-memory in tests.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// Per-source idempotency lookup by (source, event key).
    async fn source_event(&self, source: &str, event_key: &str) -> Result<Option<SourceEvent>>;

    /// All incidents whose canonical URL set intersects `urls`.
    async fn incidents_citing(&self, urls: &[String]) -> Result<Vec<Incident>>;

    async fn incident(&self, incident_id: &str) -> Result<Option<Incident>>;

    /// Apply one consolidation decision in a single transaction.
    async fn apply_consolidation(&self, plan: ConsolidationPlan) -> Result<()>;

    async fn attributions(&self, incident_id: &str) -> Result<Vec<SourceAttribution>>;

    /// All idempotency ledger rows currently pointing at an incident.
    async fn source_events_for(&self, incident_id: &str) -> Result<Vec<SourceEvent>>;

    /// Latest fully consolidated item date for a source. None before the
    /// source's first completed run.
    async fn watermark(&self, source: &str) -> Result<Option<NaiveDate>>;

    /// Monotonic advance: stored value becomes max(existing, `latest`).
    async fn advance_watermark(&self, source: &str, latest: NaiveDate) -> Result<()>;

    /// Incidents eligible for enrichment: unenriched, with at least one
    /// reference URL, excluding permanently skipped ones unless asked.
    async fn unenriched_incidents(
        &self,
        limit: Option<usize>,
        order: EnrichOrder,
        include_skipped: bool,
    ) -> Result<Vec<Incident>>;

    /// Fold fetch-failed URLs into the incident's broken set.
    async fn record_broken_urls(&self, incident_id: &str, urls: &[String]) -> Result<()>;

    /// Stamp the permanent not-relevant skip marker.
    async fn mark_skipped(&self, incident_id: &str, reason: &str) -> Result<()>;

    /// Commit an enrichment result atomically. Returns false when an
    /// existing payload with higher confidence was kept instead.
    async fn save_enrichment(&self, save: SaveEnrichment) -> Result<bool>;

    async fn enrichment(&self, incident_id: &str) -> Result<Option<EnrichmentRecord>>;

    /// Operator-only removal; cascades to attributions, ledger rows, and
    /// the enrichment payload. Returns false if the incident did not exist.
    async fn delete_incident(&self, incident_id: &str) -> Result<bool>;
}
