//! Per-source incremental watermark.
//!
//! The stored value is the most recent item date a source has fully
//! consolidated through. It only ever moves forward, and only when a run
//! completes cleanly — an aborted run leaves it untouched so the next run
//! re-observes the same window. Re-observation is cheap because the
//! source-event ledger makes re-ingestion a no-op.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::info;

use eduthreat_store::IncidentStore;

pub struct WatermarkTracker {
    store: Arc<dyn IncidentStore>,
}

impl WatermarkTracker {
    pub fn new(store: Arc<dyn IncidentStore>) -> Self {
        Self { store }
    }

    /// The source's current watermark. None before the first completed run.
    pub async fn get(&self, source: &str) -> Result<Option<NaiveDate>> {
        self.store
            .watermark(source)
            .await
            .context("watermark lookup failed")
    }

    /// Advance to max(existing, max(observed)). Call only after the
    /// source's entire run completed without an unrecoverable error.
    /// A run with no dated items leaves the watermark unchanged.
    pub async fn advance(&self, source: &str, observed: &[NaiveDate]) -> Result<Option<NaiveDate>> {
        if let Some(latest) = observed.iter().max() {
            self.store
                .advance_watermark(source, *latest)
                .await
                .context("watermark advance failed")?;
            info!(source, latest = %latest, "Advanced source watermark");
        }
        self.get(source).await
    }
}
