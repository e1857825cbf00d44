//! Source adapter seam.
//!
//! Adapters own everything site-specific (HTML/RSS parsing, paging, HTTP);
//! this crate only sees the drafts they produce. The registry is an explicit
//! startup-built mapping — there is no global adapter state.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

use eduthreat_common::{Confidence, IncidentDraft};

/// Produces incident drafts for one named source.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// This source's own confidence tier, stamped on its drafts.
    fn confidence(&self) -> Confidence {
        Confidence::Medium
    }

    /// Collect drafts. `since` is the source's watermark: None means the
    /// source has never completed a run and the adapter should go full
    /// historical; otherwise the adapter only needs to page back far enough
    /// to re-observe items at or after this date.
    async fn collect(
        &self,
        since: Option<NaiveDate>,
        max_items: Option<usize>,
    ) -> Result<Vec<IncidentDraft>>;
}

/// Explicit name-to-adapter mapping, built at startup and passed into the
/// runner. Iteration preserves registration order.
#[derive(Default)]
pub struct SourceRegistry {
    adapters: Vec<Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) -> &mut Self {
        self.adapters.push(adapter);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.iter().find(|a| a.name() == name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn SourceAdapter>> {
        self.adapters.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
