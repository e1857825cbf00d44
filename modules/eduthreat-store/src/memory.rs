//! In-memory [`IncidentStore`] for collaborator tests.
//!
//! Mirrors the Postgres implementation's transactional semantics: every
//! trait method applies its whole write set under one lock, or nothing at
//! all when a failure is injected. Not intended for production use.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use eduthreat_common::{Incident, SourceAttribution, SourceEvent};

use crate::error::{Result, StoreError};
use crate::store::{
    ConsolidationPlan, EnrichOrder, EnrichmentRecord, IncidentStore, SaveEnrichment,
};

#[derive(Default)]
struct State {
    incidents: BTreeMap<String, Incident>,
    attributions: BTreeMap<(String, String, String), SourceAttribution>,
    source_events: BTreeMap<(String, String), SourceEvent>,
    watermarks: BTreeMap<String, NaiveDate>,
    enrichments: BTreeMap<String, EnrichmentRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_next_save: AtomicBool,
    fail_next_consolidation: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `save_enrichment` fail before writing anything,
    /// simulating a transaction that rolled back.
    pub fn fail_next_save(&self) {
        self.fail_next_save.store(true, Ordering::SeqCst);
    }

    /// Make the next `apply_consolidation` fail before writing anything.
    pub fn fail_next_consolidation(&self) {
        self.fail_next_consolidation.store(true, Ordering::SeqCst);
    }

    pub fn incident_count(&self) -> usize {
        self.state.lock().unwrap().incidents.len()
    }
}

fn attribution_key(a: &SourceAttribution) -> (String, String, String) {
    (
        a.incident_id.clone(),
        a.source.clone(),
        a.source_event_id.clone().unwrap_or_default(),
    )
}

#[async_trait]
impl IncidentStore for MemoryStore {
    async fn source_event(&self, source: &str, event_key: &str) -> Result<Option<SourceEvent>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .source_events
            .get(&(source.to_string(), event_key.to_string()))
            .cloned())
    }

    async fn incidents_citing(&self, urls: &[String]) -> Result<Vec<Incident>> {
        let state = self.state.lock().unwrap();
        let mut hits: Vec<Incident> = state
            .incidents
            .values()
            .filter(|inc| inc.all_urls.iter().any(|u| urls.contains(u)))
            .cloned()
            .collect();
        hits.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.incident_id.cmp(&b.incident_id))
        });
        Ok(hits)
    }

    async fn incident(&self, incident_id: &str) -> Result<Option<Incident>> {
        let state = self.state.lock().unwrap();
        Ok(state.incidents.get(incident_id).cloned())
    }

    async fn apply_consolidation(&self, plan: ConsolidationPlan) -> Result<()> {
        if self.fail_next_consolidation.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Database("injected consolidation failure".into()));
        }

        let mut state = self.state.lock().unwrap();
        let survivor_id = plan.incident.incident_id.clone();

        let mut incident = plan.incident;
        if let Some(existing) = state.incidents.get(&survivor_id) {
            incident.created_at = existing.created_at;
        }
        incident.updated_at = Utc::now();
        state.incidents.insert(survivor_id.clone(), incident);

        for absorbed in &plan.absorbed {
            for event in state.source_events.values_mut() {
                if &event.incident_id == absorbed {
                    event.incident_id = survivor_id.clone();
                }
            }
            let moved: Vec<SourceAttribution> = state
                .attributions
                .iter()
                .filter(|((id, _, _), _)| id == absorbed)
                .map(|(_, a)| a.clone())
                .collect();
            state.attributions.retain(|(id, _, _), _| id != absorbed);
            for mut a in moved {
                a.incident_id = survivor_id.clone();
                state.attributions.entry(attribution_key(&a)).or_insert(a);
            }
            state.incidents.remove(absorbed);
            // The absorbed incident may carry the only enrichment payload
            if let Some(mut record) = state.enrichments.remove(absorbed) {
                if !state.enrichments.contains_key(&survivor_id) {
                    record.incident_id = survivor_id.clone();
                    state.enrichments.insert(survivor_id.clone(), record);
                }
            }
        }

        state
            .attributions
            .entry(attribution_key(&plan.attribution))
            .or_insert(plan.attribution);

        let event_key = (
            plan.source_event.source.clone(),
            plan.source_event.source_event_id.clone(),
        );
        state.source_events.entry(event_key).or_insert(plan.source_event);

        Ok(())
    }

    async fn attributions(&self, incident_id: &str) -> Result<Vec<SourceAttribution>> {
        let state = self.state.lock().unwrap();
        let mut rows: Vec<SourceAttribution> = state
            .attributions
            .values()
            .filter(|a| a.incident_id == incident_id)
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.first_seen_at);
        Ok(rows)
    }

    async fn source_events_for(&self, incident_id: &str) -> Result<Vec<SourceEvent>> {
        let state = self.state.lock().unwrap();
        let mut rows: Vec<SourceEvent> = state
            .source_events
            .values()
            .filter(|e| e.incident_id == incident_id)
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.first_seen_at);
        Ok(rows)
    }

    async fn watermark(&self, source: &str) -> Result<Option<NaiveDate>> {
        let state = self.state.lock().unwrap();
        Ok(state.watermarks.get(source).copied())
    }

    async fn advance_watermark(&self, source: &str, latest: NaiveDate) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let entry = state.watermarks.entry(source.to_string()).or_insert(latest);
        if latest > *entry {
            *entry = latest;
        }
        Ok(())
    }

    async fn unenriched_incidents(
        &self,
        limit: Option<usize>,
        order: EnrichOrder,
        include_skipped: bool,
    ) -> Result<Vec<Incident>> {
        let state = self.state.lock().unwrap();
        let mut pending: Vec<Incident> = state
            .incidents
            .values()
            .filter(|inc| !inc.enriched && !inc.all_urls.is_empty())
            .filter(|inc| include_skipped || inc.skipped_at.is_none())
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            let cmp = a
                .created_at
                .cmp(&b.created_at)
                .then_with(|| a.incident_id.cmp(&b.incident_id));
            match order {
                EnrichOrder::OldestFirst => cmp,
                EnrichOrder::NewestFirst => cmp.reverse(),
            }
        });
        if let Some(n) = limit {
            pending.truncate(n);
        }
        Ok(pending)
    }

    async fn record_broken_urls(&self, incident_id: &str, urls: &[String]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(inc) = state.incidents.get_mut(incident_id) {
            for url in urls {
                if !inc.broken_urls.contains(url) {
                    inc.broken_urls.push(url.clone());
                }
            }
            inc.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_skipped(&self, incident_id: &str, reason: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(inc) = state.incidents.get_mut(incident_id) {
            inc.skipped_at = Some(Utc::now());
            inc.skip_reason = Some(reason.to_string());
            inc.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn save_enrichment(&self, save: SaveEnrichment) -> Result<bool> {
        if self.fail_next_save.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Database("injected save failure".into()));
        }

        let mut state = self.state.lock().unwrap();

        if !save.force_replace {
            if let Some(existing) = state.enrichments.get(&save.incident_id) {
                if existing.extraction_confidence.unwrap_or(0.0)
                    > save.extraction_confidence.unwrap_or(0.0)
                {
                    return Ok(false);
                }
            }
        }

        let now = Utc::now();
        let created_at = state
            .enrichments
            .get(&save.incident_id)
            .map(|e| e.created_at)
            .unwrap_or(now);
        state.enrichments.insert(
            save.incident_id.clone(),
            EnrichmentRecord {
                incident_id: save.incident_id.clone(),
                payload: save.payload,
                projection: save.projection,
                extraction_confidence: save.extraction_confidence,
                created_at,
                updated_at: now,
            },
        );

        let inc = state
            .incidents
            .get_mut(&save.incident_id)
            .ok_or_else(|| StoreError::NotFound(save.incident_id.clone()))?;
        inc.enriched = true;
        inc.enriched_at = Some(now);
        if save.primary_url.is_some() {
            inc.primary_url = save.primary_url;
        }
        if save.summary.is_some() {
            inc.summary = save.summary;
        }
        inc.skipped_at = None;
        inc.skip_reason = None;
        inc.updated_at = now;

        Ok(true)
    }

    async fn enrichment(&self, incident_id: &str) -> Result<Option<EnrichmentRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state.enrichments.get(incident_id).cloned())
    }

    async fn delete_incident(&self, incident_id: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let existed = state.incidents.remove(incident_id).is_some();
        if existed {
            state.attributions.retain(|(id, _, _), _| id != incident_id);
            state.source_events.retain(|_, e| e.incident_id != incident_id);
            state.enrichments.remove(incident_id);
        }
        Ok(existed)
    }
}
