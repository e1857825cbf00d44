//! Cross-source entity resolution.
//!
//! One draft in, one outcome out: duplicate skip, fresh insert, or a merge
//! into (possibly several, now bridged) existing incidents. Every decision
//! commits as a single [`ConsolidationPlan`] so the store is never left with
//! partial state.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tracing::{debug, info};

use eduthreat_common::{
    canonical_url_set, make_incident_id, ConsolidationOutcome, Incident, IncidentDraft,
    SourceAttribution, SourceEvent,
};
use eduthreat_store::{ConsolidationPlan, IncidentStore};

use crate::merge::{fold_incident, merge_note};

pub struct ConsolidationEngine {
    store: Arc<dyn IncidentStore>,
    /// Consolidation is single-writer: candidate lookup and plan commit must
    /// not interleave for drafts touching the same incident, and serial
    /// processing is what makes merge outcomes deterministic.
    write_lock: tokio::sync::Mutex<()>,
}

impl ConsolidationEngine {
    pub fn new(store: Arc<dyn IncidentStore>) -> Self {
        Self {
            store,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn store(&self) -> Arc<dyn IncidentStore> {
        self.store.clone()
    }

    /// Resolve one draft against the store.
    pub async fn consolidate(&self, draft: &IncidentDraft) -> Result<ConsolidationOutcome> {
        draft.validate()?;

        let canonical = canonical_url_set(&draft.urls);
        let Some(event_key) = draft.event_key() else {
            bail!(
                "draft from {} has no usable event key (no native id, no parseable URL)",
                draft.source
            );
        };

        let _guard = self.write_lock.lock().await;

        if self
            .store
            .source_event(&draft.source, &event_key)
            .await
            .context("idempotency lookup failed")?
            .is_some()
        {
            debug!(source = %draft.source, event_key, "Skipping already-ingested source event");
            return Ok(ConsolidationOutcome::SkippedDuplicate);
        }

        let now = Utc::now();
        let candidates = if canonical.is_empty() {
            Vec::new()
        } else {
            self.store
                .incidents_citing(&canonical)
                .await
                .context("candidate lookup failed")?
        };

        if candidates.is_empty() {
            let incident_id = make_incident_id(&draft.source, &event_key);
            let incident = Incident::from_draft(incident_id.clone(), draft, canonical, now);
            let plan = ConsolidationPlan {
                attribution: self.attribution_for(draft, &incident_id, now),
                source_event: self.source_event_for(draft, &event_key, &incident_id, now),
                incident,
                absorbed: Vec::new(),
            };
            self.store
                .apply_consolidation(plan)
                .await
                .context("insert failed")?;

            info!(incident_id, source = %draft.source, "Inserted new incident");
            return Ok(ConsolidationOutcome::InsertedNew(incident_id));
        }

        // Candidates arrive ordered by (created_at, incident_id); the first
        // is the deterministic survivor and the rest are absorbed.
        let mut survivor = candidates[0].clone();
        let survivor_id = survivor.incident_id.clone();
        let absorbed: Vec<String> = candidates[1..]
            .iter()
            .map(|c| c.incident_id.clone())
            .collect();

        let mut contributing: BTreeSet<String> = BTreeSet::new();
        for candidate in &candidates {
            for attribution in self
                .store
                .attributions(&candidate.incident_id)
                .await
                .context("attribution lookup failed")?
            {
                contributing.insert(attribution.source);
            }
        }
        contributing.insert(draft.source.clone());

        for other in &candidates[1..] {
            fold_incident(&mut survivor, other);
        }
        let draft_record = Incident::from_draft(
            make_incident_id(&draft.source, &event_key),
            draft,
            canonical,
            now,
        );
        fold_incident(&mut survivor, &draft_record);

        if contributing.len() > 1 {
            survivor.notes = Some(merge_note(survivor.notes.as_deref(), &contributing));
        }

        let plan = ConsolidationPlan {
            attribution: self.attribution_for(draft, &survivor_id, now),
            source_event: self.source_event_for(draft, &event_key, &survivor_id, now),
            incident: survivor,
            absorbed: absorbed.clone(),
        };
        self.store
            .apply_consolidation(plan)
            .await
            .context("merge failed")?;

        if absorbed.is_empty() {
            info!(
                incident_id = %survivor_id,
                source = %draft.source,
                "Merged draft into existing incident"
            );
        } else {
            info!(
                incident_id = %survivor_id,
                source = %draft.source,
                absorbed = ?absorbed,
                "Bridging merge: draft connected previously separate incidents"
            );
        }

        Ok(ConsolidationOutcome::MergedInto(survivor_id))
    }

    fn attribution_for(
        &self,
        draft: &IncidentDraft,
        incident_id: &str,
        now: chrono::DateTime<Utc>,
    ) -> SourceAttribution {
        SourceAttribution {
            incident_id: incident_id.to_string(),
            source: draft.source.clone(),
            source_event_id: draft.source_event_id.clone(),
            first_seen_at: now,
            confidence: draft.confidence,
        }
    }

    fn source_event_for(
        &self,
        draft: &IncidentDraft,
        event_key: &str,
        incident_id: &str,
        now: chrono::DateTime<Utc>,
    ) -> SourceEvent {
        SourceEvent {
            source: draft.source.clone(),
            source_event_id: event_key.to_string(),
            incident_id: incident_id.to_string(),
            first_seen_at: now,
        }
    }
}
