//! The enrichment pipeline.
//!
//! A producer stage fetches supporting documents for pending incidents
//! (I/O-bound, parallel across incidents) and feeds a bounded queue; a
//! small worker pool drives the rate-limited extraction service and commits
//! results. Queue depth bounds give backpressure against the producer when
//! extraction is slow.
//!
//! Per incident: fetch happens-before extraction happens-before commit.
//! Across incidents there is no ordering guarantee.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use rand::Rng;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use eduthreat_common::Incident;
use eduthreat_store::{EnrichOrder, IncidentStore, SaveEnrichment};

use crate::extractor::{ExtractError, Extraction, ExtractionService};
use crate::fetcher::{Document, DocumentFetcher};
use crate::payload;
use crate::report::EnrichReport;

#[derive(Debug, Clone)]
pub struct EnrichConfig {
    /// Cap on reference URLs fetched per incident.
    pub max_urls_per_incident: usize,
    /// Concurrent document fetches across incidents.
    pub fetch_concurrency: usize,
    /// Bounded queue depth between fetch and extraction.
    pub queue_depth: usize,
    /// Extraction worker pool size.
    pub extract_workers: usize,
    /// Attempts per document when the extraction service rate-limits.
    pub max_extract_attempts: u32,
    /// Base backoff; actual delay is base * 3^attempt plus jitter.
    pub backoff_base: Duration,
    pub order: EnrichOrder,
    /// Re-select incidents previously skipped as not relevant.
    pub retry_skipped: bool,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            max_urls_per_incident: 5,
            fetch_concurrency: 4,
            queue_depth: 8,
            extract_workers: 2,
            max_extract_attempts: 3,
            backoff_base: Duration::from_secs(2),
            order: EnrichOrder::OldestFirst,
            retry_skipped: false,
        }
    }
}

/// An incident with its fetched documents, ready for extraction.
struct FetchJob {
    incident: Incident,
    documents: Vec<Document>,
}

enum Outcome {
    Enriched,
    KeptExisting,
    SkippedNotRelevant,
    FailedRetryable,
}

pub struct Enricher {
    store: Arc<dyn IncidentStore>,
    fetcher: Arc<dyn DocumentFetcher>,
    extractor: Arc<dyn ExtractionService>,
    config: EnrichConfig,
    cancelled: Arc<AtomicBool>,
}

impl Enricher {
    pub fn new(
        store: Arc<dyn IncidentStore>,
        fetcher: Arc<dyn DocumentFetcher>,
        extractor: Arc<dyn ExtractionService>,
        config: EnrichConfig,
    ) -> Self {
        Self {
            store,
            fetcher,
            extractor,
            config,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared stop flag. Safe to set at any suspension point: in-flight
    /// commits complete or roll back, everything else stays pending.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub async fn run(&self, limit: Option<usize>) -> Result<EnrichReport> {
        let incidents = self
            .store
            .unenriched_incidents(limit, self.config.order, self.config.retry_skipped)
            .await
            .context("selecting unenriched incidents failed")?;

        let mut report = EnrichReport {
            selected: incidents.len(),
            ..Default::default()
        };
        if incidents.is_empty() {
            return Ok(report);
        }
        let run_id = uuid::Uuid::new_v4();
        info!(%run_id, selected = report.selected, "Starting enrichment run");

        let (tx, rx) = mpsc::channel::<FetchJob>(self.config.queue_depth);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut workers = Vec::new();
        for worker_id in 0..self.config.extract_workers {
            workers.push(tokio::spawn(extraction_worker(
                worker_id,
                rx.clone(),
                self.store.clone(),
                self.extractor.clone(),
                self.config.clone(),
                self.cancelled.clone(),
            )));
        }

        // Producer: parallel fetch, serialized handoff through the bounded
        // channel for backpressure.
        let fetched = futures::stream::iter(incidents.into_iter().map(|incident| {
            let fetcher = self.fetcher.clone();
            let cancelled = self.cancelled.clone();
            let max_urls = self.config.max_urls_per_incident;
            async move { fetch_documents(fetcher, incident, max_urls, cancelled).await }
        }))
        .buffer_unordered(self.config.fetch_concurrency);
        futures::pin_mut!(fetched);

        while let Some((incident, documents, broken)) = fetched.next().await {
            if self.cancelled.load(Ordering::SeqCst) {
                break;
            }
            report.documents_fetched += documents.len();
            report.documents_failed += broken.len();

            if !broken.is_empty() {
                if let Err(e) = self
                    .store
                    .record_broken_urls(&incident.incident_id, &broken)
                    .await
                {
                    warn!(incident_id = %incident.incident_id, error = %e, "Failed to record broken URLs");
                }
            }

            if documents.is_empty() {
                // Transient by assumption: the next run tries again.
                warn!(
                    incident_id = %incident.incident_id,
                    urls = broken.len(),
                    "Every reference URL failed to fetch, incident stays pending"
                );
                report.failed_retryable += 1;
                continue;
            }

            if tx.send(FetchJob { incident, documents }).await.is_err() {
                break;
            }
        }
        drop(tx);

        for worker in workers {
            match worker.await {
                Ok(partial) => report.absorb(partial),
                Err(e) => warn!(error = %e, "Extraction worker panicked"),
            }
        }

        info!(
            %run_id,
            enriched = report.enriched,
            skipped_not_relevant = report.skipped_not_relevant,
            failed_retryable = report.failed_retryable,
            rate_limit_retries = report.rate_limit_retries,
            "Enrichment run complete"
        );
        Ok(report)
    }
}

async fn fetch_documents(
    fetcher: Arc<dyn DocumentFetcher>,
    incident: Incident,
    max_urls: usize,
    cancelled: Arc<AtomicBool>,
) -> (Incident, Vec<Document>, Vec<String>) {
    let mut documents = Vec::new();
    let mut broken = Vec::new();

    for url in incident.all_urls.iter().take(max_urls) {
        if cancelled.load(Ordering::SeqCst) {
            break;
        }
        match fetcher.fetch(url).await {
            Ok(doc) => documents.push(doc),
            Err(e) => {
                warn!(incident_id = %incident.incident_id, url = %url, error = %e, "Reference URL failed to fetch");
                broken.push(url.clone());
            }
        }
    }

    (incident, documents, broken)
}

async fn extraction_worker(
    worker_id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<FetchJob>>>,
    store: Arc<dyn IncidentStore>,
    extractor: Arc<dyn ExtractionService>,
    config: EnrichConfig,
    cancelled: Arc<AtomicBool>,
) -> EnrichReport {
    let mut report = EnrichReport::default();

    loop {
        if cancelled.load(Ordering::SeqCst) {
            break;
        }
        let job = { rx.lock().await.recv().await };
        let Some(job) = job else { break };
        let incident_id = job.incident.incident_id.clone();

        match process_incident(&store, extractor.as_ref(), &config, &cancelled, job, &mut report)
            .await
        {
            Ok(Outcome::Enriched) => report.enriched += 1,
            Ok(Outcome::KeptExisting) => report.kept_existing += 1,
            Ok(Outcome::SkippedNotRelevant) => report.skipped_not_relevant += 1,
            Ok(Outcome::FailedRetryable) => report.failed_retryable += 1,
            Err(e) => {
                warn!(worker_id, incident_id = %incident_id, error = %e, "Enrichment failed, incident stays pending");
                report.failed_retryable += 1;
            }
        }
    }

    report
}

async fn process_incident(
    store: &Arc<dyn IncidentStore>,
    extractor: &dyn ExtractionService,
    config: &EnrichConfig,
    cancelled: &Arc<AtomicBool>,
    job: FetchJob,
    report: &mut EnrichReport,
) -> Result<Outcome> {
    let incident = job.incident;

    let mut relevant: Vec<(String, Value)> = Vec::new();
    let mut irrelevant = 0usize;
    let mut transient = 0usize;

    for document in &job.documents {
        if cancelled.load(Ordering::SeqCst) {
            return Ok(Outcome::FailedRetryable);
        }
        match extract_with_retry(extractor, document, config, cancelled, report).await {
            Some(Extraction {
                is_relevant: true,
                payload: Some(payload),
            }) => relevant.push((document.url.clone(), payload)),
            Some(Extraction {
                is_relevant: false, ..
            }) => irrelevant += 1,
            // Relevant but nothing extractable from this document
            Some(_) => transient += 1,
            None => transient += 1,
        }
    }

    // Primary = the payload covering the most fields; first wins ties.
    let primary = relevant.into_iter().reduce(|best, candidate| {
        if payload::field_coverage(&candidate.1) > payload::field_coverage(&best.1) {
            candidate
        } else {
            best
        }
    });

    if let Some((primary_url, primary_payload)) = primary {
        let projection = payload::flatten(&primary_payload);
        let summary = payload::summary_of(&primary_payload);
        let confidence = payload::confidence_of(&primary_payload);

        let saved = store
            .save_enrichment(SaveEnrichment {
                incident_id: incident.incident_id.clone(),
                primary_url: Some(primary_url.clone()),
                summary,
                payload: primary_payload,
                projection,
                extraction_confidence: confidence,
                force_replace: false,
            })
            .await
            .context("enrichment commit failed")?;

        if saved {
            info!(incident_id = %incident.incident_id, primary_url = %primary_url, "Incident enriched");
            Ok(Outcome::Enriched)
        } else {
            Ok(Outcome::KeptExisting)
        }
    } else if irrelevant > 0 && transient == 0 {
        // Every verdict the service actually returned said "not education".
        // Permanent skip. Failures are never converted into skips: any
        // transient failure above keeps the incident pending instead.
        store
            .mark_skipped(&incident.incident_id, "not education-sector-relevant")
            .await
            .context("skip marker failed")?;
        info!(incident_id = %incident.incident_id, "Incident skipped as not education-sector-relevant");
        Ok(Outcome::SkippedNotRelevant)
    } else {
        debug!(
            incident_id = %incident.incident_id,
            transient,
            "No usable extraction, incident stays pending"
        );
        Ok(Outcome::FailedRetryable)
    }
}

async fn extract_with_retry(
    extractor: &dyn ExtractionService,
    document: &Document,
    config: &EnrichConfig,
    cancelled: &Arc<AtomicBool>,
    report: &mut EnrichReport,
) -> Option<Extraction> {
    for attempt in 0..config.max_extract_attempts {
        if cancelled.load(Ordering::SeqCst) {
            return None;
        }
        match extractor.extract(document).await {
            Ok(extraction) => return Some(extraction),
            Err(ExtractError::RateLimited) => {
                if attempt + 1 < config.max_extract_attempts {
                    report.rate_limit_retries += 1;
                    let backoff = config.backoff_base * 3u32.pow(attempt);
                    let jitter = Duration::from_millis(
                        rand::rng().random_range(0..=(backoff.as_millis() as u64 / 2).max(1)),
                    );
                    warn!(
                        url = %document.url,
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        "Extraction rate limited, retrying after backoff"
                    );
                    tokio::time::sleep(backoff + jitter).await;
                } else {
                    warn!(
                        url = %document.url,
                        attempts = config.max_extract_attempts,
                        "Extraction still rate limited, treating document as failed"
                    );
                }
            }
            Err(ExtractError::InvalidResponse(raw)) => {
                // Logged with the offending response for diagnosis; retryable
                // at the incident level on the next run.
                warn!(url = %document.url, raw_response = %raw, "Extraction response unparseable");
                return None;
            }
            Err(ExtractError::Service(e)) => {
                warn!(url = %document.url, error = %e, "Extraction service error");
                return None;
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;

    use eduthreat_common::{Confidence, IncidentDraft, SourceAttribution, SourceEvent};
    use eduthreat_store::{ConsolidationPlan, MemoryStore};

    // --- Mock collaborators ---

    #[derive(Default)]
    struct MockFetcher {
        pages: HashMap<String, String>,
    }

    impl MockFetcher {
        fn with_page(mut self, url: &str, text: &str) -> Self {
            self.pages.insert(url.to_string(), text.to_string());
            self
        }
    }

    #[async_trait]
    impl DocumentFetcher for MockFetcher {
        async fn fetch(&self, url: &str) -> anyhow::Result<Document> {
            match self.pages.get(url) {
                Some(text) => Ok(Document {
                    url: url.to_string(),
                    text: text.clone(),
                }),
                None => anyhow::bail!("connection refused"),
            }
        }
    }

    /// Scripted per-URL extraction results, consumed in order.
    #[derive(Default)]
    struct MockExtractor {
        script: Mutex<HashMap<String, VecDeque<Result<Extraction, ExtractError>>>>,
    }

    impl MockExtractor {
        fn on(self, url: &str, result: Result<Extraction, ExtractError>) -> Self {
            self.script
                .lock()
                .unwrap()
                .entry(url.to_string())
                .or_default()
                .push_back(result);
            self
        }
    }

    #[async_trait]
    impl ExtractionService for MockExtractor {
        async fn extract(&self, document: &Document) -> Result<Extraction, ExtractError> {
            let mut script = self.script.lock().unwrap();
            match script.get_mut(&document.url).and_then(|q| q.pop_front()) {
                Some(result) => result,
                None => Err(ExtractError::Service("unscripted document".into())),
            }
        }
    }

    fn relevant(payload: Value) -> Result<Extraction, ExtractError> {
        Ok(Extraction {
            is_relevant: true,
            payload: Some(payload),
        })
    }

    fn not_relevant() -> Result<Extraction, ExtractError> {
        Ok(Extraction {
            is_relevant: false,
            payload: Some(json!({"is_education_related": false})),
        })
    }

    // --- Fixtures ---

    async fn seed_incident(store: &MemoryStore, id: &str, urls: &[&str]) {
        let mut draft = IncidentDraft::new("newsa", "Example University");
        draft.urls = urls.iter().map(|u| u.to_string()).collect();
        let now = Utc::now();
        let incident = eduthreat_common::Incident::from_draft(
            id.to_string(),
            &draft,
            urls.iter().map(|u| u.to_string()).collect(),
            now,
        );
        store
            .apply_consolidation(ConsolidationPlan {
                attribution: SourceAttribution {
                    incident_id: id.to_string(),
                    source: "newsa".into(),
                    source_event_id: Some(format!("{id}-event")),
                    first_seen_at: now,
                    confidence: Confidence::Medium,
                },
                source_event: SourceEvent {
                    source: "newsa".into(),
                    source_event_id: format!("{id}-event"),
                    incident_id: id.to_string(),
                    first_seen_at: now,
                },
                incident,
                absorbed: Vec::new(),
            })
            .await
            .unwrap();
    }

    fn fast_config() -> EnrichConfig {
        EnrichConfig {
            backoff_base: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn enricher(
        store: Arc<MemoryStore>,
        fetcher: MockFetcher,
        extractor: MockExtractor,
    ) -> Enricher {
        Enricher::new(
            store,
            Arc::new(fetcher),
            Arc::new(extractor),
            fast_config(),
        )
    }

    fn rich_payload() -> Value {
        json!({
            "is_education_related": true,
            "extraction_confidence": 0.9,
            "summary": "Ransomware encrypted Example University systems",
            "attack_type": "ransomware",
            "threat_actor": "vice society",
            "data_compromised": ["student records"],
        })
    }

    fn sparse_payload() -> Value {
        json!({
            "is_education_related": true,
            "extraction_confidence": 0.5,
            "summary": "Something happened",
            "attack_type": null,
            "threat_actor": null,
            "data_compromised": [],
        })
    }

    // --- Tests ---

    #[tokio::test]
    async fn enriches_and_picks_primary_by_field_coverage() {
        let store = Arc::new(MemoryStore::new());
        seed_incident(&store, "inc1", &["https://a.example/1", "https://b.example/2"]).await;

        let fetcher = MockFetcher::default()
            .with_page("https://a.example/1", "sparse article")
            .with_page("https://b.example/2", "rich article");
        let extractor = MockExtractor::default()
            .on("https://a.example/1", relevant(sparse_payload()))
            .on("https://b.example/2", relevant(rich_payload()));

        let report = enricher(store.clone(), fetcher, extractor)
            .run(None)
            .await
            .unwrap();

        assert_eq!(report.selected, 1);
        assert_eq!(report.enriched, 1);
        assert_eq!(report.failed_retryable, 0);
        assert_eq!(report.documents_fetched, 2);

        let incident = store.incident("inc1").await.unwrap().unwrap();
        assert!(incident.enriched);
        assert!(incident.enriched_at.is_some());
        // The richer payload's URL wins, and it is a member of all_urls
        assert_eq!(incident.primary_url.as_deref(), Some("https://b.example/2"));
        assert!(incident
            .all_urls
            .contains(&incident.primary_url.clone().unwrap()));
        assert_eq!(
            incident.summary.as_deref(),
            Some("Ransomware encrypted Example University systems")
        );

        let record = store.enrichment("inc1").await.unwrap().unwrap();
        assert_eq!(record.payload["attack_type"], "ransomware");
        assert_eq!(record.projection["attack_type"], "ransomware");
        assert_eq!(record.extraction_confidence, Some(0.9));
    }

    #[tokio::test]
    async fn all_urls_failing_leaves_incident_pending() {
        let store = Arc::new(MemoryStore::new());
        seed_incident(&store, "inc1", &["https://dead.example/1", "https://dead.example/2"]).await;

        let report = enricher(store.clone(), MockFetcher::default(), MockExtractor::default())
            .run(None)
            .await
            .unwrap();

        assert_eq!(report.failed_retryable, 1);
        assert_eq!(report.enriched, 0);
        assert_eq!(report.documents_failed, 2);

        let incident = store.incident("inc1").await.unwrap().unwrap();
        assert!(!incident.enriched);
        assert_eq!(incident.broken_urls.len(), 2);

        // Still selectable on the next run
        let pending = store
            .unenriched_incidents(None, EnrichOrder::OldestFirst, false)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn not_relevant_verdict_is_a_permanent_skip() {
        let store = Arc::new(MemoryStore::new());
        seed_incident(&store, "inc1", &["https://a.example/1"]).await;

        let fetcher = MockFetcher::default().with_page("https://a.example/1", "bakery ransomware");
        let extractor = MockExtractor::default().on("https://a.example/1", not_relevant());

        let report = enricher(store.clone(), fetcher, extractor)
            .run(None)
            .await
            .unwrap();
        assert_eq!(report.skipped_not_relevant, 1);
        assert_eq!(report.enriched, 0);

        let incident = store.incident("inc1").await.unwrap().unwrap();
        assert!(!incident.enriched);
        assert!(incident.skipped_at.is_some());
        assert_eq!(
            incident.skip_reason.as_deref(),
            Some("not education-sector-relevant")
        );

        // Default configuration never selects it again
        let fetcher = MockFetcher::default().with_page("https://a.example/1", "bakery ransomware");
        let report = enricher(store.clone(), fetcher, MockExtractor::default())
            .run(None)
            .await
            .unwrap();
        assert_eq!(report.selected, 0);
    }

    #[tokio::test]
    async fn rate_limiting_backs_off_then_succeeds() {
        let store = Arc::new(MemoryStore::new());
        seed_incident(&store, "inc1", &["https://a.example/1"]).await;

        let fetcher = MockFetcher::default().with_page("https://a.example/1", "article");
        let extractor = MockExtractor::default()
            .on("https://a.example/1", Err(ExtractError::RateLimited))
            .on("https://a.example/1", Err(ExtractError::RateLimited))
            .on("https://a.example/1", relevant(rich_payload()));

        let report = enricher(store.clone(), fetcher, extractor)
            .run(None)
            .await
            .unwrap();

        assert_eq!(report.enriched, 1);
        assert_eq!(report.rate_limit_retries, 2);
        assert!(store.incident("inc1").await.unwrap().unwrap().enriched);
    }

    #[tokio::test]
    async fn exhausted_rate_limit_attempts_leave_incident_pending() {
        let store = Arc::new(MemoryStore::new());
        seed_incident(&store, "inc1", &["https://a.example/1"]).await;

        let fetcher = MockFetcher::default().with_page("https://a.example/1", "article");
        let extractor = MockExtractor::default()
            .on("https://a.example/1", Err(ExtractError::RateLimited))
            .on("https://a.example/1", Err(ExtractError::RateLimited))
            .on("https://a.example/1", Err(ExtractError::RateLimited));

        let report = enricher(store.clone(), fetcher, extractor)
            .run(None)
            .await
            .unwrap();

        assert_eq!(report.enriched, 0);
        assert_eq!(report.failed_retryable, 1);
        assert!(!store.incident("inc1").await.unwrap().unwrap().enriched);
        assert!(store.incident("inc1").await.unwrap().unwrap().skipped_at.is_none());
    }

    #[tokio::test]
    async fn unparseable_response_is_retryable_not_a_skip() {
        let store = Arc::new(MemoryStore::new());
        seed_incident(&store, "inc1", &["https://a.example/1"]).await;

        let fetcher = MockFetcher::default().with_page("https://a.example/1", "article");
        let extractor = MockExtractor::default().on(
            "https://a.example/1",
            Err(ExtractError::InvalidResponse("<<<not json>>>".into())),
        );

        let report = enricher(store.clone(), fetcher, extractor)
            .run(None)
            .await
            .unwrap();

        assert_eq!(report.failed_retryable, 1);
        assert_eq!(report.skipped_not_relevant, 0);
        let incident = store.incident("inc1").await.unwrap().unwrap();
        assert!(!incident.enriched);
        assert!(incident.skipped_at.is_none());
    }

    #[tokio::test]
    async fn partial_fetch_failure_still_enriches_from_surviving_document() {
        let store = Arc::new(MemoryStore::new());
        seed_incident(&store, "inc1", &["https://dead.example/1", "https://b.example/2"]).await;

        let fetcher = MockFetcher::default().with_page("https://b.example/2", "article");
        let extractor = MockExtractor::default().on("https://b.example/2", relevant(rich_payload()));

        let report = enricher(store.clone(), fetcher, extractor)
            .run(None)
            .await
            .unwrap();

        assert_eq!(report.enriched, 1);
        assert_eq!(report.documents_failed, 1);
        let incident = store.incident("inc1").await.unwrap().unwrap();
        assert!(incident.enriched);
        assert_eq!(incident.broken_urls, vec!["https://dead.example/1"]);
        assert_eq!(incident.primary_url.as_deref(), Some("https://b.example/2"));
    }

    #[tokio::test]
    async fn mixed_verdicts_with_failures_never_skip() {
        // One doc says not-relevant, the other failed transiently: the
        // incident must stay pending, not be silently skipped.
        let store = Arc::new(MemoryStore::new());
        seed_incident(&store, "inc1", &["https://a.example/1", "https://b.example/2"]).await;

        let fetcher = MockFetcher::default()
            .with_page("https://a.example/1", "article a")
            .with_page("https://b.example/2", "article b");
        let extractor = MockExtractor::default()
            .on("https://a.example/1", not_relevant())
            .on(
                "https://b.example/2",
                Err(ExtractError::Service("boom".into())),
            );

        let report = enricher(store.clone(), fetcher, extractor)
            .run(None)
            .await
            .unwrap();

        assert_eq!(report.skipped_not_relevant, 0);
        assert_eq!(report.failed_retryable, 1);
        assert!(store.incident("inc1").await.unwrap().unwrap().skipped_at.is_none());
    }

    #[tokio::test]
    async fn crashed_commit_is_invisible_and_retryable() {
        let store = Arc::new(MemoryStore::new());
        seed_incident(&store, "inc1", &["https://a.example/1"]).await;
        store.fail_next_save();

        let fetcher = MockFetcher::default().with_page("https://a.example/1", "article");
        let extractor = MockExtractor::default().on("https://a.example/1", relevant(rich_payload()));

        let report = enricher(store.clone(), fetcher, extractor)
            .run(None)
            .await
            .unwrap();
        assert_eq!(report.failed_retryable, 1);

        // Neither the payload nor the flag is observable
        assert!(store.enrichment("inc1").await.unwrap().is_none());
        let incident = store.incident("inc1").await.unwrap().unwrap();
        assert!(!incident.enriched);
        assert!(incident.enriched_at.is_none());

        // The next run completes normally
        let fetcher = MockFetcher::default().with_page("https://a.example/1", "article");
        let extractor = MockExtractor::default().on("https://a.example/1", relevant(rich_payload()));
        let report = enricher(store.clone(), fetcher, extractor)
            .run(None)
            .await
            .unwrap();
        assert_eq!(report.enriched, 1);
        assert!(store.incident("inc1").await.unwrap().unwrap().enriched);
    }

    #[tokio::test]
    async fn cancellation_before_start_processes_nothing() {
        let store = Arc::new(MemoryStore::new());
        seed_incident(&store, "inc1", &["https://a.example/1"]).await;

        let fetcher = MockFetcher::default().with_page("https://a.example/1", "article");
        let extractor = MockExtractor::default().on("https://a.example/1", relevant(rich_payload()));

        let enricher = enricher(store.clone(), fetcher, extractor);
        enricher.cancel_flag().store(true, Ordering::SeqCst);

        let report = enricher.run(None).await.unwrap();
        assert_eq!(report.selected, 1);
        assert_eq!(report.enriched, 0);

        // Nothing half-done: incident untouched and still pending
        let incident = store.incident("inc1").await.unwrap().unwrap();
        assert!(!incident.enriched);
        assert!(store.enrichment("inc1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn respects_selection_limit() {
        let store = Arc::new(MemoryStore::new());
        seed_incident(&store, "inc1", &["https://a.example/1"]).await;
        seed_incident(&store, "inc2", &["https://a.example/2"]).await;

        let fetcher = MockFetcher::default()
            .with_page("https://a.example/1", "article")
            .with_page("https://a.example/2", "article");
        let extractor = MockExtractor::default()
            .on("https://a.example/1", relevant(rich_payload()))
            .on("https://a.example/2", relevant(rich_payload()));

        let report = enricher(store.clone(), fetcher, extractor)
            .run(Some(1))
            .await
            .unwrap();
        assert_eq!(report.selected, 1);
        assert_eq!(report.enriched, 1);
    }
}
