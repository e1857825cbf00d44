//! Runs registered source adapters through the consolidation engine.
//!
//! Each source is isolated: an adapter failure aborts only that source's
//! run, leaves its watermark untouched, and the remaining sources proceed.

use chrono::NaiveDate;
use tracing::{info, warn};

use eduthreat_common::ConsolidationOutcome;

use crate::adapter::SourceRegistry;
use crate::engine::ConsolidationEngine;
use crate::report::{IngestReport, SourceReport};
use crate::watermark::WatermarkTracker;

#[derive(Debug, Clone, Default)]
pub struct IngestConfig {
    /// Cap on items per source per run. None means adapter-default depth.
    pub max_items: Option<usize>,
}

pub struct IngestRunner {
    engine: ConsolidationEngine,
    tracker: WatermarkTracker,
    registry: SourceRegistry,
    config: IngestConfig,
}

impl IngestRunner {
    pub fn new(
        engine: ConsolidationEngine,
        tracker: WatermarkTracker,
        registry: SourceRegistry,
        config: IngestConfig,
    ) -> Self {
        Self {
            engine,
            tracker,
            registry,
            config,
        }
    }

    /// Run all registered sources, or only the named ones.
    pub async fn run(&self, selection: Option<&[&str]>) -> IngestReport {
        let mut report = IngestReport::new();
        let run_id = report.run_id;
        info!(%run_id, sources = self.registry.len(), "Starting ingest run");

        for adapter in self.registry.iter() {
            let name = adapter.name();
            if let Some(wanted) = selection {
                if !wanted.contains(&name) {
                    continue;
                }
            }

            let mut source_report = SourceReport::new(name);

            let since = match self.tracker.get(name).await {
                Ok(since) => since,
                Err(e) => {
                    warn!(source = name, error = %e, "Watermark lookup failed, skipping source");
                    source_report.completed = false;
                    source_report.failures += 1;
                    report.sources.push(source_report);
                    continue;
                }
            };
            if since.is_none() {
                info!(source = name, "No watermark yet, adapter should run full historical");
            }

            let drafts = match adapter.collect(since, self.config.max_items).await {
                Ok(drafts) => drafts,
                Err(e) => {
                    // The run aborted before completion: the watermark must
                    // not move, so the next run re-observes this window.
                    warn!(source = name, error = %e, "Source collection failed");
                    source_report.completed = false;
                    source_report.failures += 1;
                    report.sources.push(source_report);
                    continue;
                }
            };

            source_report.drafts = drafts.len();
            let mut observed: Vec<NaiveDate> = Vec::new();

            for draft in &drafts {
                match self.engine.consolidate(draft).await {
                    Ok(ConsolidationOutcome::InsertedNew(_)) => source_report.inserted += 1,
                    Ok(ConsolidationOutcome::MergedInto(_)) => source_report.merged += 1,
                    Ok(ConsolidationOutcome::SkippedDuplicate) => {
                        source_report.skipped_duplicates += 1
                    }
                    Err(e) => {
                        warn!(source = name, error = %e, "Draft consolidation failed");
                        source_report.failures += 1;
                        continue;
                    }
                }
                if let Some(date) = draft.source_published_date.or(draft.incident_date) {
                    observed.push(date);
                }
            }

            if source_report.failures == 0 {
                match self.tracker.advance(name, &observed).await {
                    Ok(watermark) => source_report.watermark = watermark,
                    Err(e) => {
                        warn!(source = name, error = %e, "Watermark advance failed");
                        source_report.failures += 1;
                    }
                }
            }

            info!(
                source = name,
                drafts = source_report.drafts,
                inserted = source_report.inserted,
                merged = source_report.merged,
                duplicates = source_report.skipped_duplicates,
                failures = source_report.failures,
                "Source run complete"
            );
            report.sources.push(source_report);
        }

        info!(
            %run_id,
            inserted = report.inserted(),
            merged = report.merged(),
            duplicates = report.skipped_duplicates(),
            failures = report.failures(),
            "Ingest run complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use anyhow::bail;
    use async_trait::async_trait;

    use eduthreat_common::IncidentDraft;
    use eduthreat_store::{IncidentStore, MemoryStore};

    use crate::adapter::SourceAdapter;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    struct FakeAdapter {
        name: String,
        drafts: Vec<IncidentDraft>,
        fail: bool,
    }

    #[async_trait]
    impl SourceAdapter for FakeAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        async fn collect(
            &self,
            _since: Option<NaiveDate>,
            _max_items: Option<usize>,
        ) -> anyhow::Result<Vec<IncidentDraft>> {
            if self.fail {
                bail!("simulated page fetch failure");
            }
            Ok(self.drafts.clone())
        }
    }

    fn draft(source: &str, event_id: &str, url: &str, published: NaiveDate) -> IncidentDraft {
        let mut d = IncidentDraft::new(source, "Example University");
        d.source_event_id = Some(event_id.to_string());
        d.urls = vec![url.to_string()];
        d.source_published_date = Some(published);
        d
    }

    fn runner_with(store: Arc<MemoryStore>, adapters: Vec<FakeAdapter>) -> IngestRunner {
        let mut registry = SourceRegistry::new();
        for adapter in adapters {
            registry.register(Arc::new(adapter));
        }
        IngestRunner::new(
            ConsolidationEngine::new(store.clone()),
            WatermarkTracker::new(store),
            registry,
            IngestConfig::default(),
        )
    }

    #[tokio::test]
    async fn completed_run_advances_watermark_to_max_observed() {
        let store = Arc::new(MemoryStore::new());
        let runner = runner_with(
            store.clone(),
            vec![FakeAdapter {
                name: "newsa".into(),
                drafts: vec![
                    draft("newsa", "e1", "https://news.example/a", date(2024, 2, 1)),
                    draft("newsa", "e2", "https://news.example/b", date(2024, 3, 1)),
                ],
                fail: false,
            }],
        );

        let report = runner.run(None).await;
        assert_eq!(report.inserted(), 2);
        assert_eq!(report.failures(), 0);
        assert_eq!(
            store.watermark("newsa").await.unwrap(),
            Some(date(2024, 3, 1))
        );
        assert_eq!(report.sources[0].watermark, Some(date(2024, 3, 1)));
    }

    #[tokio::test]
    async fn aborted_run_leaves_watermark_unchanged() {
        let store = Arc::new(MemoryStore::new());
        store
            .advance_watermark("newsa", date(2024, 1, 15))
            .await
            .unwrap();

        let runner = runner_with(
            store.clone(),
            vec![FakeAdapter {
                name: "newsa".into(),
                drafts: Vec::new(),
                fail: true,
            }],
        );

        let report = runner.run(None).await;
        assert_eq!(report.failures(), 1);
        assert!(!report.sources[0].completed);
        assert_eq!(
            store.watermark("newsa").await.unwrap(),
            Some(date(2024, 1, 15))
        );
    }

    #[tokio::test]
    async fn one_failing_source_does_not_stop_the_others() {
        let store = Arc::new(MemoryStore::new());
        let runner = runner_with(
            store.clone(),
            vec![
                FakeAdapter {
                    name: "broken".into(),
                    drafts: Vec::new(),
                    fail: true,
                },
                FakeAdapter {
                    name: "newsb".into(),
                    drafts: vec![draft("newsb", "f1", "https://news.example/x", date(2024, 2, 2))],
                    fail: false,
                },
            ],
        );

        let report = runner.run(None).await;
        assert_eq!(report.sources.len(), 2);
        assert_eq!(report.inserted(), 1);
        assert_eq!(
            store.watermark("newsb").await.unwrap(),
            Some(date(2024, 2, 2))
        );
        assert_eq!(store.watermark("broken").await.unwrap(), None);
    }

    #[tokio::test]
    async fn rerun_of_same_source_counts_duplicates_silently() {
        let store = Arc::new(MemoryStore::new());
        let adapter = || FakeAdapter {
            name: "newsa".into(),
            drafts: vec![draft("newsa", "e1", "https://news.example/a", date(2024, 2, 1))],
            fail: false,
        };

        let runner = runner_with(store.clone(), vec![adapter()]);
        runner.run(None).await;

        let runner = runner_with(store.clone(), vec![adapter()]);
        let report = runner.run(None).await;
        assert_eq!(report.inserted(), 0);
        assert_eq!(report.skipped_duplicates(), 1);
        assert_eq!(report.failures(), 0);
    }

    #[tokio::test]
    async fn selection_restricts_which_sources_run() {
        let store = Arc::new(MemoryStore::new());
        let runner = runner_with(
            store.clone(),
            vec![
                FakeAdapter {
                    name: "newsa".into(),
                    drafts: vec![draft("newsa", "e1", "https://news.example/a", date(2024, 2, 1))],
                    fail: false,
                },
                FakeAdapter {
                    name: "newsb".into(),
                    drafts: vec![draft("newsb", "f1", "https://news.example/b", date(2024, 2, 1))],
                    fail: false,
                },
            ],
        );

        let report = runner.run(Some(&["newsb"])).await;
        assert_eq!(report.sources.len(), 1);
        assert_eq!(report.sources[0].source, "newsb");
        assert_eq!(store.watermark("newsa").await.unwrap(), None);
    }
}
