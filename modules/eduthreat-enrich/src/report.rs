/// Outcome counts for one enrichment run. Failures are isolated per
/// incident/document; nothing here aborts a run.
#[derive(Debug, Clone, Default)]
pub struct EnrichReport {
    /// Incidents selected for this run.
    pub selected: usize,
    /// Incidents enriched and committed.
    pub enriched: usize,
    /// Incidents permanently skipped as not education-sector-relevant.
    pub skipped_not_relevant: usize,
    /// Incidents left pending for the next run.
    pub failed_retryable: usize,
    /// Incidents whose existing higher-confidence payload was kept.
    pub kept_existing: usize,
    /// Documents fetched successfully.
    pub documents_fetched: usize,
    /// Document fetches that failed (recorded as broken URLs).
    pub documents_failed: usize,
    /// Rate-limit retries performed against the extraction service.
    pub rate_limit_retries: usize,
}

impl EnrichReport {
    pub fn absorb(&mut self, other: EnrichReport) {
        self.selected += other.selected;
        self.enriched += other.enriched;
        self.skipped_not_relevant += other.skipped_not_relevant;
        self.failed_retryable += other.failed_retryable;
        self.kept_existing += other.kept_existing;
        self.documents_fetched += other.documents_fetched;
        self.documents_failed += other.documents_failed;
        self.rate_limit_retries += other.rate_limit_retries;
    }
}
