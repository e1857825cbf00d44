use chrono::NaiveDate;
use uuid::Uuid;

/// Per-source outcome counts for one ingest run.
#[derive(Debug, Clone, Default)]
pub struct SourceReport {
    pub source: String,
    pub drafts: usize,
    pub inserted: usize,
    pub merged: usize,
    pub skipped_duplicates: usize,
    pub failures: usize,
    /// Whether the adapter's collection itself completed.
    pub completed: bool,
    /// The watermark after this run, if it was advanced.
    pub watermark: Option<NaiveDate>,
}

impl SourceReport {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            completed: true,
            ..Default::default()
        }
    }
}

/// Aggregated outcome of one ingest run across all selected sources.
/// No single bad record aborts a run; everything lands in these counts.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub run_id: Uuid,
    pub sources: Vec<SourceReport>,
}

impl IngestReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            sources: Vec::new(),
        }
    }

    pub fn inserted(&self) -> usize {
        self.sources.iter().map(|s| s.inserted).sum()
    }

    pub fn merged(&self) -> usize {
        self.sources.iter().map(|s| s.merged).sum()
    }

    pub fn skipped_duplicates(&self) -> usize {
        self.sources.iter().map(|s| s.skipped_duplicates).sum()
    }

    pub fn failures(&self) -> usize {
        self.sources.iter().map(|s| s.failures).sum()
    }
}

impl Default for IngestReport {
    fn default() -> Self {
        Self::new()
    }
}
