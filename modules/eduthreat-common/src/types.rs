use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::canonical::canonical_url_set;
use crate::error::EduThreatError;

// --- Enums ---

/// How much a source's reporting is trusted on its own.
/// Ordered so `max()` yields the stronger tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Confidence::Low => write!(f, "low"),
            Confidence::Medium => write!(f, "medium"),
            Confidence::High => write!(f, "high"),
        }
    }
}

impl Confidence {
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "high" => Confidence::High,
            "low" => Confidence::Low,
            _ => Confidence::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Suspected,
    Confirmed,
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentStatus::Suspected => write!(f, "suspected"),
            IncidentStatus::Confirmed => write!(f, "confirmed"),
        }
    }
}

impl IncidentStatus {
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "confirmed" => IncidentStatus::Confirmed,
            _ => IncidentStatus::Suspected,
        }
    }
}

/// How precisely the incident date is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatePrecision {
    Day,
    Month,
    Year,
    Unknown,
}

impl DatePrecision {
    /// Higher is finer. `day` beats `month` beats `year` beats `unknown`.
    pub fn fineness(&self) -> u8 {
        match self {
            DatePrecision::Day => 3,
            DatePrecision::Month => 2,
            DatePrecision::Year => 1,
            DatePrecision::Unknown => 0,
        }
    }

    pub fn from_str_loose(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "day" => DatePrecision::Day,
            "month" => DatePrecision::Month,
            "year" => DatePrecision::Year,
            _ => DatePrecision::Unknown,
        }
    }
}

impl std::fmt::Display for DatePrecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatePrecision::Day => write!(f, "day"),
            DatePrecision::Month => write!(f, "month"),
            DatePrecision::Year => write!(f, "year"),
            DatePrecision::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstitutionType {
    University,
    School,
    ResearchInstitute,
    Unknown,
}

impl std::fmt::Display for InstitutionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstitutionType::University => write!(f, "university"),
            InstitutionType::School => write!(f, "school"),
            InstitutionType::ResearchInstitute => write!(f, "research_institute"),
            InstitutionType::Unknown => write!(f, "unknown"),
        }
    }
}

impl InstitutionType {
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "university" | "college" => InstitutionType::University,
            "school" | "k-12" | "k12" => InstitutionType::School,
            "research_institute" | "research institute" => InstitutionType::ResearchInstitute,
            _ => InstitutionType::Unknown,
        }
    }
}

// --- Consolidation outcome ---

/// What the consolidation engine did with one draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsolidationOutcome {
    /// This source already reported this native item; nothing was written.
    SkippedDuplicate,
    /// A brand-new incident was created.
    InsertedNew(String),
    /// The draft was folded into an existing incident (possibly bridging
    /// several previously separate incidents into the surviving one).
    MergedInto(String),
}

// --- Draft (raw, pre-consolidation observation from one source) ---

/// One source's raw observation of an incident, before entity resolution.
/// Fixed shape with explicit optionals; validated at the ingestion boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentDraft {
    pub source: String,
    /// Source-native stable ID (e.g. a ransomware.live slug). None for
    /// sources without stable native IDs.
    pub source_event_id: Option<String>,

    pub institution_name: String,
    /// Untouched original victim label from the source.
    pub institution_raw_name: Option<String>,
    pub institution_type: Option<InstitutionType>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,

    pub incident_date: Option<NaiveDate>,
    pub date_precision: DatePrecision,
    pub source_published_date: Option<NaiveDate>,

    pub title: Option<String>,
    pub subtitle: Option<String>,

    /// Reference URLs used for entity resolution and later enrichment
    /// (news articles, official statements). Raw form; canonicalized by
    /// the engine.
    pub urls: Vec<String>,

    /// CTI/infra reference URLs, tracked but never fetched for enrichment.
    pub leak_site_url: Option<String>,
    pub source_detail_url: Option<String>,
    pub screenshot_url: Option<String>,

    pub attack_type_hint: Option<String>,
    pub status: IncidentStatus,
    pub confidence: Confidence,
    pub notes: Option<String>,
}

impl IncidentDraft {
    pub fn new(source: impl Into<String>, institution_name: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            source_event_id: None,
            institution_name: institution_name.into(),
            institution_raw_name: None,
            institution_type: None,
            country: None,
            region: None,
            city: None,
            incident_date: None,
            date_precision: DatePrecision::Unknown,
            source_published_date: None,
            title: None,
            subtitle: None,
            urls: Vec::new(),
            leak_site_url: None,
            source_detail_url: None,
            screenshot_url: None,
            attack_type_hint: None,
            status: IncidentStatus::Suspected,
            confidence: Confidence::Medium,
            notes: None,
        }
    }

    /// Boundary validation: a draft must name its source and carry either an
    /// institution label or a title, plus something to resolve identity on.
    pub fn validate(&self) -> Result<(), EduThreatError> {
        if self.source.trim().is_empty() {
            return Err(EduThreatError::Validation("draft has no source".into()));
        }
        if self.institution_name.trim().is_empty() && self.title.as_deref().unwrap_or("").trim().is_empty() {
            return Err(EduThreatError::Validation(format!(
                "draft from {} has neither institution name nor title",
                self.source
            )));
        }
        if self.urls.is_empty() && self.source_event_id.is_none() {
            return Err(EduThreatError::Validation(format!(
                "draft from {} has no reference URLs and no source event id",
                self.source
            )));
        }
        Ok(())
    }

    /// The per-source idempotency key: native event ID, else the first
    /// canonical reference URL.
    pub fn event_key(&self) -> Option<String> {
        if let Some(id) = &self.source_event_id {
            if !id.trim().is_empty() {
                return Some(id.clone());
            }
        }
        canonical_url_set(&self.urls).into_iter().next()
    }
}

// --- Incident (the canonical, deduplicated entity) ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    /// Deterministic, content-derived ID. Stable across merges of the
    /// authoritative constituent record.
    pub incident_id: String,

    pub institution_name: String,
    pub institution_raw_name: Option<String>,
    pub institution_type: Option<InstitutionType>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,

    pub incident_date: Option<NaiveDate>,
    pub date_precision: DatePrecision,
    pub source_published_date: Option<NaiveDate>,

    pub title: Option<String>,
    pub subtitle: Option<String>,

    /// Canonicalized reference URL set.
    pub all_urls: Vec<String>,
    /// URLs that failed document fetch during enrichment.
    pub broken_urls: Vec<String>,
    /// Best article to read, selected by enrichment. Always a member of
    /// `all_urls` when set.
    pub primary_url: Option<String>,

    pub leak_site_url: Option<String>,
    pub source_detail_url: Option<String>,
    pub screenshot_url: Option<String>,

    pub attack_type_hint: Option<String>,
    pub status: IncidentStatus,
    /// Max confidence across contributing sources.
    pub source_confidence: Confidence,
    pub notes: Option<String>,

    pub enriched: bool,
    pub enriched_at: Option<DateTime<Utc>>,
    /// Permanent not-education-relevant skip marker. Skipped incidents are
    /// not selected for enrichment again under default configuration.
    pub skipped_at: Option<DateTime<Utc>>,
    pub skip_reason: Option<String>,
    /// Denormalized one-paragraph summary from the enrichment payload.
    pub summary: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Incident {
    /// Build a brand-new incident from a draft. `canonical_urls` must already
    /// be canonicalized; `incident_id` comes from `make_incident_id`.
    pub fn from_draft(
        incident_id: String,
        draft: &IncidentDraft,
        canonical_urls: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            incident_id,
            institution_name: draft.institution_name.clone(),
            institution_raw_name: draft.institution_raw_name.clone(),
            institution_type: draft.institution_type,
            country: draft.country.clone(),
            region: draft.region.clone(),
            city: draft.city.clone(),
            incident_date: draft.incident_date,
            date_precision: if draft.incident_date.is_some() {
                draft.date_precision
            } else {
                DatePrecision::Unknown
            },
            source_published_date: draft.source_published_date,
            title: draft.title.clone(),
            subtitle: draft.subtitle.clone(),
            all_urls: canonical_urls,
            broken_urls: Vec::new(),
            primary_url: None,
            leak_site_url: draft.leak_site_url.clone(),
            source_detail_url: draft.source_detail_url.clone(),
            screenshot_url: draft.screenshot_url.clone(),
            attack_type_hint: draft.attack_type_hint.clone(),
            status: draft.status,
            source_confidence: draft.confidence,
            notes: draft.notes.clone(),
            enriched: false,
            enriched_at: None,
            skipped_at: None,
            skip_reason: None,
            summary: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Stable, content-derived incident ID: `{source}_{sha256(unique)[..16]}`.
pub fn make_incident_id(source: &str, unique: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(unique.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("{source}_{}", &hex[..16])
}

// --- Attribution and per-source ledger rows ---

/// Records that a source contributed to an incident. Insert-once; repointed
/// to the surviving incident on merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceAttribution {
    pub incident_id: String,
    pub source: String,
    pub source_event_id: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    /// That source's own confidence, distinct from the incident's aggregate.
    pub confidence: Confidence,
}

/// Per-source idempotency ledger row. Existence means "this source already
/// reported this native item". The pointed-at incident may change on merge;
/// nothing else does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEvent {
    pub source: String,
    pub source_event_id: String,
    pub incident_id: String,
    pub first_seen_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_ordering_puts_high_on_top() {
        assert!(Confidence::High > Confidence::Medium);
        assert!(Confidence::Medium > Confidence::Low);
        assert_eq!(Confidence::High.max(Confidence::Low), Confidence::High);
    }

    #[test]
    fn date_precision_fineness_ranks_day_finest() {
        assert!(DatePrecision::Day.fineness() > DatePrecision::Month.fineness());
        assert!(DatePrecision::Month.fineness() > DatePrecision::Year.fineness());
        assert!(DatePrecision::Year.fineness() > DatePrecision::Unknown.fineness());
    }

    #[test]
    fn make_incident_id_is_deterministic() {
        let a = make_incident_id("newsa", "https://news.example/edu-breach");
        let b = make_incident_id("newsa", "https://news.example/edu-breach");
        assert_eq!(a, b);
        assert!(a.starts_with("newsa_"));
        assert_eq!(a.len(), "newsa_".len() + 16);
    }

    #[test]
    fn make_incident_id_differs_by_source_and_key() {
        let a = make_incident_id("newsa", "k1");
        let b = make_incident_id("newsb", "k1");
        let c = make_incident_id("newsa", "k2");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn event_key_prefers_native_id() {
        let mut draft = IncidentDraft::new("ransomware_live", "Example University");
        draft.source_event_id = Some("example-university".into());
        draft.urls = vec!["https://news.example/a".into()];
        assert_eq!(draft.event_key().as_deref(), Some("example-university"));
    }

    #[test]
    fn event_key_falls_back_to_first_canonical_url() {
        let mut draft = IncidentDraft::new("newsa", "Example University");
        draft.urls = vec!["https://WWW.News.example/a/".into()];
        assert_eq!(draft.event_key().as_deref(), Some("https://news.example/a"));
    }

    #[test]
    fn event_key_ignores_blank_native_id() {
        let mut draft = IncidentDraft::new("newsa", "Example University");
        draft.source_event_id = Some("  ".into());
        draft.urls = vec!["https://news.example/a".into()];
        assert_eq!(draft.event_key().as_deref(), Some("https://news.example/a"));
    }

    #[test]
    fn validate_rejects_empty_draft() {
        let draft = IncidentDraft::new("newsa", "");
        assert!(draft.validate().is_err());
    }

    #[test]
    fn validate_requires_urls_or_event_id() {
        let draft = IncidentDraft::new("newsa", "Example University");
        assert!(draft.validate().is_err());

        let mut with_id = draft.clone();
        with_id.source_event_id = Some("e1".into());
        assert!(with_id.validate().is_ok());

        let mut with_url = draft;
        with_url.urls = vec!["https://news.example/a".into()];
        assert!(with_url.validate().is_ok());
    }

    #[test]
    fn from_draft_clears_precision_without_date() {
        let mut draft = IncidentDraft::new("newsa", "Example University");
        draft.urls = vec!["https://news.example/a".into()];
        draft.date_precision = DatePrecision::Day;

        let inc = Incident::from_draft(
            "newsa_abc".into(),
            &draft,
            vec!["https://news.example/a".into()],
            Utc::now(),
        );
        assert_eq!(inc.date_precision, DatePrecision::Unknown);
        assert!(!inc.enriched);
        assert!(inc.primary_url.is_none());
    }
}
