//! Postgres implementation of the entity store.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::debug;

use eduthreat_common::{
    Confidence, DatePrecision, Incident, IncidentStatus, InstitutionType, SourceAttribution,
    SourceEvent,
};

use crate::error::Result;
use crate::store::{
    ConsolidationPlan, EnrichOrder, EnrichmentRecord, IncidentStore, SaveEnrichment,
};

pub struct PgIncidentStore {
    pool: PgPool,
}

impl PgIncidentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// --- Row types ---

#[derive(Debug, sqlx::FromRow)]
struct IncidentRow {
    incident_id: String,
    institution_name: String,
    institution_raw_name: Option<String>,
    institution_type: Option<String>,
    country: Option<String>,
    region: Option<String>,
    city: Option<String>,
    incident_date: Option<NaiveDate>,
    date_precision: String,
    source_published_date: Option<NaiveDate>,
    title: Option<String>,
    subtitle: Option<String>,
    all_urls: Vec<String>,
    broken_urls: Vec<String>,
    primary_url: Option<String>,
    leak_site_url: Option<String>,
    source_detail_url: Option<String>,
    screenshot_url: Option<String>,
    attack_type_hint: Option<String>,
    status: String,
    source_confidence: String,
    notes: Option<String>,
    enriched: bool,
    enriched_at: Option<DateTime<Utc>>,
    skipped_at: Option<DateTime<Utc>>,
    skip_reason: Option<String>,
    summary: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<IncidentRow> for Incident {
    fn from(r: IncidentRow) -> Self {
        Incident {
            incident_id: r.incident_id,
            institution_name: r.institution_name,
            institution_raw_name: r.institution_raw_name,
            institution_type: r.institution_type.as_deref().map(InstitutionType::from_str_loose),
            country: r.country,
            region: r.region,
            city: r.city,
            incident_date: r.incident_date,
            date_precision: DatePrecision::from_str_loose(&r.date_precision),
            source_published_date: r.source_published_date,
            title: r.title,
            subtitle: r.subtitle,
            all_urls: r.all_urls,
            broken_urls: r.broken_urls,
            primary_url: r.primary_url,
            leak_site_url: r.leak_site_url,
            source_detail_url: r.source_detail_url,
            screenshot_url: r.screenshot_url,
            attack_type_hint: r.attack_type_hint,
            status: IncidentStatus::from_str_loose(&r.status),
            source_confidence: Confidence::from_str_loose(&r.source_confidence),
            notes: r.notes,
            enriched: r.enriched,
            enriched_at: r.enriched_at,
            skipped_at: r.skipped_at,
            skip_reason: r.skip_reason,
            summary: r.summary,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SourceEventRow {
    source: String,
    source_event_id: String,
    incident_id: String,
    first_seen_at: DateTime<Utc>,
}

impl From<SourceEventRow> for SourceEvent {
    fn from(r: SourceEventRow) -> Self {
        SourceEvent {
            source: r.source,
            source_event_id: r.source_event_id,
            incident_id: r.incident_id,
            first_seen_at: r.first_seen_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AttributionRow {
    incident_id: String,
    source: String,
    source_event_id: String,
    first_seen_at: DateTime<Utc>,
    confidence: String,
}

impl From<AttributionRow> for SourceAttribution {
    fn from(r: AttributionRow) -> Self {
        SourceAttribution {
            incident_id: r.incident_id,
            source: r.source,
            // Empty string is the storage sentinel for "no native event id"
            source_event_id: if r.source_event_id.is_empty() {
                None
            } else {
                Some(r.source_event_id)
            },
            first_seen_at: r.first_seen_at,
            confidence: Confidence::from_str_loose(&r.confidence),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EnrichmentRow {
    incident_id: String,
    payload: serde_json::Value,
    projection: serde_json::Value,
    extraction_confidence: Option<f64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<EnrichmentRow> for EnrichmentRecord {
    fn from(r: EnrichmentRow) -> Self {
        EnrichmentRecord {
            incident_id: r.incident_id,
            payload: r.payload,
            projection: r.projection,
            extraction_confidence: r.extraction_confidence,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

// --- Statement helpers ---

const UPSERT_INCIDENT: &str = r#"
INSERT INTO incidents (
    incident_id, institution_name, institution_raw_name, institution_type,
    country, region, city,
    incident_date, date_precision, source_published_date,
    title, subtitle,
    all_urls, broken_urls, primary_url,
    leak_site_url, source_detail_url, screenshot_url,
    attack_type_hint, status, source_confidence, notes,
    enriched, enriched_at, skipped_at, skip_reason, summary,
    created_at, updated_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
        $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, now())
ON CONFLICT (incident_id) DO UPDATE SET
    institution_name = EXCLUDED.institution_name,
    institution_raw_name = EXCLUDED.institution_raw_name,
    institution_type = EXCLUDED.institution_type,
    country = EXCLUDED.country,
    region = EXCLUDED.region,
    city = EXCLUDED.city,
    incident_date = EXCLUDED.incident_date,
    date_precision = EXCLUDED.date_precision,
    source_published_date = EXCLUDED.source_published_date,
    title = EXCLUDED.title,
    subtitle = EXCLUDED.subtitle,
    all_urls = EXCLUDED.all_urls,
    broken_urls = EXCLUDED.broken_urls,
    primary_url = EXCLUDED.primary_url,
    leak_site_url = EXCLUDED.leak_site_url,
    source_detail_url = EXCLUDED.source_detail_url,
    screenshot_url = EXCLUDED.screenshot_url,
    attack_type_hint = EXCLUDED.attack_type_hint,
    status = EXCLUDED.status,
    source_confidence = EXCLUDED.source_confidence,
    notes = EXCLUDED.notes,
    enriched = EXCLUDED.enriched,
    enriched_at = EXCLUDED.enriched_at,
    skipped_at = EXCLUDED.skipped_at,
    skip_reason = EXCLUDED.skip_reason,
    summary = EXCLUDED.summary,
    updated_at = now()
"#;

fn bind_incident<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    inc: &'q Incident,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(&inc.incident_id)
        .bind(&inc.institution_name)
        .bind(&inc.institution_raw_name)
        .bind(inc.institution_type.map(|t| t.to_string()))
        .bind(&inc.country)
        .bind(&inc.region)
        .bind(&inc.city)
        .bind(inc.incident_date)
        .bind(inc.date_precision.to_string())
        .bind(inc.source_published_date)
        .bind(&inc.title)
        .bind(&inc.subtitle)
        .bind(&inc.all_urls)
        .bind(&inc.broken_urls)
        .bind(&inc.primary_url)
        .bind(&inc.leak_site_url)
        .bind(&inc.source_detail_url)
        .bind(&inc.screenshot_url)
        .bind(&inc.attack_type_hint)
        .bind(inc.status.to_string())
        .bind(inc.source_confidence.to_string())
        .bind(&inc.notes)
        .bind(inc.enriched)
        .bind(inc.enriched_at)
        .bind(inc.skipped_at)
        .bind(&inc.skip_reason)
        .bind(&inc.summary)
        .bind(inc.created_at)
}

#[async_trait]
impl IncidentStore for PgIncidentStore {
    async fn source_event(&self, source: &str, event_key: &str) -> Result<Option<SourceEvent>> {
        let row = sqlx::query_as::<_, SourceEventRow>(
            "SELECT * FROM source_events WHERE source = $1 AND source_event_id = $2",
        )
        .bind(source)
        .bind(event_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn incidents_citing(&self, urls: &[String]) -> Result<Vec<Incident>> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, IncidentRow>(
            "SELECT * FROM incidents WHERE all_urls && $1 ORDER BY created_at ASC, incident_id ASC",
        )
        .bind(urls)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn incident(&self, incident_id: &str) -> Result<Option<Incident>> {
        let row = sqlx::query_as::<_, IncidentRow>(
            "SELECT * FROM incidents WHERE incident_id = $1",
        )
        .bind(incident_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn apply_consolidation(&self, plan: ConsolidationPlan) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        bind_incident(sqlx::query(UPSERT_INCIDENT), &plan.incident)
            .execute(&mut *tx)
            .await?;

        if !plan.absorbed.is_empty() {
            // Repoint the idempotency ledger before the absorbed rows cascade away.
            sqlx::query(
                "UPDATE source_events SET incident_id = $1 WHERE incident_id = ANY($2)",
            )
            .bind(&plan.incident.incident_id)
            .bind(&plan.absorbed)
            .execute(&mut *tx)
            .await?;

            // Move attributions across; identical triples collapse.
            sqlx::query(
                r#"
                INSERT INTO incident_sources (incident_id, source, source_event_id, first_seen_at, confidence)
                SELECT $1, source, source_event_id, first_seen_at, confidence
                FROM incident_sources
                WHERE incident_id = ANY($2)
                ON CONFLICT (incident_id, source, source_event_id) DO NOTHING
                "#,
            )
            .bind(&plan.incident.incident_id)
            .bind(&plan.absorbed)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM incident_sources WHERE incident_id = ANY($1)")
                .bind(&plan.absorbed)
                .execute(&mut *tx)
                .await?;

            // An absorbed incident may carry the only enrichment payload.
            // Repoint it instead of letting the cascade drop it.
            sqlx::query(
                r#"
                UPDATE incident_enrichments SET incident_id = $1
                WHERE incident_id = (
                    SELECT MIN(incident_id) FROM incident_enrichments WHERE incident_id = ANY($2)
                )
                AND NOT EXISTS (
                    SELECT 1 FROM incident_enrichments WHERE incident_id = $1
                )
                "#,
            )
            .bind(&plan.incident.incident_id)
            .bind(&plan.absorbed)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM incidents WHERE incident_id = ANY($1)")
                .bind(&plan.absorbed)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO incident_sources (incident_id, source, source_event_id, first_seen_at, confidence)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (incident_id, source, source_event_id) DO NOTHING
            "#,
        )
        .bind(&plan.attribution.incident_id)
        .bind(&plan.attribution.source)
        .bind(plan.attribution.source_event_id.as_deref().unwrap_or(""))
        .bind(plan.attribution.first_seen_at)
        .bind(plan.attribution.confidence.to_string())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO source_events (source, source_event_id, incident_id, first_seen_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (source, source_event_id) DO NOTHING
            "#,
        )
        .bind(&plan.source_event.source)
        .bind(&plan.source_event.source_event_id)
        .bind(&plan.source_event.incident_id)
        .bind(plan.source_event.first_seen_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            incident_id = %plan.incident.incident_id,
            absorbed = plan.absorbed.len(),
            "Consolidation committed"
        );
        Ok(())
    }

    async fn attributions(&self, incident_id: &str) -> Result<Vec<SourceAttribution>> {
        let rows = sqlx::query_as::<_, AttributionRow>(
            "SELECT * FROM incident_sources WHERE incident_id = $1 ORDER BY first_seen_at ASC",
        )
        .bind(incident_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn source_events_for(&self, incident_id: &str) -> Result<Vec<SourceEvent>> {
        let rows = sqlx::query_as::<_, SourceEventRow>(
            "SELECT * FROM source_events WHERE incident_id = $1 ORDER BY first_seen_at ASC",
        )
        .bind(incident_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn watermark(&self, source: &str) -> Result<Option<NaiveDate>> {
        let row = sqlx::query_as::<_, (Option<NaiveDate>,)>(
            "SELECT last_pubdate FROM source_state WHERE source = $1",
        )
        .bind(source)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|r| r.0))
    }

    async fn advance_watermark(&self, source: &str, latest: NaiveDate) -> Result<()> {
        // GREATEST ignores NULL, so a first-ever advance just takes `latest`.
        sqlx::query(
            r#"
            INSERT INTO source_state (source, last_pubdate)
            VALUES ($1, $2)
            ON CONFLICT (source) DO UPDATE
            SET last_pubdate = GREATEST(source_state.last_pubdate, EXCLUDED.last_pubdate)
            "#,
        )
        .bind(source)
        .bind(latest)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn unenriched_incidents(
        &self,
        limit: Option<usize>,
        order: EnrichOrder,
        include_skipped: bool,
    ) -> Result<Vec<Incident>> {
        let mut sql = String::from(
            "SELECT * FROM incidents WHERE NOT enriched AND cardinality(all_urls) > 0",
        );
        if !include_skipped {
            sql.push_str(" AND skipped_at IS NULL");
        }
        sql.push_str(match order {
            EnrichOrder::OldestFirst => " ORDER BY created_at ASC, incident_id ASC",
            EnrichOrder::NewestFirst => " ORDER BY created_at DESC, incident_id DESC",
        });
        if let Some(n) = limit {
            sql.push_str(&format!(" LIMIT {n}"));
        }

        let rows = sqlx::query_as::<_, IncidentRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn record_broken_urls(&self, incident_id: &str, urls: &[String]) -> Result<()> {
        if urls.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"
            UPDATE incidents
            SET broken_urls = ARRAY(SELECT DISTINCT u FROM unnest(broken_urls || $2::text[]) AS u),
                updated_at = now()
            WHERE incident_id = $1
            "#,
        )
        .bind(incident_id)
        .bind(urls)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_skipped(&self, incident_id: &str, reason: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE incidents
            SET skipped_at = now(), skip_reason = $2, updated_at = now()
            WHERE incident_id = $1
            "#,
        )
        .bind(incident_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_enrichment(&self, save: SaveEnrichment) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        if !save.force_replace {
            let existing = sqlx::query_as::<_, (Option<f64>,)>(
                "SELECT extraction_confidence FROM incident_enrichments WHERE incident_id = $1",
            )
            .bind(&save.incident_id)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some((Some(existing_conf),)) = existing {
                if existing_conf > save.extraction_confidence.unwrap_or(0.0) {
                    debug!(
                        incident_id = %save.incident_id,
                        existing_conf,
                        "Keeping existing enrichment with higher confidence"
                    );
                    return Ok(false);
                }
            }
        }

        sqlx::query(
            r#"
            INSERT INTO incident_enrichments (incident_id, payload, projection, extraction_confidence)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (incident_id) DO UPDATE SET
                payload = EXCLUDED.payload,
                projection = EXCLUDED.projection,
                extraction_confidence = EXCLUDED.extraction_confidence,
                updated_at = now()
            "#,
        )
        .bind(&save.incident_id)
        .bind(&save.payload)
        .bind(&save.projection)
        .bind(save.extraction_confidence)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE incidents
            SET enriched = TRUE,
                enriched_at = now(),
                primary_url = COALESCE($2, primary_url),
                summary = COALESCE($3, summary),
                skipped_at = NULL,
                skip_reason = NULL,
                updated_at = now()
            WHERE incident_id = $1
            "#,
        )
        .bind(&save.incident_id)
        .bind(&save.primary_url)
        .bind(&save.summary)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn enrichment(&self, incident_id: &str) -> Result<Option<EnrichmentRecord>> {
        let row = sqlx::query_as::<_, EnrichmentRow>(
            "SELECT * FROM incident_enrichments WHERE incident_id = $1",
        )
        .bind(incident_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn delete_incident(&self, incident_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM incidents WHERE incident_id = $1")
            .bind(incident_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
