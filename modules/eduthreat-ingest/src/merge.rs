//! Merge policy — pure functions applied when folding one incident record
//! into another.
//!
//! First-non-null wins for descriptive scalars, max for confidence, union
//! for URL sets, finer precision for dates. Given the engine's serial
//! processing per incident, merge outcomes are deterministic for a fixed
//! arrival order.

use std::collections::BTreeSet;

use chrono::NaiveDate;

use eduthreat_common::{DatePrecision, Incident, IncidentStatus, InstitutionType};

/// Pick the (date, precision) pairing with the finer precision, regardless
/// of arrival order. Ties keep the first pairing.
pub fn merge_dates(
    a: (Option<NaiveDate>, DatePrecision),
    b: (Option<NaiveDate>, DatePrecision),
) -> (Option<NaiveDate>, DatePrecision) {
    match (a.0, b.0) {
        (None, Some(_)) => b,
        (Some(_), None) | (None, None) => a,
        (Some(_), Some(_)) => {
            if b.1.fineness() > a.1.fineness() {
                b
            } else {
                a
            }
        }
    }
}

fn keep_first(a: &mut Option<String>, b: &Option<String>) {
    if a.as_deref().map(|s| s.trim().is_empty()).unwrap_or(true) {
        *a = b.clone();
    }
}

fn known_type(t: Option<InstitutionType>) -> Option<InstitutionType> {
    match t {
        Some(InstitutionType::Unknown) | None => None,
        known => known,
    }
}

fn union_urls(into: &mut Vec<String>, from: &[String]) {
    for url in from {
        if !into.contains(url) {
            into.push(url.clone());
        }
    }
}

/// Fold `other` into `survivor` per the merge policy. `other` is either a
/// draft promoted to an incident record, or an incident being absorbed by a
/// bridging merge.
pub fn fold_incident(survivor: &mut Incident, other: &Incident) {
    // Quality fields are monotone
    survivor.source_confidence = survivor.source_confidence.max(other.source_confidence);
    if other.status == IncidentStatus::Confirmed {
        survivor.status = IncidentStatus::Confirmed;
    }

    union_urls(&mut survivor.all_urls, &other.all_urls);
    union_urls(&mut survivor.broken_urls, &other.broken_urls);

    if survivor.institution_name.trim().is_empty() {
        survivor.institution_name = other.institution_name.clone();
    }
    keep_first(&mut survivor.institution_raw_name, &other.institution_raw_name);
    if known_type(survivor.institution_type).is_none() {
        if let Some(t) = known_type(other.institution_type) {
            survivor.institution_type = Some(t);
        }
    }
    keep_first(&mut survivor.country, &other.country);
    keep_first(&mut survivor.region, &other.region);
    keep_first(&mut survivor.city, &other.city);
    keep_first(&mut survivor.title, &other.title);
    keep_first(&mut survivor.subtitle, &other.subtitle);
    keep_first(&mut survivor.leak_site_url, &other.leak_site_url);
    keep_first(&mut survivor.source_detail_url, &other.source_detail_url);
    keep_first(&mut survivor.screenshot_url, &other.screenshot_url);
    keep_first(&mut survivor.attack_type_hint, &other.attack_type_hint);
    keep_first(&mut survivor.notes, &other.notes);

    let (date, precision) = merge_dates(
        (survivor.incident_date, survivor.date_precision),
        (other.incident_date, other.date_precision),
    );
    survivor.incident_date = date;
    survivor.date_precision = precision;

    if survivor.source_published_date.is_none() {
        survivor.source_published_date = other.source_published_date;
    }

    // Consolidation never invalidates enrichment. If the absorbed side was
    // the enriched one, its state carries over to the survivor.
    if !survivor.enriched && other.enriched {
        survivor.enriched = true;
        survivor.enriched_at = other.enriched_at;
        survivor.primary_url = other.primary_url.clone();
        keep_first(&mut survivor.summary, &other.summary);
    }
}

/// Build the `merged_from=` audit note, folding `sources` into any set
/// already present in `existing`.
pub fn merge_note(existing: Option<&str>, sources: &BTreeSet<String>) -> String {
    let mut all: BTreeSet<String> = sources.clone();
    let mut rest = existing.unwrap_or("").trim().to_string();

    if let Some(after) = rest.strip_prefix("merged_from=") {
        let (list, tail) = match after.split_once(';') {
            Some((list, tail)) => (list, tail.trim().to_string()),
            None => (after, String::new()),
        };
        for s in list.split(',').filter(|s| !s.is_empty()) {
            all.insert(s.to_string());
        }
        rest = tail;
    }

    let joined = all.into_iter().collect::<Vec<_>>().join(",");
    if rest.is_empty() {
        format!("merged_from={joined}")
    } else {
        format!("merged_from={joined};{rest}")
    }
}
