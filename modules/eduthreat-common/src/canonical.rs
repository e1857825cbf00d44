//! Canonical reference keys.
//!
//! Two incidents are the same real-world event iff they cite at least one
//! identical canonical reference, so everything here exists to make URLs
//! from different sources compare equal: `https://Example.com/a/` and
//! `http://www.example.com/a?utm_source=x` both map to
//! `https://example.com/a`.

use url::Url;

/// Query parameters that carry tracking state, never identity.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "igshid", "mc_cid", "mc_eid", "ref", "ref_src"];

fn is_tracking_param(name: &str) -> bool {
    name.starts_with("utm_") || TRACKING_PARAMS.contains(&name)
}

/// Normalize a raw URL to its canonical comparison key.
///
/// Lowercases scheme and host, folds `http` into `https`, strips default
/// ports, the `www.` host prefix, the fragment, trailing slashes, and known
/// tracking query parameters; remaining query pairs are sorted. Strings that
/// do not parse as URLs fall back to their trimmed form so they still
/// function as opaque keys.
pub fn canonical_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let mut parsed = match Url::parse(trimmed) {
        Ok(u) => u,
        Err(_) => return trimmed.to_string(),
    };

    parsed.set_fragment(None);

    // http and https must compare equal across sources
    if parsed.scheme() == "http" {
        let _ = parsed.set_scheme("https");
    }

    if parsed.port() == Some(443) || parsed.port() == Some(80) {
        let _ = parsed.set_port(None);
    }

    if let Some(host) = parsed.host_str() {
        if let Some(stripped) = host.strip_prefix("www.") {
            let stripped = stripped.to_string();
            let _ = parsed.set_host(Some(&stripped));
        }
    }

    // Drop tracking params, sort the rest for a stable key
    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        parsed.set_query(None);
    } else {
        pairs.sort();
        let joined: Vec<String> = pairs
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={v}")
                }
            })
            .collect();
        parsed.set_query(Some(&joined.join("&")));
    }

    let mut result = parsed.to_string();
    if result.ends_with('/') && parsed.path() != "/" {
        result.pop();
    }
    result
}

/// Canonicalize a list of raw URLs into a deduplicated key set,
/// preserving first-seen order and dropping empties.
pub fn canonical_url_set(urls: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    urls.iter()
        .map(|u| canonical_url(u))
        .filter(|u| !u.is_empty())
        .filter(|u| seen.insert(u.clone()))
        .collect()
}
