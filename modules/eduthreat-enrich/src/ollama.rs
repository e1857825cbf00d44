//! Ollama-backed extraction service.
//!
//! Thin typed client for an Ollama-compatible chat API with
//! JSON-schema-constrained output. The schema below is this backend's
//! contract; the orchestrator never looks inside the payload beyond the
//! relevance flag, the confidence, and field coverage.

use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use eduthreat_common::Config;

use crate::extractor::{ExtractError, Extraction, ExtractionService};
use crate::fetcher::Document;

/// Cap on article text per extraction call.
const MAX_DOCUMENT_CHARS: usize = 30_000;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TimelineEvent {
    /// ISO date (YYYY-MM-DD) if determinable
    pub date: Option<String>,
    /// "day", "month", "year", or "unknown"
    pub date_precision: Option<String>,
    pub description: String,
}

/// What the LLM returns for one document.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CtiExtraction {
    /// Whether the incident affects the education sector
    pub is_education_related: bool,
    /// Overall extraction confidence (0.0-1.0)
    pub extraction_confidence: f64,
    /// One-paragraph incident summary
    pub summary: String,
    /// Specific institution named in the article, if any
    pub institution_identified: Option<String>,
    /// e.g. "ransomware", "data_breach", "ddos"
    pub attack_type: Option<String>,
    /// Named threat actor or group, if attributed
    pub threat_actor: Option<String>,
    /// Categories of data reported compromised
    pub data_compromised: Vec<String>,
    /// Chronological incident timeline
    pub timeline: Vec<TimelineEvent>,
    /// Reported operational impact
    pub impact: Option<String>,
}

const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are a cyber threat intelligence analyst covering the education sector.

Given one news article or official statement about a suspected cyber incident, you must:
1. Decide whether the incident affects the education sector (universities, colleges, K-12 schools, research institutions, educational organizations). Set is_education_related accordingly.
2. Extract a concise factual summary of the incident.
3. Extract the attack type, threat actor, compromised data categories, timeline, and impact where the article supports them. Use null or empty lists for anything the article does not state.
4. All timeline dates must be absolute ISO dates (YYYY-MM-DD). Resolve relative dates ("last Friday") against the article's publication date when present, and set date_precision honestly.
5. Report extraction_confidence between 0.0 and 1.0 for how well the article supports the extracted fields.

Never invent facts that are not in the article."#;

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

pub struct OllamaExtractor {
    client: reqwest::Client,
    host: String,
    api_key: String,
    model: String,
}

impl OllamaExtractor {
    pub fn new(config: &Config) -> Self {
        Self::with(&config.ollama_host, &config.ollama_api_key, &config.ollama_model)
    }

    pub fn with(host: &str, api_key: &str, model: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to build extraction HTTP client");
        Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl ExtractionService for OllamaExtractor {
    async fn extract(&self, document: &Document) -> Result<Extraction, ExtractError> {
        let text = truncate_chars(&document.text, MAX_DOCUMENT_CHARS);
        let user_prompt = format!(
            "Analyze this article about a suspected cyber incident.\n\nSource URL: {}\n\n---\n\n{}",
            document.url, text
        );

        let schema = schemars::schema_for!(CtiExtraction);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": EXTRACTION_SYSTEM_PROMPT},
                {"role": "user", "content": user_prompt},
            ],
            "stream": false,
            "format": schema,
            "options": {"temperature": 0.2},
        });

        let resp = self
            .client
            .post(format!("{}/api/chat", self.host))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExtractError::Service(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ExtractError::RateLimited);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ExtractError::Service(format!("{status}: {body}")));
        }

        let chat: ChatResponse = resp
            .json()
            .await
            .map_err(|e| ExtractError::Service(format!("unreadable chat response: {e}")))?;

        let payload: Value = serde_json::from_str(&chat.message.content).map_err(|e| {
            warn!(url = %document.url, error = %e, "Extraction response was not JSON");
            ExtractError::InvalidResponse(truncate_chars(&chat.message.content, 2_000))
        })?;

        // Validate shape against the schema we asked for
        let cti: CtiExtraction = serde_json::from_value(payload.clone()).map_err(|e| {
            warn!(url = %document.url, error = %e, "Extraction response did not match schema");
            ExtractError::InvalidResponse(truncate_chars(&chat.message.content, 2_000))
        })?;

        debug!(
            url = %document.url,
            relevant = cti.is_education_related,
            confidence = cti.extraction_confidence,
            "Extraction complete"
        );

        Ok(Extraction {
            is_relevant: cti.is_education_related,
            payload: Some(payload),
        })
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
