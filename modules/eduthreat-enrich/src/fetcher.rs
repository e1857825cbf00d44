//! Document acquisition seam.
//!
//! The orchestrator only needs `fetch(url) -> Document`. Multi-strategy
//! fetching (headless browsers, readability extraction, archive fallbacks)
//! is a fetcher implementation concern and stays outside this crate; the
//! bundled [`HttpFetcher`] is the plain-HTTP baseline.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

/// One fetched supporting document for an incident.
#[derive(Debug, Clone)]
pub struct Document {
    pub url: String,
    pub text: String,
}

#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Document>;
}

/// Anything shorter than this after trimming counts as a failed fetch —
/// cookie walls and bot-check stubs, not articles.
const MIN_CONTENT_CHARS: usize = 100;

const FETCH_TIMEOUT: Duration = Duration::from_secs(20);

/// Plain reqwest GET fetcher.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .expect("Failed to build fetch HTTP client");
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Document> {
        let resp = self
            .client
            .get(url)
            .header("User-Agent", "eduthreat/0.1")
            .send()
            .await
            .context("Document fetch failed")?
            .error_for_status()
            .context("Document fetch returned error status")?;

        let text = resp.text().await.context("Failed to read document body")?;

        if text.trim().len() < MIN_CONTENT_CHARS {
            warn!(url, bytes = text.len(), "Fetched document too short to be an article");
            anyhow::bail!("document content too short ({} chars)", text.trim().len());
        }

        info!(url, bytes = text.len(), "Fetched document");
        Ok(Document {
            url: url.to_string(),
            text,
        })
    }
}
