use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // Extraction backend (Ollama-compatible API)
    pub ollama_api_key: String,
    pub ollama_host: String,
    pub ollama_model: String,
}

impl Config {
    /// Load the full configuration. Panics with a clear message if required
    /// vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            ollama_api_key: required_env("OLLAMA_API_KEY"),
            ollama_host: env::var("OLLAMA_HOST").unwrap_or_else(|_| "https://ollama.com".to_string()),
            ollama_model: env::var("OLLAMA_MODEL")
                .unwrap_or_else(|_| "deepseek-v3.1:671b-cloud".to_string()),
        }
    }

    /// Load a minimal config for ingestion-only processes (no LLM keys needed).
    pub fn ingest_from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            ollama_api_key: String::new(),
            ollama_host: String::new(),
            ollama_model: String::new(),
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
