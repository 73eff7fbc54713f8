use std::env;

use tracing::info;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // Oracle (OpenAI-compatible endpoint)
    pub oracle_api_key: String,
    pub oracle_base_url: Option<String>,

    // Embeddings (empty key disables semantic dedup)
    pub embedding_api_key: String,

    // Fact-check enqueueing requires its own key downstream
    pub fact_check_api_key: String,

    // Digest target language ("ru", "en", ...)
    pub digest_language: String,

    // Worker loop
    pub worker_poll_interval_secs: u64,
    pub batch_size: i64,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            oracle_api_key: required_env("ORACLE_API_KEY"),
            oracle_base_url: env::var("ORACLE_BASE_URL").ok(),
            embedding_api_key: env::var("EMBEDDING_API_KEY").unwrap_or_default(),
            fact_check_api_key: env::var("FACT_CHECK_API_KEY").unwrap_or_default(),
            digest_language: env::var("DIGEST_LANGUAGE").unwrap_or_else(|_| "ru".to_string()),
            worker_poll_interval_secs: env::var("WORKER_POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .expect("WORKER_POLL_INTERVAL_SECS must be a number"),
            batch_size: env::var("BATCH_SIZE")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .expect("BATCH_SIZE must be a number"),
        }
    }

    /// Log the configuration with secrets redacted.
    pub fn log_redacted(&self) {
        info!(
            digest_language = self.digest_language.as_str(),
            poll_interval_secs = self.worker_poll_interval_secs,
            batch_size = self.batch_size,
            embeddings_enabled = !self.embedding_api_key.is_empty(),
            fact_check_enabled = !self.fact_check_api_key.is_empty(),
            "Config loaded"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
