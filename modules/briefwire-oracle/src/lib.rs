//! OpenAI-compatible HTTP client for the summarizing oracle and the
//! embedding service. Provider selection and circuit-breaking live behind
//! the endpoint; this crate only shapes requests and parses responses.

mod client;
mod prompts;
pub mod util;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::debug;

use briefwire_common::{
    BatchResult, BulletInput, ExtractedBullet, GateResponse, Oracle, OracleMessage, TextEmbedder,
};

use client::HttpClient;

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// HTTP oracle speaking the OpenAI chat-completions dialect.
#[derive(Clone)]
pub struct OracleClient {
    http: HttpClient,
    default_model: String,
}

impl OracleClient {
    pub fn new(api_key: &str) -> Self {
        Self {
            http: HttpClient::new(api_key),
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.http = self.http.with_base_url(url);
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    fn model_for(&self, hint: &str) -> String {
        if hint.is_empty() {
            self.default_model.clone()
        } else {
            hint.to_string()
        }
    }
}

#[async_trait]
impl Oracle for OracleClient {
    async fn process_batch(
        &self,
        messages: &[OracleMessage],
        digest_language: &str,
        model_hint: &str,
        tone: &str,
    ) -> Result<Vec<BatchResult>> {
        let model = self.model_for(model_hint);
        let prompt = prompts::batch_prompt(messages, digest_language, tone);
        debug!(count = messages.len(), model = model.as_str(), "Oracle batch request");
        let raw = self
            .http
            .chat(&model, prompts::BATCH_SYSTEM, &prompt)
            .await?;
        prompts::parse_batch_response(&raw, messages.len())
    }

    async fn translate_text(
        &self,
        text: &str,
        target_lang: &str,
        model_hint: &str,
    ) -> Result<String> {
        let model = self.model_for(model_hint);
        let raw = self
            .http
            .chat(&model, &prompts::translate_system(target_lang), text)
            .await?;
        let translated = raw.trim();
        if translated.is_empty() {
            return Err(anyhow!("Empty translation response"));
        }
        Ok(translated.to_string())
    }

    async fn relevance_gate(
        &self,
        text: &str,
        model_hint: &str,
        prompt: &str,
    ) -> Result<GateResponse> {
        let model = self.model_for(model_hint);
        let raw = self.http.chat(&model, prompt, text).await?;
        let cleaned = util::strip_code_blocks(&raw);
        serde_json::from_str(cleaned)
            .map_err(|e| anyhow!("Invalid gate response: {e}: {cleaned}"))
    }

    async fn extract_bullets(
        &self,
        input: &BulletInput,
        digest_language: &str,
        model_hint: &str,
    ) -> Result<Vec<ExtractedBullet>> {
        let model = self.model_for(model_hint);
        let prompt = prompts::bullets_prompt(input, digest_language);
        let raw = self
            .http
            .chat(&model, prompts::BULLETS_SYSTEM, &prompt)
            .await?;
        prompts::parse_bullets_response(&raw)
    }
}

/// Embedding client over the same OpenAI-compatible surface.
#[derive(Clone)]
pub struct EmbedClient {
    http: HttpClient,
    model: String,
}

impl EmbedClient {
    pub fn new(api_key: &str) -> Self {
        Self {
            http: HttpClient::new(api_key),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.http = self.http.with_base_url(url);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl TextEmbedder for EmbedClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.http.embed(&self.model, text).await
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        self.http.embed_batch(&self.model, &texts).await
    }
}
