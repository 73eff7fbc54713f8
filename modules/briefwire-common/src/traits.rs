//! Collaborator traits shared by the pipeline and its clients.
//! Implementations live in `briefwire-oracle` (HTTP) and in the pipeline's
//! in-memory test doubles.

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{
    BatchResult, BulletInput, ExtractedBullet, GateResponse, OracleMessage, ResolvedLink,
};

/// The summarization/classification oracle (LLM). The empty string as a
/// model hint means "let the provider pick per task".
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Summarize and score a batch of messages. Result ordering must match
    /// the input ordering.
    async fn process_batch(
        &self,
        messages: &[OracleMessage],
        digest_language: &str,
        model_hint: &str,
        tone: &str,
    ) -> Result<Vec<BatchResult>>;

    async fn translate_text(&self, text: &str, target_lang: &str, model_hint: &str)
        -> Result<String>;

    async fn relevance_gate(
        &self,
        text: &str,
        model_hint: &str,
        prompt: &str,
    ) -> Result<GateResponse>;

    async fn extract_bullets(
        &self,
        input: &BulletInput,
        digest_language: &str,
        model_hint: &str,
    ) -> Result<Vec<ExtractedBullet>>;
}

#[async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;
}

/// No-op embedder for deployments without an embedding key. An empty
/// vector disables semantic dedup downstream.
pub struct NoopEmbedder;

#[async_trait]
impl TextEmbedder for NoopEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![])
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts.into_iter().map(|_| vec![]).collect())
    }
}

/// External web/link resolver. May return fewer links than requested.
#[async_trait]
pub trait LinkResolver: Send + Sync {
    async fn resolve_links(&self, text: &str, max_links: usize) -> Result<Vec<ResolvedLink>>;

    /// Best-effort cache warm-up for the links in `text`; callers spawn
    /// this and never wait for it.
    async fn seed_links(&self, _text: &str) -> Result<()> {
        Ok(())
    }
}

pub struct NoopLinkResolver;

#[async_trait]
impl LinkResolver for NoopLinkResolver {
    async fn resolve_links(&self, _text: &str, _max_links: usize) -> Result<Vec<ResolvedLink>> {
        Ok(vec![])
    }
}
