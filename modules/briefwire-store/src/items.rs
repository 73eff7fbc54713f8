//! Item persistence, dedup probes, and audit logs.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tracing::warn;
use uuid::Uuid;

use briefwire_common::score::cosine_similarity;
use briefwire_common::{GateDecision, Item};

use crate::{db_err, PipelineStore, Result};

#[derive(Debug, FromRow)]
struct EmbeddingRow {
    item_id: Uuid,
    embedding: Vec<f32>,
}

impl PipelineStore {
    /// Persist an item. Idempotent on `raw_message_id` so a re-claimed
    /// message after a partial failure cannot produce a second item.
    pub async fn save_item(&self, item: &Item) -> Result<Uuid> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO items
                (id, raw_message_id, channel_id, relevance_score, importance_score,
                 topic, summary, language, language_source, status,
                 bullet_total_count, bullet_included_count, first_seen_at, error_json)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (raw_message_id) DO UPDATE SET
                relevance_score = EXCLUDED.relevance_score,
                importance_score = EXCLUDED.importance_score,
                topic = EXCLUDED.topic,
                summary = EXCLUDED.summary,
                language = EXCLUDED.language,
                language_source = EXCLUDED.language_source,
                status = EXCLUDED.status,
                bullet_total_count = EXCLUDED.bullet_total_count,
                bullet_included_count = EXCLUDED.bullet_included_count,
                error_json = EXCLUDED.error_json
            RETURNING id
            "#,
        )
        .bind(item.id)
        .bind(item.raw_message_id)
        .bind(item.channel_id)
        .bind(item.relevance_score)
        .bind(item.importance_score)
        .bind(&item.topic)
        .bind(&item.summary)
        .bind(&item.language)
        .bind(item.language_source.as_str())
        .bind(item.status.as_str())
        .bind(item.bullet_total_count)
        .bind(item.bullet_included_count)
        .bind(item.first_seen_at)
        .bind(&item.error_json)
        .fetch_one(self.pool())
        .await
        .map_err(db_err)
    }

    /// Record a persistent per-row failure as an `error` item so the raw
    /// message is not retried forever.
    pub async fn save_item_error(
        &self,
        raw_message_id: Uuid,
        channel_id: i64,
        error_json: serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO items (raw_message_id, channel_id, status, error_json)
            VALUES ($1, $2, 'error', $3)
            ON CONFLICT (raw_message_id) DO UPDATE SET
                status = 'error',
                error_json = EXCLUDED.error_json,
                retry_count = items.retry_count + 1
            "#,
        )
        .bind(raw_message_id)
        .bind(channel_id)
        .bind(error_json)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn save_embedding(&self, item_id: Uuid, embedding: &[f32]) -> Result<()> {
        sqlx::query(
            "INSERT INTO item_embeddings (item_id, embedding) VALUES ($1, $2)
             ON CONFLICT (item_id) DO UPDATE SET embedding = EXCLUDED.embedding",
        )
        .bind(item_id)
        .bind(embedding)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Strict dedup probe: any already-summarized message with the same
    /// canonical hash. Returns the existing item id.
    pub async fn strict_duplicate(
        &self,
        canonical_hash: &str,
        exclude_raw_message_id: Uuid,
    ) -> Result<Option<Uuid>> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT i.id FROM items i
            JOIN raw_messages rm ON rm.id = i.raw_message_id
            WHERE rm.canonical_hash = $1 AND rm.id <> $2 AND i.status <> 'error'
            LIMIT 1
            "#,
        )
        .bind(canonical_hash)
        .bind(exclude_raw_message_id)
        .fetch_optional(self.pool())
        .await
        .map_err(db_err)
    }

    /// Best cosine match above `threshold` among stored item embeddings
    /// created since `min_created_at`, optionally scoped to one channel.
    /// Embeddings are fetched and compared in Rust.
    pub async fn similar_item(
        &self,
        embedding: &[f32],
        min_created_at: DateTime<Utc>,
        channel_id: Option<i64>,
        threshold: f64,
    ) -> Result<Option<(Uuid, f64)>> {
        let rows = sqlx::query_as::<_, EmbeddingRow>(
            r#"
            SELECT e.item_id, e.embedding
            FROM item_embeddings e
            JOIN items i ON i.id = e.item_id
            WHERE i.first_seen_at >= $1
              AND ($2::BIGINT IS NULL OR i.channel_id = $2)
            "#,
        )
        .bind(min_created_at)
        .bind(channel_id)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;

        Ok(best_match(embedding, &rows, threshold))
    }

    /// Best cosine match above `threshold` among embeddings of items rated
    /// `irrelevant` within the lookback window.
    pub async fn similar_irrelevant(
        &self,
        embedding: &[f32],
        min_created_at: DateTime<Utc>,
        threshold: f64,
    ) -> Result<Option<(Uuid, f64)>> {
        let rows = sqlx::query_as::<_, EmbeddingRow>(
            r#"
            SELECT DISTINCT ON (e.item_id) e.item_id, e.embedding
            FROM item_embeddings e
            JOIN channel_ratings r ON r.item_id = e.item_id
            WHERE r.rating = 'irrelevant' AND r.rated_at >= $1
            "#,
        )
        .bind(min_created_at)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;

        Ok(best_match(embedding, &rows, threshold))
    }

    /// Append a relevance-gate decision to the audit trail. Log failures
    /// must not abort the message.
    pub async fn save_gate_log(&self, raw_message_id: Uuid, decision: &GateDecision) {
        let result = sqlx::query(
            r#"
            INSERT INTO relevance_gate_log
                (raw_message_id, decision, confidence, reason, model, prompt_version)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(raw_message_id)
        .bind(decision.verdict.as_str())
        .bind(decision.confidence)
        .bind(&decision.reason)
        .bind(&decision.model)
        .bind(&decision.prompt_version)
        .execute(self.pool())
        .await;
        if let Err(e) = result {
            warn!(%raw_message_id, error = %e, "Failed to write gate log");
        }
    }

    /// Append a drop record. Log failures must not abort the message.
    pub async fn save_drop_log(&self, raw_message_id: Uuid, reason: &str, detail: &str) {
        let result = sqlx::query(
            "INSERT INTO raw_message_drop_log (raw_message_id, reason, detail)
             VALUES ($1, $2, $3)",
        )
        .bind(raw_message_id)
        .bind(reason)
        .bind(detail)
        .execute(self.pool())
        .await;
        if let Err(e) = result {
            warn!(%raw_message_id, reason, error = %e, "Failed to write drop log");
        }
    }
}

fn best_match(embedding: &[f32], rows: &[EmbeddingRow], threshold: f64) -> Option<(Uuid, f64)> {
    let mut best: Option<(Uuid, f64)> = None;
    for row in rows {
        let sim = cosine_similarity(embedding, &row.embedding);
        if sim >= threshold && best.map(|(_, s)| sim > s).unwrap_or(true) {
            best = Some((row.item_id, sim));
        }
    }
    best
}
