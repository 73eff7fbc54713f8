//! Raw message claims, release, recovery, and context fetches.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use briefwire_common::{ChannelOverrides, RawMessage};

use crate::{db_err, PipelineStore, Result};

#[derive(Debug, FromRow)]
struct RawMessageRow {
    id: Uuid,
    channel_id: i64,
    tg_message_id: i64,
    tg_date: DateTime<Utc>,
    text: String,
    entities_json: Option<serde_json::Value>,
    media_json: Option<serde_json::Value>,
    media_blob: Option<Vec<u8>>,
    canonical_hash: String,
    is_forward: bool,
    inserted_at: DateTime<Utc>,
    processing_started_at: Option<DateTime<Utc>>,
    processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
struct ChannelRow {
    id: i64,
    name: String,
    importance_weight: f64,
    relevance_threshold: f64,
    relevance_threshold_delta: f64,
    auto_relevance_enabled: bool,
}

impl PipelineStore {
    /// Claim up to `limit` unprocessed messages, oldest first, marking each
    /// with `processing_started_at = now()`. Row locks with SKIP LOCKED keep
    /// concurrent workers from claiming the same rows.
    pub async fn claim_unprocessed(&self, limit: i64) -> Result<Vec<RawMessage>> {
        let rows = sqlx::query_as::<_, RawMessageRow>(
            r#"
            UPDATE raw_messages
            SET processing_started_at = now()
            WHERE id IN (
                SELECT id FROM raw_messages
                WHERE processed_at IS NULL AND processing_started_at IS NULL
                ORDER BY inserted_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, channel_id, tg_message_id, tg_date, text,
                      entities_json, media_json, media_blob, canonical_hash,
                      is_forward, inserted_at, processing_started_at, processed_at
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;

        if rows.is_empty() {
            return Ok(vec![]);
        }

        let channel_ids: Vec<i64> = rows.iter().map(|r| r.channel_id).collect();
        let channels = sqlx::query_as::<_, ChannelRow>(
            "SELECT id, name, importance_weight, relevance_threshold,
                    relevance_threshold_delta, auto_relevance_enabled
             FROM channels WHERE id = ANY($1)",
        )
        .bind(&channel_ids)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;

        let by_id: HashMap<i64, ChannelRow> =
            channels.into_iter().map(|c| (c.id, c)).collect();

        Ok(rows
            .into_iter()
            .map(|r| {
                let (name, overrides) = match by_id.get(&r.channel_id) {
                    Some(c) => (
                        c.name.clone(),
                        ChannelOverrides {
                            importance_weight: c.importance_weight,
                            relevance_threshold: c.relevance_threshold,
                            relevance_threshold_delta: c.relevance_threshold_delta,
                            auto_relevance_enabled: c.auto_relevance_enabled,
                        },
                    ),
                    None => (String::new(), ChannelOverrides::default()),
                };
                RawMessage {
                    id: r.id,
                    channel_id: r.channel_id,
                    channel_name: name,
                    tg_message_id: r.tg_message_id,
                    tg_date: r.tg_date,
                    text: r.text,
                    entities_json: r.entities_json,
                    media_json: r.media_json,
                    media_blob: r.media_blob,
                    canonical_hash: r.canonical_hash,
                    is_forward: r.is_forward,
                    inserted_at: r.inserted_at,
                    processing_started_at: r.processing_started_at,
                    processed_at: r.processed_at,
                    overrides,
                }
            })
            .collect())
    }

    /// Unprocessed backlog size.
    pub async fn count_backlog(&self) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM raw_messages WHERE processed_at IS NULL",
        )
        .fetch_one(self.pool())
        .await
        .map_err(db_err)
    }

    /// Recent same-channel message texts strictly before `before`, oldest
    /// first, bounded.
    pub async fn recent_channel_context(
        &self,
        channel_id: i64,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<String>> {
        let mut texts = sqlx::query_scalar::<_, String>(
            r#"
            SELECT text FROM raw_messages
            WHERE channel_id = $1 AND tg_date < $2 AND text <> ''
            ORDER BY tg_date DESC
            LIMIT $3
            "#,
        )
        .bind(channel_id)
        .bind(before)
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;
        texts.reverse();
        Ok(texts)
    }

    pub async fn mark_processed(&self, raw_message_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE raw_messages SET processed_at = now() WHERE id = $1")
            .bind(raw_message_id)
            .execute(self.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Clear a claim so another worker may re-attempt the message.
    pub async fn release_claim(&self, raw_message_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE raw_messages SET processing_started_at = NULL
             WHERE id = $1 AND processed_at IS NULL",
        )
        .bind(raw_message_id)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn release_claims(&self, raw_message_ids: &[Uuid]) -> Result<()> {
        sqlx::query(
            "UPDATE raw_messages SET processing_started_at = NULL
             WHERE id = ANY($1) AND processed_at IS NULL",
        )
        .bind(raw_message_ids)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Clear claims older than `threshold` that never finished, so a later
    /// claim re-attempts them. Returns the number of recovered rows.
    pub async fn recover_stuck(&self, threshold: Duration) -> Result<u64> {
        let cutoff = Utc::now() - threshold;
        let result = sqlx::query(
            "UPDATE raw_messages SET processing_started_at = NULL
             WHERE processing_started_at < $1 AND processed_at IS NULL",
        )
        .bind(cutoff)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}
