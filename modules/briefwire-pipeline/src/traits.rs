//! Storage capability trait for the pipeline. The Postgres implementation
//! lives in `briefwire-store`; tests use the in-memory double from
//! `crate::testing`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use briefwire_common::{
    Bullet, ChannelStats, GateDecision, Item, RawMessage, SummaryCacheEntry,
    WeightedRatingSummary,
};

#[async_trait]
pub trait Storage: Send + Sync {
    // -- claims & lifecycle --

    async fn claim_unprocessed(&self, limit: i64) -> Result<Vec<RawMessage>>;
    async fn count_backlog(&self) -> Result<i64>;
    async fn mark_processed(&self, raw_message_id: Uuid) -> Result<()>;
    async fn release_claims(&self, raw_message_ids: &[Uuid]) -> Result<()>;
    async fn recover_stuck(&self, threshold: Duration) -> Result<u64>;

    // -- enrichment reads --

    async fn recent_channel_context(
        &self,
        channel_id: i64,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<String>>;

    // -- dedup probes --

    async fn strict_duplicate(
        &self,
        canonical_hash: &str,
        exclude_raw_message_id: Uuid,
    ) -> Result<Option<Uuid>>;

    async fn similar_item(
        &self,
        embedding: &[f32],
        min_created_at: DateTime<Utc>,
        channel_id: Option<i64>,
        threshold: f64,
    ) -> Result<Option<(Uuid, f64)>>;

    async fn similar_irrelevant(
        &self,
        embedding: &[f32],
        min_created_at: DateTime<Utc>,
        threshold: f64,
    ) -> Result<Option<(Uuid, f64)>>;

    // -- persistence --

    async fn save_item(&self, item: &Item) -> Result<Uuid>;
    async fn save_item_error(
        &self,
        raw_message_id: Uuid,
        channel_id: i64,
        error_json: serde_json::Value,
    ) -> Result<()>;
    async fn save_embedding(&self, item_id: Uuid, embedding: &[f32]) -> Result<()>;

    // -- audit trails (failures logged, never propagated) --

    async fn save_gate_log(&self, raw_message_id: Uuid, decision: &GateDecision);
    async fn save_drop_log(&self, raw_message_id: Uuid, reason: &str, detail: &str);

    // -- bullets --

    async fn insert_bullet(&self, bullet: &Bullet) -> Result<Uuid>;
    async fn update_bullet_embedding(&self, bullet_id: Uuid, embedding: &[f32]) -> Result<()>;
    async fn bullets_for_dedup(&self, lookback: Duration) -> Result<Vec<Bullet>>;
    async fn mark_bullet_duplicate(&self, bullet_id: Uuid, canonical_id: Uuid) -> Result<()>;
    async fn mark_bullet_ready(&self, bullet_id: Uuid) -> Result<()>;

    // -- summary cache --

    async fn get_summary_cache(
        &self,
        cache_key: &str,
        digest_language: &str,
    ) -> Result<Option<SummaryCacheEntry>>;
    async fn upsert_summary_cache(
        &self,
        cache_key: &str,
        digest_language: &str,
        entry: &SummaryCacheEntry,
    ) -> Result<()>;

    // -- channel statistics --

    async fn get_channel_stats(&self, channel_id: i64) -> Result<Option<ChannelStats>>;
    async fn get_weighted_rating_summary(
        &self,
        channel_id: i64,
        lookback: Duration,
        half_life: Duration,
    ) -> Result<WeightedRatingSummary>;

    // -- follow-up queues --

    async fn enqueue_fact_check(&self, item_id: Uuid, claim: &str) -> Result<bool>;
    async fn enqueue_enrichment(&self, item_id: Uuid) -> Result<bool>;
    async fn count_pending_fact_checks(&self) -> Result<i64>;
    async fn count_pending_enrichment(&self) -> Result<i64>;

    // -- settings --

    async fn get_setting(&self, key: &str) -> Option<serde_json::Value>;
    async fn save_setting(&self, key: &str, value: &serde_json::Value) -> Result<()>;
    async fn delete_setting(&self, key: &str) -> Result<()>;
}
