//! Glue between the pipeline's `Storage` capability trait and the
//! Postgres store.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use briefwire_common::{
    Bullet, ChannelStats, GateDecision, Item, RawMessage, SummaryCacheEntry,
    WeightedRatingSummary,
};
use briefwire_store::PipelineStore;

use crate::traits::Storage;

#[async_trait]
impl Storage for PipelineStore {
    async fn claim_unprocessed(&self, limit: i64) -> Result<Vec<RawMessage>> {
        Ok(PipelineStore::claim_unprocessed(self, limit).await?)
    }

    async fn count_backlog(&self) -> Result<i64> {
        Ok(PipelineStore::count_backlog(self).await?)
    }

    async fn mark_processed(&self, raw_message_id: Uuid) -> Result<()> {
        Ok(PipelineStore::mark_processed(self, raw_message_id).await?)
    }

    async fn release_claims(&self, raw_message_ids: &[Uuid]) -> Result<()> {
        Ok(PipelineStore::release_claims(self, raw_message_ids).await?)
    }

    async fn recover_stuck(&self, threshold: Duration) -> Result<u64> {
        Ok(PipelineStore::recover_stuck(self, threshold).await?)
    }

    async fn recent_channel_context(
        &self,
        channel_id: i64,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<String>> {
        Ok(PipelineStore::recent_channel_context(self, channel_id, before, limit).await?)
    }

    async fn strict_duplicate(
        &self,
        canonical_hash: &str,
        exclude_raw_message_id: Uuid,
    ) -> Result<Option<Uuid>> {
        Ok(PipelineStore::strict_duplicate(self, canonical_hash, exclude_raw_message_id).await?)
    }

    async fn similar_item(
        &self,
        embedding: &[f32],
        min_created_at: DateTime<Utc>,
        channel_id: Option<i64>,
        threshold: f64,
    ) -> Result<Option<(Uuid, f64)>> {
        Ok(PipelineStore::similar_item(self, embedding, min_created_at, channel_id, threshold)
            .await?)
    }

    async fn similar_irrelevant(
        &self,
        embedding: &[f32],
        min_created_at: DateTime<Utc>,
        threshold: f64,
    ) -> Result<Option<(Uuid, f64)>> {
        Ok(PipelineStore::similar_irrelevant(self, embedding, min_created_at, threshold).await?)
    }

    async fn save_item(&self, item: &Item) -> Result<Uuid> {
        Ok(PipelineStore::save_item(self, item).await?)
    }

    async fn save_item_error(
        &self,
        raw_message_id: Uuid,
        channel_id: i64,
        error_json: serde_json::Value,
    ) -> Result<()> {
        Ok(PipelineStore::save_item_error(self, raw_message_id, channel_id, error_json).await?)
    }

    async fn save_embedding(&self, item_id: Uuid, embedding: &[f32]) -> Result<()> {
        Ok(PipelineStore::save_embedding(self, item_id, embedding).await?)
    }

    async fn save_gate_log(&self, raw_message_id: Uuid, decision: &GateDecision) {
        PipelineStore::save_gate_log(self, raw_message_id, decision).await;
    }

    async fn save_drop_log(&self, raw_message_id: Uuid, reason: &str, detail: &str) {
        PipelineStore::save_drop_log(self, raw_message_id, reason, detail).await;
    }

    async fn insert_bullet(&self, bullet: &Bullet) -> Result<Uuid> {
        Ok(PipelineStore::insert_bullet(self, bullet).await?)
    }

    async fn update_bullet_embedding(&self, bullet_id: Uuid, embedding: &[f32]) -> Result<()> {
        Ok(PipelineStore::update_bullet_embedding(self, bullet_id, embedding).await?)
    }

    async fn bullets_for_dedup(&self, lookback: Duration) -> Result<Vec<Bullet>> {
        Ok(PipelineStore::bullets_for_dedup(self, lookback).await?)
    }

    async fn mark_bullet_duplicate(&self, bullet_id: Uuid, canonical_id: Uuid) -> Result<()> {
        Ok(PipelineStore::mark_bullet_duplicate(self, bullet_id, canonical_id).await?)
    }

    async fn mark_bullet_ready(&self, bullet_id: Uuid) -> Result<()> {
        Ok(PipelineStore::mark_bullet_ready(self, bullet_id).await?)
    }

    async fn get_summary_cache(
        &self,
        cache_key: &str,
        digest_language: &str,
    ) -> Result<Option<SummaryCacheEntry>> {
        Ok(PipelineStore::get_summary_cache(self, cache_key, digest_language).await?)
    }

    async fn upsert_summary_cache(
        &self,
        cache_key: &str,
        digest_language: &str,
        entry: &SummaryCacheEntry,
    ) -> Result<()> {
        Ok(PipelineStore::upsert_summary_cache(self, cache_key, digest_language, entry).await?)
    }

    async fn get_channel_stats(&self, channel_id: i64) -> Result<Option<ChannelStats>> {
        Ok(PipelineStore::get_channel_stats(self, channel_id).await?)
    }

    async fn get_weighted_rating_summary(
        &self,
        channel_id: i64,
        lookback: Duration,
        half_life: Duration,
    ) -> Result<WeightedRatingSummary> {
        Ok(PipelineStore::get_weighted_rating_summary(self, channel_id, lookback, half_life)
            .await?)
    }

    async fn enqueue_fact_check(&self, item_id: Uuid, claim: &str) -> Result<bool> {
        Ok(PipelineStore::enqueue_fact_check(self, item_id, claim).await?)
    }

    async fn enqueue_enrichment(&self, item_id: Uuid) -> Result<bool> {
        Ok(PipelineStore::enqueue_enrichment(self, item_id).await?)
    }

    async fn count_pending_fact_checks(&self) -> Result<i64> {
        Ok(PipelineStore::count_pending_fact_checks(self).await?)
    }

    async fn count_pending_enrichment(&self) -> Result<i64> {
        Ok(PipelineStore::count_pending_enrichment(self).await?)
    }

    async fn get_setting(&self, key: &str) -> Option<serde_json::Value> {
        PipelineStore::get_setting(self, key).await
    }

    async fn save_setting(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        Ok(PipelineStore::save_setting(self, key, value).await?)
    }

    async fn delete_setting(&self, key: &str) -> Result<()> {
        Ok(PipelineStore::delete_setting(self, key).await?)
    }
}
