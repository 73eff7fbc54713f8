//! In-memory collaborator doubles for unit and integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use briefwire_common::textprep::{bullet_hash, canonical_hash};
use briefwire_common::{
    BatchResult, Bullet, BulletInput, BulletStatus, ChannelStats, ExtractedBullet, GateDecision,
    GateResponse, Item, LinkResolver, Oracle, OracleMessage, RawMessage, ResolvedLink,
    SummaryCacheEntry, TextEmbedder,
};

use crate::traits::Storage;
use crate::Candidate;

// --- fixture constructors ---

pub fn raw_message(tg_message_id: i64, text: &str) -> RawMessage {
    RawMessage {
        id: Uuid::new_v4(),
        channel_id: 1,
        channel_name: "test-channel".to_string(),
        tg_message_id,
        tg_date: Utc::now(),
        text: text.to_string(),
        entities_json: None,
        media_json: None,
        media_blob: None,
        canonical_hash: canonical_hash(text),
        is_forward: false,
        inserted_at: Utc::now(),
        processing_started_at: None,
        processed_at: None,
        overrides: Default::default(),
    }
}

pub fn candidate(message: RawMessage, embedding: Vec<f32>) -> Candidate {
    Candidate {
        text: message.text.clone(),
        message,
        preview: None,
        context: vec![],
        links: vec![],
        embedding,
    }
}

pub fn resolved_link(domain: &str) -> ResolvedLink {
    ResolvedLink {
        id: Uuid::new_v4(),
        url: format!("https://{domain}/article"),
        domain: domain.to_string(),
        title: "Linked article".to_string(),
        content: "Linked article excerpt".to_string(),
        language: "en".to_string(),
        word_count: 100,
    }
}

pub fn batch_result(index: usize, relevance: f64, importance: f64, summary: &str) -> BatchResult {
    BatchResult {
        index,
        relevance,
        importance,
        topic: "news".to_string(),
        summary: summary.to_string(),
        language: "en".to_string(),
        source_channel: None,
    }
}

pub fn bullet(item_id: Uuid, importance: f64, status: BulletStatus, embedding: Vec<f32>) -> Bullet {
    let text = format!("bullet for item {item_id} at {importance}");
    Bullet {
        id: Uuid::new_v4(),
        item_id,
        bullet_index: 0,
        text: text.clone(),
        topic: "news".to_string(),
        relevance_score: 0.5,
        importance_score: importance,
        embedding,
        bullet_hash: bullet_hash(&text),
        bullet_cluster_id: None,
        status,
        created_at: Utc::now(),
    }
}

// --- storage double ---

#[derive(Debug, Clone, Copy)]
pub struct SimilarityProbe {
    pub channel_id: Option<i64>,
    pub threshold: f64,
}

struct SimilarSeed {
    channel_id: Option<i64>,
    item_id: Uuid,
    similarity: f64,
}

#[derive(Default)]
struct StoreState {
    messages: Vec<RawMessage>,
    released: Vec<Uuid>,
    items: Vec<Item>,
    item_errors: Vec<(Uuid, i64, serde_json::Value)>,
    embeddings: HashMap<Uuid, Vec<f32>>,
    gate_logs: Vec<(Uuid, GateDecision)>,
    drop_logs: Vec<(Uuid, String, String)>,
    bullets: Vec<Bullet>,
    cache: HashMap<(String, String), SummaryCacheEntry>,
    channel_stats: HashMap<i64, ChannelStats>,
    ratings: HashMap<i64, briefwire_common::WeightedRatingSummary>,
    fact_checks: Vec<(Uuid, String)>,
    enrichment: Vec<Uuid>,
    settings: HashMap<String, serde_json::Value>,
    settings_history: Vec<(String, serde_json::Value)>,
    strict_duplicates: HashMap<String, Uuid>,
    similar_items: Vec<SimilarSeed>,
    similar_irrelevant: Vec<(Uuid, f64)>,
    similar_item_probes: Vec<SimilarityProbe>,
    context: HashMap<i64, Vec<String>>,
}

/// Shared-nothing stand-in for the Postgres store.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // seeding

    pub fn push_message(&self, message: RawMessage) {
        self.state.lock().unwrap().messages.push(message);
    }

    pub fn set_setting(&self, key: &str, value: serde_json::Value) {
        self.state.lock().unwrap().settings.insert(key.to_string(), value);
    }

    pub fn set_context(&self, channel_id: i64, lines: Vec<String>) {
        self.state.lock().unwrap().context.insert(channel_id, lines);
    }

    pub fn set_strict_duplicate(&self, hash: &str, item_id: Uuid) {
        self.state.lock().unwrap().strict_duplicates.insert(hash.to_string(), item_id);
    }

    pub fn add_similar_item(&self, channel_id: Option<i64>, item_id: Uuid, similarity: f64) {
        self.state.lock().unwrap().similar_items.push(SimilarSeed {
            channel_id,
            item_id,
            similarity,
        });
    }

    pub fn add_similar_irrelevant(&self, item_id: Uuid, similarity: f64) {
        self.state.lock().unwrap().similar_irrelevant.push((item_id, similarity));
    }

    pub fn put_summary_cache(&self, key: &str, language: &str, entry: SummaryCacheEntry) {
        self.state
            .lock()
            .unwrap()
            .cache
            .insert((key.to_string(), language.to_string()), entry);
    }

    pub fn set_channel_stats(&self, channel_id: i64, stats: ChannelStats) {
        self.state.lock().unwrap().channel_stats.insert(channel_id, stats);
    }

    pub fn set_rating_summary(
        &self,
        channel_id: i64,
        summary: briefwire_common::WeightedRatingSummary,
    ) {
        self.state.lock().unwrap().ratings.insert(channel_id, summary);
    }

    // inspection

    pub fn released_claims(&self) -> Vec<Uuid> {
        self.state.lock().unwrap().released.clone()
    }

    pub fn similar_item_probes(&self) -> Vec<SimilarityProbe> {
        self.state.lock().unwrap().similar_item_probes.clone()
    }

    pub fn items(&self) -> Vec<Item> {
        self.state.lock().unwrap().items.clone()
    }

    pub fn item_errors(&self) -> Vec<(Uuid, i64, serde_json::Value)> {
        self.state.lock().unwrap().item_errors.clone()
    }

    pub fn gate_logs(&self) -> Vec<(Uuid, GateDecision)> {
        self.state.lock().unwrap().gate_logs.clone()
    }

    pub fn drop_logs(&self) -> Vec<(Uuid, String, String)> {
        self.state.lock().unwrap().drop_logs.clone()
    }

    pub fn stored_bullets(&self) -> Vec<Bullet> {
        self.state.lock().unwrap().bullets.clone()
    }

    pub fn fact_check_queue(&self) -> Vec<(Uuid, String)> {
        self.state.lock().unwrap().fact_checks.clone()
    }

    pub fn enrichment_queue(&self) -> Vec<Uuid> {
        self.state.lock().unwrap().enrichment.clone()
    }

    pub fn message(&self, id: Uuid) -> Option<RawMessage> {
        self.state.lock().unwrap().messages.iter().find(|m| m.id == id).cloned()
    }

    pub fn cached_entry(&self, key: &str, language: &str) -> Option<SummaryCacheEntry> {
        self.state
            .lock()
            .unwrap()
            .cache
            .get(&(key.to_string(), language.to_string()))
            .cloned()
    }

    pub fn settings_history(&self) -> Vec<(String, serde_json::Value)> {
        self.state.lock().unwrap().settings_history.clone()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn claim_unprocessed(&self, limit: i64) -> Result<Vec<RawMessage>> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let mut claimed = Vec::new();
        for message in state.messages.iter_mut() {
            if claimed.len() as i64 >= limit {
                break;
            }
            if message.processed_at.is_none() && message.processing_started_at.is_none() {
                message.processing_started_at = Some(now);
                claimed.push(message.clone());
            }
        }
        Ok(claimed)
    }

    async fn count_backlog(&self) -> Result<i64> {
        let state = self.state.lock().unwrap();
        Ok(state
            .messages
            .iter()
            .filter(|m| m.processed_at.is_none() && m.processing_started_at.is_none())
            .count() as i64)
    }

    async fn mark_processed(&self, raw_message_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.messages.iter_mut().find(|m| m.id == raw_message_id) {
            message.processed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn release_claims(&self, raw_message_ids: &[Uuid]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for id in raw_message_ids {
            state.released.push(*id);
            if let Some(message) = state.messages.iter_mut().find(|m| m.id == *id) {
                message.processing_started_at = None;
            }
        }
        Ok(())
    }

    async fn recover_stuck(&self, threshold: Duration) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let cutoff = Utc::now() - threshold;
        let mut recovered = 0;
        for message in state.messages.iter_mut() {
            if message.processed_at.is_none()
                && message.processing_started_at.map_or(false, |t| t < cutoff)
            {
                message.processing_started_at = None;
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn recent_channel_context(
        &self,
        channel_id: i64,
        _before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        let mut lines = state.context.get(&channel_id).cloned().unwrap_or_default();
        lines.truncate(limit.max(0) as usize);
        Ok(lines)
    }

    async fn strict_duplicate(
        &self,
        canonical_hash: &str,
        _exclude_raw_message_id: Uuid,
    ) -> Result<Option<Uuid>> {
        Ok(self.state.lock().unwrap().strict_duplicates.get(canonical_hash).copied())
    }

    async fn similar_item(
        &self,
        _embedding: &[f32],
        _min_created_at: DateTime<Utc>,
        channel_id: Option<i64>,
        threshold: f64,
    ) -> Result<Option<(Uuid, f64)>> {
        let mut state = self.state.lock().unwrap();
        state.similar_item_probes.push(SimilarityProbe { channel_id, threshold });
        Ok(state
            .similar_items
            .iter()
            .find(|seed| seed.channel_id == channel_id && seed.similarity >= threshold)
            .map(|seed| (seed.item_id, seed.similarity)))
    }

    async fn similar_irrelevant(
        &self,
        _embedding: &[f32],
        _min_created_at: DateTime<Utc>,
        threshold: f64,
    ) -> Result<Option<(Uuid, f64)>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .similar_irrelevant
            .iter()
            .find(|(_, similarity)| *similarity >= threshold)
            .copied())
    }

    async fn save_item(&self, item: &Item) -> Result<Uuid> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) =
            state.items.iter_mut().find(|i| i.raw_message_id == item.raw_message_id)
        {
            let id = existing.id;
            *existing = Item { id, ..item.clone() };
            Ok(id)
        } else {
            state.items.push(item.clone());
            Ok(item.id)
        }
    }

    async fn save_item_error(
        &self,
        raw_message_id: Uuid,
        channel_id: i64,
        error_json: serde_json::Value,
    ) -> Result<()> {
        self.state.lock().unwrap().item_errors.push((raw_message_id, channel_id, error_json));
        Ok(())
    }

    async fn save_embedding(&self, item_id: Uuid, embedding: &[f32]) -> Result<()> {
        self.state.lock().unwrap().embeddings.insert(item_id, embedding.to_vec());
        Ok(())
    }

    async fn save_gate_log(&self, raw_message_id: Uuid, decision: &GateDecision) {
        self.state.lock().unwrap().gate_logs.push((raw_message_id, decision.clone()));
    }

    async fn save_drop_log(&self, raw_message_id: Uuid, reason: &str, detail: &str) {
        self.state.lock().unwrap().drop_logs.push((
            raw_message_id,
            reason.to_string(),
            detail.to_string(),
        ));
    }

    async fn insert_bullet(&self, bullet: &Bullet) -> Result<Uuid> {
        self.state.lock().unwrap().bullets.push(bullet.clone());
        Ok(bullet.id)
    }

    async fn update_bullet_embedding(&self, bullet_id: Uuid, embedding: &[f32]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(bullet) = state.bullets.iter_mut().find(|b| b.id == bullet_id) {
            bullet.embedding = embedding.to_vec();
        }
        Ok(())
    }

    async fn bullets_for_dedup(&self, lookback: Duration) -> Result<Vec<Bullet>> {
        let state = self.state.lock().unwrap();
        let cutoff = Utc::now() - lookback;
        let mut pool: Vec<Bullet> = state
            .bullets
            .iter()
            .filter(|b| match b.status {
                BulletStatus::Pending => true,
                BulletStatus::Ready => b.created_at >= cutoff,
                BulletStatus::Duplicate => false,
            })
            .cloned()
            .collect();
        pool.sort_by(|a, b| {
            let rank = |s: BulletStatus| if s == BulletStatus::Ready { 0 } else { 1 };
            rank(a.status).cmp(&rank(b.status)).then(
                b.importance_score
                    .partial_cmp(&a.importance_score)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
        });
        Ok(pool)
    }

    async fn mark_bullet_duplicate(&self, bullet_id: Uuid, canonical_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(bullet) = state.bullets.iter_mut().find(|b| b.id == bullet_id) {
            bullet.status = BulletStatus::Duplicate;
            bullet.bullet_cluster_id = Some(canonical_id);
        }
        Ok(())
    }

    async fn mark_bullet_ready(&self, bullet_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(bullet) = state.bullets.iter_mut().find(|b| b.id == bullet_id) {
            bullet.status = BulletStatus::Ready;
            bullet.bullet_cluster_id = Some(bullet_id);
        }
        Ok(())
    }

    async fn get_summary_cache(
        &self,
        cache_key: &str,
        digest_language: &str,
    ) -> Result<Option<SummaryCacheEntry>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .cache
            .get(&(cache_key.to_string(), digest_language.to_string()))
            .cloned())
    }

    async fn upsert_summary_cache(
        &self,
        cache_key: &str,
        digest_language: &str,
        entry: &SummaryCacheEntry,
    ) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .cache
            .insert((cache_key.to_string(), digest_language.to_string()), entry.clone());
        Ok(())
    }

    async fn get_channel_stats(&self, channel_id: i64) -> Result<Option<ChannelStats>> {
        Ok(self.state.lock().unwrap().channel_stats.get(&channel_id).copied())
    }

    async fn get_weighted_rating_summary(
        &self,
        channel_id: i64,
        _lookback: Duration,
        _half_life: Duration,
    ) -> Result<briefwire_common::WeightedRatingSummary> {
        Ok(self.state.lock().unwrap().ratings.get(&channel_id).copied().unwrap_or_default())
    }

    async fn enqueue_fact_check(&self, item_id: Uuid, claim: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        if state.fact_checks.iter().any(|(id, _)| *id == item_id) {
            return Ok(false);
        }
        state.fact_checks.push((item_id, claim.to_string()));
        Ok(true)
    }

    async fn enqueue_enrichment(&self, item_id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        if state.enrichment.contains(&item_id) {
            return Ok(false);
        }
        state.enrichment.push(item_id);
        Ok(true)
    }

    async fn count_pending_fact_checks(&self) -> Result<i64> {
        Ok(self.state.lock().unwrap().fact_checks.len() as i64)
    }

    async fn count_pending_enrichment(&self) -> Result<i64> {
        Ok(self.state.lock().unwrap().enrichment.len() as i64)
    }

    async fn get_setting(&self, key: &str) -> Option<serde_json::Value> {
        self.state.lock().unwrap().settings.get(key).cloned()
    }

    async fn save_setting(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(previous) = state.settings.get(key).cloned() {
            state.settings_history.push((key.to_string(), previous));
        }
        state.settings.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn delete_setting(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(previous) = state.settings.remove(key) {
            state.settings_history.push((key.to_string(), previous));
        }
        Ok(())
    }
}

// --- oracle double ---

#[derive(Default)]
struct OracleState {
    batch_queue: VecDeque<Vec<BatchResult>>,
    gate_queue: VecDeque<GateResponse>,
    bullet_queue: VecDeque<Vec<ExtractedBullet>>,
    batch_calls: usize,
    gate_calls: usize,
    translate_calls: usize,
    fail_batch: bool,
    fail_gate: bool,
}

/// Oracle double fed from queues; unscripted calls return bland
/// defaults so driver tests stay short.
#[derive(Default)]
pub struct ScriptedOracle {
    state: Mutex<OracleState>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_batch(self) -> Self {
        self.state.lock().unwrap().fail_batch = true;
        self
    }

    pub fn failing_gate(self) -> Self {
        self.state.lock().unwrap().fail_gate = true;
        self
    }

    pub fn push_batch_results(&self, results: Vec<BatchResult>) {
        self.state.lock().unwrap().batch_queue.push_back(results);
    }

    pub fn push_gate_response(&self, response: GateResponse) {
        self.state.lock().unwrap().gate_queue.push_back(response);
    }

    pub fn push_bullets(&self, bullets: Vec<ExtractedBullet>) {
        self.state.lock().unwrap().bullet_queue.push_back(bullets);
    }

    pub fn batch_calls(&self) -> usize {
        self.state.lock().unwrap().batch_calls
    }

    pub fn gate_calls(&self) -> usize {
        self.state.lock().unwrap().gate_calls
    }

    pub fn translate_calls(&self) -> usize {
        self.state.lock().unwrap().translate_calls
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn process_batch(
        &self,
        messages: &[OracleMessage],
        _digest_language: &str,
        _model_hint: &str,
        _tone: &str,
    ) -> Result<Vec<BatchResult>> {
        let mut state = self.state.lock().unwrap();
        state.batch_calls += 1;
        if state.fail_batch {
            bail!("scripted oracle batch failure");
        }
        if let Some(results) = state.batch_queue.pop_front() {
            return Ok(results);
        }
        Ok(messages
            .iter()
            .enumerate()
            .map(|(i, m)| BatchResult {
                index: i,
                relevance: 0.8,
                importance: 0.5,
                topic: "news".to_string(),
                summary: m.text.clone(),
                language: "en".to_string(),
                source_channel: None,
            })
            .collect())
    }

    async fn translate_text(
        &self,
        text: &str,
        target_lang: &str,
        _model_hint: &str,
    ) -> Result<String> {
        self.state.lock().unwrap().translate_calls += 1;
        Ok(format!("[{target_lang}] {text}"))
    }

    async fn relevance_gate(
        &self,
        _text: &str,
        _model_hint: &str,
        _prompt: &str,
    ) -> Result<GateResponse> {
        let mut state = self.state.lock().unwrap();
        state.gate_calls += 1;
        if state.fail_gate {
            bail!("scripted oracle gate failure");
        }
        Ok(state.gate_queue.pop_front().unwrap_or(GateResponse {
            decision: "relevant".to_string(),
            confidence: 0.9,
            reason: "looks newsworthy".to_string(),
        }))
    }

    async fn extract_bullets(
        &self,
        _input: &BulletInput,
        _digest_language: &str,
        _model_hint: &str,
    ) -> Result<Vec<ExtractedBullet>> {
        Ok(self.state.lock().unwrap().bullet_queue.pop_front().unwrap_or_default())
    }
}

// --- embedder double ---

/// Embedder returning per-text vectors, with a configurable default.
pub struct StaticEmbedder {
    default: Vec<f32>,
    by_text: Mutex<HashMap<String, Vec<f32>>>,
}

impl StaticEmbedder {
    pub fn new(default: Vec<f32>) -> Self {
        Self { default, by_text: Mutex::new(HashMap::new()) }
    }

    pub fn set(&self, text: &str, embedding: Vec<f32>) {
        self.by_text.lock().unwrap().insert(text.to_string(), embedding);
    }
}

#[async_trait]
impl TextEmbedder for StaticEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self
            .by_text
            .lock()
            .unwrap()
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.default.clone()))
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let by_text = self.by_text.lock().unwrap();
        Ok(texts
            .into_iter()
            .map(|t| by_text.get(&t).cloned().unwrap_or_else(|| self.default.clone()))
            .collect())
    }
}

// --- link resolver double ---

/// Resolver serving scripted links and recording every seed request.
#[derive(Default)]
pub struct RecordingResolver {
    links: Mutex<Vec<ResolvedLink>>,
    seeded: Mutex<Vec<String>>,
}

impl RecordingResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_links(links: Vec<ResolvedLink>) -> Self {
        Self { links: Mutex::new(links), seeded: Mutex::new(vec![]) }
    }

    pub fn seeded_texts(&self) -> Vec<String> {
        self.seeded.lock().unwrap().clone()
    }
}

#[async_trait]
impl LinkResolver for RecordingResolver {
    async fn resolve_links(&self, _text: &str, max_links: usize) -> Result<Vec<ResolvedLink>> {
        let links = self.links.lock().unwrap();
        Ok(links.iter().take(max_links).cloned().collect())
    }

    async fn seed_links(&self, text: &str) -> Result<()> {
        self.seeded.lock().unwrap().push(text.to_string());
        Ok(())
    }
}
