use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Item lifecycle ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Ready,
    Rejected,
    Error,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Ready => "ready",
            ItemStatus::Rejected => "rejected",
            ItemStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulletStatus {
    Pending,
    Ready,
    Duplicate,
}

impl BulletStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulletStatus::Pending => "pending",
            BulletStatus::Ready => "ready",
            BulletStatus::Duplicate => "duplicate",
        }
    }
}

impl std::fmt::Display for BulletStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which text the item's language was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanguageSource {
    Original,
    Preview,
    Summary,
}

impl LanguageSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LanguageSource::Original => "original",
            LanguageSource::Preview => "preview",
            LanguageSource::Summary => "summary",
        }
    }
}

// --- Drop reasons ---

/// Stable reason tags for every message dropped before producing an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    DuplicateBatch,
    Forwarded,
    Boilerplate,
    ForwardShell,
    EmojiOnly,
    MinLength,
    PatternDeny,
    Ads,
    RelevanceGate,
    DedupSemanticBatch,
    DedupSemanticSameChannel,
    DedupSemanticGlobal,
    DedupStrictGlobal,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::DuplicateBatch => "duplicate_batch",
            DropReason::Forwarded => "forwarded",
            DropReason::Boilerplate => "boilerplate",
            DropReason::ForwardShell => "forward_shell",
            DropReason::EmojiOnly => "emoji_only",
            DropReason::MinLength => "min_length",
            DropReason::PatternDeny => "pattern_deny",
            DropReason::Ads => "ads",
            DropReason::RelevanceGate => "relevance_gate",
            DropReason::DedupSemanticBatch => "dedup_semantic_batch",
            DropReason::DedupSemanticSameChannel => "dedup_semantic_same_channel",
            DropReason::DedupSemanticGlobal => "dedup_semantic_global",
            DropReason::DedupStrictGlobal => "dedup_strict_global",
        }
    }
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// --- Raw messages ---

/// Per-channel pipeline overrides, joined onto the message at claim time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelOverrides {
    /// Multiplier for the oracle's base importance, clamped to [0.1, 2.0].
    pub importance_weight: f64,
    /// Per-channel relevance threshold; 0 means "use the global setting".
    pub relevance_threshold: f64,
    /// Additive threshold adjustment applied when auto-relevance is on.
    pub relevance_threshold_delta: f64,
    pub auto_relevance_enabled: bool,
}

impl Default for ChannelOverrides {
    fn default() -> Self {
        Self {
            importance_weight: 1.0,
            relevance_threshold: 0.0,
            relevance_threshold_delta: 0.0,
            auto_relevance_enabled: false,
        }
    }
}

/// A raw chat message claimed from the shared store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    pub id: Uuid,
    pub channel_id: i64,
    pub channel_name: String,
    pub tg_message_id: i64,
    pub tg_date: DateTime<Utc>,
    pub text: String,
    pub entities_json: Option<serde_json::Value>,
    pub media_json: Option<serde_json::Value>,
    /// Raw media bytes carried along for downstream consumers; the
    /// pipeline itself only reads `media_json`.
    pub media_blob: Option<Vec<u8>>,
    pub canonical_hash: String,
    pub is_forward: bool,
    pub inserted_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub overrides: ChannelOverrides,
}

// --- Items & bullets ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub raw_message_id: Uuid,
    pub channel_id: i64,
    pub relevance_score: f64,
    pub importance_score: f64,
    pub topic: String,
    pub summary: String,
    pub language: String,
    pub language_source: LanguageSource,
    pub status: ItemStatus,
    pub bullet_total_count: i32,
    pub bullet_included_count: i32,
    pub first_seen_at: DateTime<Utc>,
    pub digested_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub error_json: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bullet {
    pub id: Uuid,
    pub item_id: Uuid,
    pub bullet_index: i32,
    pub text: String,
    pub topic: String,
    pub relevance_score: f64,
    pub importance_score: f64,
    pub embedding: Vec<f32>,
    /// hex(sha256(normalized text)[..16])
    pub bullet_hash: String,
    pub bullet_cluster_id: Option<Uuid>,
    pub status: BulletStatus,
    pub created_at: DateTime<Utc>,
}

// --- Oracle shapes ---

/// One message submitted to the summarizing oracle.
#[derive(Debug, Clone, Serialize)]
pub struct OracleMessage {
    pub text: String,
    pub channel_name: String,
    /// Recent same-channel messages preceding this one, oldest first.
    pub context: Vec<String>,
    /// Short excerpts from resolved links attached to the message.
    pub link_excerpts: Vec<String>,
}

/// Per-message result from a summarization batch call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub index: usize,
    pub relevance: f64,
    pub importance: f64,
    pub topic: String,
    pub summary: String,
    pub language: String,
    pub source_channel: Option<String>,
}

/// Raw relevance-gate response shape; validated by the gate before use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateResponse {
    pub decision: String,
    pub confidence: f64,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateVerdict {
    Relevant,
    Irrelevant,
}

impl GateVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateVerdict::Relevant => "relevant",
            GateVerdict::Irrelevant => "irrelevant",
        }
    }
}

/// A validated relevance-gate decision, ready for the gate log.
#[derive(Debug, Clone)]
pub struct GateDecision {
    pub verdict: GateVerdict,
    pub confidence: f64,
    pub reason: String,
    pub model: String,
    pub prompt_version: String,
}

/// Input for oracle-assisted bullet extraction.
#[derive(Debug, Clone, Serialize)]
pub struct BulletInput {
    pub text: String,
    pub preview: Option<String>,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedBullet {
    pub text: String,
    #[serde(default)]
    pub topic: Option<String>,
    pub relevance: f64,
    pub importance: f64,
}

// --- Enrichment & cache ---

/// A link resolved by the external web/link resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedLink {
    pub id: Uuid,
    pub url: String,
    pub domain: String,
    pub title: String,
    pub content: String,
    pub language: String,
    pub word_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryCacheEntry {
    pub summary: String,
    pub topic: String,
    pub language: String,
    pub relevance: f64,
    pub importance: f64,
    pub updated_at: DateTime<Utc>,
}

// --- Channel statistics ---

/// Rolling per-channel score statistics, maintained by an external job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChannelStats {
    pub avg_relevance: f64,
    pub std_relevance: f64,
    pub avg_importance: f64,
    pub std_importance: f64,
}

/// Half-life-decayed rating counts for a channel over a lookback window.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WeightedRatingSummary {
    pub good: f64,
    pub bad: f64,
    pub irrelevant: f64,
}

impl WeightedRatingSummary {
    pub fn total(&self) -> f64 {
        self.good + self.bad + self.irrelevant
    }
}
