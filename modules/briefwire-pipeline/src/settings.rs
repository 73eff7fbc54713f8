//! Effective pipeline settings: compiled defaults overlaid with values
//! from the settings store. Snapshotted once per batch; unknown keys or
//! parse failures fall back to defaults and never poison the batch.

use chrono::Duration;

use crate::traits::Storage;

// Fixed operational constants (not settings-store tunable).

/// How often the stuck-claim recovery sweep runs.
pub const RECOVERY_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5 * 60);
/// Claims older than this with no terminal mark are considered stuck.
/// Must exceed realistic batch time.
pub const STUCK_MESSAGE_THRESHOLD_SECS: i64 = 10 * 60;
/// Batch-wide oracle deadline.
pub const ORACLE_BATCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5 * 60);
/// Relevance-gate classifier deadline.
pub const GATE_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(1200);
/// First-pass importance above which an item is re-analyzed.
pub const REANALYSIS_IMPORTANCE_MIN: f64 = 0.8;

/// Penalty for summaries carrying no concrete information.
pub const UNIQUE_INFO_PENALTY: f64 = 0.2;
/// Additive bias for allowlisted/denylisted link domains.
pub const DOMAIN_BIAS: f64 = 0.05;
/// Channel weight clamp range; weights below the minimum coerce to 1.0.
pub const CHANNEL_WEIGHT_MIN: f64 = 0.1;
pub const CHANNEL_WEIGHT_MAX: f64 = 2.0;

pub const ANNOTATION_BIAS_LOOKBACK_DAYS: i64 = 30;
pub const ANNOTATION_BIAS_HALF_LIFE_DAYS: i64 = 7;
pub const ANNOTATION_BIAS_MAX: f64 = 0.1;
/// Fraction of the rating bias applied to relevance (importance takes it whole).
pub const RELEVANCE_BIAS_FRACTION: f64 = 0.5;

/// Similarity to a previously irrelevant-rated item that triggers penalties.
pub const IRRELEVANT_SIMILARITY_PENALTY_MIN: f64 = 0.80;
/// Similarity at which the item is rejected outright.
pub const IRRELEVANT_SIMILARITY_REJECT_MIN: f64 = 0.93;
pub const IRRELEVANT_SIMILARITY_PENALTY: f64 = 0.15;

/// Channels with a score stddev at or below this skip normalization.
pub const NORMALIZATION_MIN_STDDEV: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupMode {
    Strict,
    Semantic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateMode {
    Heuristic,
    Llm,
    Hybrid,
}

/// Per-batch settings snapshot.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub batch_size: i64,

    // Filters
    pub skip_forwards: bool,
    pub allow_patterns: Vec<String>,
    pub deny_patterns: Vec<String>,
    pub ads_keywords: Vec<String>,
    pub footer_phrases: Vec<String>,
    pub cta_phrases: Vec<String>,

    // Relevance gate
    pub relevance_gate_enabled: bool,
    pub relevance_gate_mode: GateMode,
    pub gate_model: String,

    // Dedup
    pub dedup_mode: DedupMode,
    pub cluster_similarity_threshold: f64,
    pub dedup_same_channel_window: Duration,
    pub dedup_window: Duration,

    // Oracle
    pub oracle_model: String,
    pub reanalysis_model: String,
    pub translation_model: String,
    pub tone: String,

    // Summaries
    pub relevance_threshold: f64,
    pub summary_prefixes: Vec<String>,
    pub summary_max_chars: usize,
    pub translation_enabled: bool,
    pub score_normalization_enabled: bool,
    pub domain_allowlist: Vec<String>,
    pub domain_denylist: Vec<String>,

    // Bullets
    pub bullet_mode_enabled: bool,
    pub bullet_batch_size: usize,
    pub bullet_min_importance: f64,
    pub bullet_dedup_threshold: f64,
    pub bullet_dedup_interval: std::time::Duration,
    pub dedup_lookback_hours: i64,

    // Enrichment
    pub max_links: usize,
    pub context_messages: i64,

    // Follow-up queues
    pub fact_check_enabled: bool,
    pub min_claim_length: usize,
    pub fact_check_queue_max: i64,
    pub enrichment_enabled: bool,
    pub enrichment_queue_max: i64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            skip_forwards: false,
            allow_patterns: vec![],
            deny_patterns: vec![],
            ads_keywords: vec![],
            footer_phrases: vec![],
            cta_phrases: vec![
                "подписывайтесь".to_string(),
                "подпишись".to_string(),
                "subscribe".to_string(),
            ],
            relevance_gate_enabled: true,
            relevance_gate_mode: GateMode::Hybrid,
            gate_model: String::new(),
            dedup_mode: DedupMode::Semantic,
            cluster_similarity_threshold: 0.75,
            dedup_same_channel_window: Duration::hours(6),
            dedup_window: Duration::hours(36),
            oracle_model: String::new(),
            reanalysis_model: String::new(),
            translation_model: String::new(),
            tone: "neutral".to_string(),
            relevance_threshold: 0.5,
            summary_prefixes: vec![
                "summary".to_string(),
                "кратко".to_string(),
                "коротко".to_string(),
            ],
            summary_max_chars: 400,
            translation_enabled: true,
            score_normalization_enabled: false,
            domain_allowlist: vec![],
            domain_denylist: vec![],
            bullet_mode_enabled: true,
            bullet_batch_size: 5,
            bullet_min_importance: 0.3,
            bullet_dedup_threshold: 0.92,
            bullet_dedup_interval: std::time::Duration::from_secs(10 * 60),
            dedup_lookback_hours: 48,
            max_links: 3,
            context_messages: 5,
            fact_check_enabled: false,
            min_claim_length: 40,
            fact_check_queue_max: 500,
            enrichment_enabled: true,
            enrichment_queue_max: 500,
        }
    }
}

impl PipelineSettings {
    /// Snapshot the effective settings for one batch.
    pub async fn load<S: Storage>(store: &S) -> Self {
        let mut s = Self::default();
        s.batch_size = int_setting(store, "pipeline:batch_size", s.batch_size).await;
        s.skip_forwards = bool_setting(store, "pipeline:skip_forwards", s.skip_forwards).await;
        s.allow_patterns = list_setting(store, "pipeline:allow_patterns", s.allow_patterns).await;
        s.deny_patterns = list_setting(store, "pipeline:deny_patterns", s.deny_patterns).await;
        s.ads_keywords = list_setting(store, "pipeline:ads_keywords", s.ads_keywords).await;
        s.footer_phrases = list_setting(store, "pipeline:footer_phrases", s.footer_phrases).await;
        s.cta_phrases = list_setting(store, "pipeline:cta_phrases", s.cta_phrases).await;

        s.relevance_gate_enabled =
            bool_setting(store, "pipeline:relevance_gate_enabled", s.relevance_gate_enabled).await;
        s.relevance_gate_mode =
            match string_setting(store, "pipeline:relevance_gate_mode", "hybrid").await.as_str() {
                "heuristic" => GateMode::Heuristic,
                "llm" => GateMode::Llm,
                _ => GateMode::Hybrid,
            };
        s.gate_model = string_setting(store, "pipeline:gate_model", &s.gate_model).await;

        s.dedup_mode = match string_setting(store, "pipeline:dedup_mode", "semantic").await.as_str()
        {
            "strict" => DedupMode::Strict,
            _ => DedupMode::Semantic,
        };
        s.cluster_similarity_threshold = float_setting(
            store,
            "pipeline:cluster_similarity_threshold",
            s.cluster_similarity_threshold,
        )
        .await;
        s.dedup_same_channel_window = duration_setting(
            store,
            "pipeline:dedup_same_channel_window_secs",
            s.dedup_same_channel_window,
        )
        .await;
        s.dedup_window = duration_setting(store, "pipeline:dedup_window_secs", s.dedup_window).await;

        s.oracle_model = string_setting(store, "pipeline:oracle_model", &s.oracle_model).await;
        s.reanalysis_model =
            string_setting(store, "pipeline:reanalysis_model", &s.reanalysis_model).await;
        s.translation_model =
            string_setting(store, "pipeline:translation_model", &s.translation_model).await;
        s.tone = string_setting(store, "pipeline:tone", &s.tone).await;

        s.relevance_threshold =
            float_setting(store, "pipeline:relevance_threshold", s.relevance_threshold).await;
        s.summary_prefixes =
            list_setting(store, "pipeline:summary_prefixes", s.summary_prefixes).await;
        s.summary_max_chars =
            int_setting(store, "pipeline:summary_max_chars", s.summary_max_chars as i64).await
                .max(0) as usize;
        s.translation_enabled =
            bool_setting(store, "pipeline:translation_enabled", s.translation_enabled).await;
        s.score_normalization_enabled = bool_setting(
            store,
            "pipeline:score_normalization_enabled",
            s.score_normalization_enabled,
        )
        .await;
        s.domain_allowlist =
            list_setting(store, "pipeline:domain_allowlist", s.domain_allowlist).await;
        s.domain_denylist = list_setting(store, "pipeline:domain_denylist", s.domain_denylist).await;

        s.bullet_mode_enabled =
            bool_setting(store, "pipeline:bullet_mode_enabled", s.bullet_mode_enabled).await;
        s.bullet_batch_size =
            int_setting(store, "pipeline:bullet_batch_size", s.bullet_batch_size as i64).await
                .max(0) as usize;
        s.bullet_min_importance =
            float_setting(store, "pipeline:bullet_min_importance", s.bullet_min_importance).await;
        s.bullet_dedup_threshold =
            float_setting(store, "pipeline:bullet_dedup_threshold", s.bullet_dedup_threshold).await;
        let dedup_interval_secs = int_setting(
            store,
            "pipeline:bullet_dedup_interval_secs",
            s.bullet_dedup_interval.as_secs() as i64,
        )
        .await;
        s.bullet_dedup_interval = std::time::Duration::from_secs(dedup_interval_secs.max(1) as u64);
        s.dedup_lookback_hours =
            int_setting(store, "pipeline:dedup_lookback_hours", s.dedup_lookback_hours).await;

        s.max_links = int_setting(store, "pipeline:max_links", s.max_links as i64).await.max(0)
            as usize;
        s.context_messages =
            int_setting(store, "pipeline:context_messages", s.context_messages).await;

        s.fact_check_enabled =
            bool_setting(store, "pipeline:fact_check_enabled", s.fact_check_enabled).await;
        s.min_claim_length =
            int_setting(store, "pipeline:min_claim_length", s.min_claim_length as i64).await.max(0)
                as usize;
        s.fact_check_queue_max =
            int_setting(store, "pipeline:fact_check_queue_max", s.fact_check_queue_max).await;
        s.enrichment_enabled =
            bool_setting(store, "pipeline:enrichment_enabled", s.enrichment_enabled).await;
        s.enrichment_queue_max =
            int_setting(store, "pipeline:enrichment_queue_max", s.enrichment_queue_max).await;

        s
    }

    /// Effective relevance threshold for one message: global setting,
    /// per-channel override, auto-relevance delta, clamped to [0, 1].
    pub fn effective_threshold(&self, overrides: &briefwire_common::ChannelOverrides) -> f64 {
        let mut threshold = self.relevance_threshold;
        if overrides.relevance_threshold > 0.0 {
            threshold = overrides.relevance_threshold;
        }
        if overrides.auto_relevance_enabled {
            threshold += overrides.relevance_threshold_delta;
        }
        threshold.clamp(0.0, 1.0)
    }
}

// Typed accessors: a closed set of supported value kinds. Anything else
// reads as absent.

async fn bool_setting<S: Storage>(store: &S, key: &str, default: bool) -> bool {
    match store.get_setting(key).await {
        Some(serde_json::Value::Bool(b)) => b,
        _ => default,
    }
}

async fn int_setting<S: Storage>(store: &S, key: &str, default: i64) -> i64 {
    match store.get_setting(key).await {
        Some(serde_json::Value::Number(n)) => n.as_i64().unwrap_or(default),
        _ => default,
    }
}

async fn float_setting<S: Storage>(store: &S, key: &str, default: f64) -> f64 {
    match store.get_setting(key).await {
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(default),
        _ => default,
    }
}

async fn string_setting<S: Storage>(store: &S, key: &str, default: &str) -> String {
    match store.get_setting(key).await {
        Some(serde_json::Value::String(s)) => s,
        _ => default.to_string(),
    }
}

async fn list_setting<S: Storage>(store: &S, key: &str, default: Vec<String>) -> Vec<String> {
    match store.get_setting(key).await {
        Some(serde_json::Value::Array(values)) => {
            let strings: Vec<String> = values
                .into_iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect();
            strings
        }
        _ => default,
    }
}

async fn duration_setting<S: Storage>(store: &S, key: &str, default: Duration) -> Duration {
    match store.get_setting(key).await {
        Some(serde_json::Value::Number(n)) => {
            n.as_i64().map(Duration::seconds).unwrap_or(default)
        }
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;
    use briefwire_common::ChannelOverrides;

    #[tokio::test]
    async fn defaults_when_store_is_empty() {
        let store = MemoryStore::new();
        let s = PipelineSettings::load(&store).await;
        assert_eq!(s.batch_size, 10);
        assert_eq!(s.dedup_mode, DedupMode::Semantic);
        assert_eq!(s.cluster_similarity_threshold, 0.75);
    }

    #[tokio::test]
    async fn overrides_from_settings_store() {
        let store = MemoryStore::new();
        store.set_setting("pipeline:dedup_mode", serde_json::json!("strict"));
        store.set_setting("pipeline:batch_size", serde_json::json!(25));
        store.set_setting("pipeline:cluster_similarity_threshold", serde_json::json!(0.8));
        let s = PipelineSettings::load(&store).await;
        assert_eq!(s.dedup_mode, DedupMode::Strict);
        assert_eq!(s.batch_size, 25);
        assert_eq!(s.cluster_similarity_threshold, 0.8);
    }

    #[tokio::test]
    async fn wrong_value_kind_reads_as_absent() {
        let store = MemoryStore::new();
        store.set_setting("pipeline:batch_size", serde_json::json!("not a number"));
        store.set_setting("pipeline:skip_forwards", serde_json::json!(17));
        let s = PipelineSettings::load(&store).await;
        assert_eq!(s.batch_size, 10);
        assert!(!s.skip_forwards);
    }

    #[test]
    fn threshold_uses_channel_override() {
        let s = PipelineSettings::default();
        let overrides = ChannelOverrides { relevance_threshold: 0.7, ..Default::default() };
        assert_eq!(s.effective_threshold(&overrides), 0.7);
    }

    #[test]
    fn threshold_applies_auto_delta_and_clamps() {
        let s = PipelineSettings::default();
        let overrides = ChannelOverrides {
            relevance_threshold: 0.9,
            relevance_threshold_delta: 0.5,
            auto_relevance_enabled: true,
            ..Default::default()
        };
        assert_eq!(s.effective_threshold(&overrides), 1.0);
    }

    #[test]
    fn threshold_ignores_delta_when_auto_disabled() {
        let s = PipelineSettings::default();
        let overrides = ChannelOverrides {
            relevance_threshold_delta: 0.2,
            ..Default::default()
        };
        assert_eq!(s.effective_threshold(&overrides), 0.5);
    }
}
