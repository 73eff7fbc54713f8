//! Score adjustment chain: channel weight, unique-info penalty, domain
//! bias, weighted rating bias, irrelevant-similarity suppression, and
//! optional per-channel normalization. Every step keeps both scores in
//! [0, 1]; bias reads from the store are best-effort.

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use briefwire_common::score::{clamp01, normalize_domain};
use briefwire_common::textprep::has_unique_info;
use briefwire_common::{ChannelStats, ResolvedLink, WeightedRatingSummary};

use crate::settings::{
    PipelineSettings, ANNOTATION_BIAS_HALF_LIFE_DAYS, ANNOTATION_BIAS_LOOKBACK_DAYS,
    ANNOTATION_BIAS_MAX, CHANNEL_WEIGHT_MAX, CHANNEL_WEIGHT_MIN, DOMAIN_BIAS,
    IRRELEVANT_SIMILARITY_PENALTY, IRRELEVANT_SIMILARITY_PENALTY_MIN,
    IRRELEVANT_SIMILARITY_REJECT_MIN, NORMALIZATION_MIN_STDDEV, RELEVANCE_BIAS_FRACTION,
    UNIQUE_INFO_PENALTY,
};
use crate::traits::Storage;
use crate::Candidate;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scored {
    pub relevance: f64,
    pub importance: f64,
    /// Set when irrelevant-similarity suppression forced a rejection.
    pub force_rejected: bool,
}

/// Channel weight multiplier. Weights below the minimum are treated as
/// unset and coerce to 1.0; valid weights clamp to the allowed range.
pub fn apply_channel_weight(importance: f64, weight: f64) -> f64 {
    let weight = if weight < CHANNEL_WEIGHT_MIN {
        1.0
    } else {
        weight.min(CHANNEL_WEIGHT_MAX)
    };
    clamp01(importance * weight)
}

/// Summaries with no concrete information lose a fixed amount.
pub fn apply_unique_info_penalty(importance: f64, summary: &str) -> f64 {
    if has_unique_info(summary) {
        importance
    } else {
        clamp01(importance - UNIQUE_INFO_PENALTY)
    }
}

/// Additive domain bias, each direction applied at most once.
pub fn apply_domain_bias(
    importance: f64,
    links: &[ResolvedLink],
    allowlist: &[String],
    denylist: &[String],
) -> f64 {
    let mut importance = importance;
    let domains: Vec<String> = links.iter().map(|l| normalize_domain(&l.domain)).collect();
    if domains.iter().any(|d| denylist.iter().any(|deny| d == deny)) {
        importance -= DOMAIN_BIAS;
    }
    if domains.iter().any(|d| allowlist.iter().any(|allow| d == allow)) {
        importance += DOMAIN_BIAS;
    }
    clamp01(importance)
}

/// Bias from weighted good/bad/irrelevant ratings:
/// `(good - bad - irrelevant) / total`, scaled and clamped.
pub fn rating_bias(summary: &WeightedRatingSummary) -> f64 {
    let total = summary.total();
    if total <= 0.0 {
        return 0.0;
    }
    let raw = (summary.good - summary.bad - summary.irrelevant) / total;
    (raw * ANNOTATION_BIAS_MAX).clamp(-ANNOTATION_BIAS_MAX, ANNOTATION_BIAS_MAX)
}

/// Importance takes the full bias; relevance a fraction of it.
pub fn apply_rating_bias(relevance: f64, importance: f64, bias: f64) -> (f64, f64) {
    (
        clamp01(relevance + bias * RELEVANCE_BIAS_FRACTION),
        clamp01(importance + bias),
    )
}

/// Per-channel z-normalization, applied only when the channel has
/// meaningful variance. Result clamped back into [0, 1].
pub fn normalize_score(value: f64, mean: f64, stddev: f64) -> f64 {
    if stddev > NORMALIZATION_MIN_STDDEV {
        clamp01((value - mean) / stddev)
    } else {
        value
    }
}

pub fn normalize_pair(relevance: f64, importance: f64, stats: &ChannelStats) -> (f64, f64) {
    (
        normalize_score(relevance, stats.avg_relevance, stats.std_relevance),
        normalize_score(importance, stats.avg_importance, stats.std_importance),
    )
}

/// Run the full adjustment chain for one candidate.
pub async fn score<S: Storage>(
    store: &S,
    settings: &PipelineSettings,
    candidate: &Candidate,
    base_relevance: f64,
    base_importance: f64,
    summary: &str,
    now: DateTime<Utc>,
) -> Scored {
    let mut relevance = clamp01(base_relevance);
    let mut importance = clamp01(base_importance);

    importance = apply_channel_weight(importance, candidate.message.overrides.importance_weight);
    importance = apply_unique_info_penalty(importance, summary);
    importance = apply_domain_bias(
        importance,
        &candidate.links,
        &settings.domain_allowlist,
        &settings.domain_denylist,
    );

    match store
        .get_weighted_rating_summary(
            candidate.message.channel_id,
            Duration::days(ANNOTATION_BIAS_LOOKBACK_DAYS),
            Duration::days(ANNOTATION_BIAS_HALF_LIFE_DAYS),
        )
        .await
    {
        Ok(ratings) => {
            let bias = rating_bias(&ratings);
            (relevance, importance) = apply_rating_bias(relevance, importance, bias);
        }
        Err(e) => warn!(channel_id = candidate.message.channel_id, error = %e, "rating bias unavailable"),
    }

    let mut force_rejected = false;
    if !candidate.embedding.is_empty() {
        match store
            .similar_irrelevant(
                &candidate.embedding,
                now - Duration::days(ANNOTATION_BIAS_LOOKBACK_DAYS),
                IRRELEVANT_SIMILARITY_PENALTY_MIN,
            )
            .await
        {
            Ok(Some((item_id, similarity))) => {
                if similarity >= IRRELEVANT_SIMILARITY_REJECT_MIN {
                    warn!(%item_id, similarity, "rejecting near-copy of irrelevant-rated item");
                    relevance = 0.0;
                    importance = 0.0;
                    force_rejected = true;
                } else {
                    relevance = clamp01(relevance - IRRELEVANT_SIMILARITY_PENALTY);
                    importance = clamp01(importance - IRRELEVANT_SIMILARITY_PENALTY);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "irrelevant-similarity probe failed"),
        }
    }

    if settings.score_normalization_enabled && !force_rejected {
        match store.get_channel_stats(candidate.message.channel_id).await {
            Ok(Some(stats)) => {
                (relevance, importance) = normalize_pair(relevance, importance, &stats);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "channel stats unavailable, skipping normalization"),
        }
    }

    Scored { relevance, importance, force_rejected }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{candidate, raw_message, resolved_link, MemoryStore};

    #[test]
    fn weight_multiplies_and_clamps() {
        assert!((apply_channel_weight(0.6, 1.5) - 0.9).abs() < 1e-9);
        assert_eq!(apply_channel_weight(0.8, 3.0), 1.0);
        assert!((apply_channel_weight(0.4, 2.5) - 0.8).abs() < 1e-9);
    }

    #[test]
    fn weight_below_minimum_behaves_as_default() {
        assert!((apply_channel_weight(0.5, 0.05) - 0.5).abs() < 1e-9);
        assert!((apply_channel_weight(0.5, 0.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn vague_summary_pays_the_penalty() {
        assert!((apply_unique_info_penalty(0.5, "something happened somewhere") - 0.3).abs() < 1e-9);
        assert_eq!(apply_unique_info_penalty(0.1, "nothing concrete here"), 0.0);
    }

    #[test]
    fn concrete_summary_keeps_its_score() {
        assert_eq!(apply_unique_info_penalty(0.6, "John raised 25M Monday"), 0.6);
    }

    #[test]
    fn domain_bias_applies_each_direction_once() {
        let links = vec![
            resolved_link("spam.example"),
            resolved_link("spam2.example"),
            resolved_link("trusted.example"),
        ];
        let allow = vec!["trusted.example".to_string()];
        let deny = vec!["spam.example".to_string(), "spam2.example".to_string()];
        // One -0.05 despite two denied domains, plus one +0.05.
        assert!((apply_domain_bias(0.5, &links, &allow, &deny) - 0.5).abs() < 1e-9);
        assert!((apply_domain_bias(0.5, &links, &[], &deny) - 0.45).abs() < 1e-9);
        assert!((apply_domain_bias(0.5, &links, &allow, &[]) - 0.55).abs() < 1e-9);
    }

    #[test]
    fn rating_bias_direction_and_clamp() {
        let all_good = WeightedRatingSummary { good: 4.0, bad: 0.0, irrelevant: 0.0 };
        assert!((rating_bias(&all_good) - ANNOTATION_BIAS_MAX).abs() < 1e-9);

        let all_bad = WeightedRatingSummary { good: 0.0, bad: 3.0, irrelevant: 1.0 };
        assert!((rating_bias(&all_bad) + ANNOTATION_BIAS_MAX).abs() < 1e-9);

        let mixed = WeightedRatingSummary { good: 3.0, bad: 1.0, irrelevant: 0.0 };
        assert!((rating_bias(&mixed) - 0.05).abs() < 1e-9);

        assert_eq!(rating_bias(&WeightedRatingSummary::default()), 0.0);
    }

    #[test]
    fn rating_bias_split_between_scores() {
        let (relevance, importance) = apply_rating_bias(0.5, 0.5, 0.1);
        assert!((relevance - 0.55).abs() < 1e-9);
        assert!((importance - 0.6).abs() < 1e-9);
    }

    #[test]
    fn normalization_requires_variance() {
        assert_eq!(normalize_score(0.7, 0.5, 0.0), 0.7);
        assert_eq!(normalize_score(0.7, 0.5, 0.005), 0.7);
        assert!((normalize_score(0.7, 0.5, 0.4) - 0.5).abs() < 1e-9);
        // Below-average scores clamp at zero rather than going negative.
        assert_eq!(normalize_score(0.3, 0.5, 0.4), 0.0);
    }

    #[tokio::test]
    async fn full_chain_scenario_weighted_channel() {
        let store = MemoryStore::new();
        let mut msg = raw_message(1, "long enough source text");
        msg.overrides.importance_weight = 1.5;
        let cand = candidate(msg, vec![]);

        let scored = score(&store, &PipelineSettings::default(), &cand, 0.9, 0.6, "John raised 25M Monday", Utc::now()).await;
        assert!((scored.importance - 0.9).abs() < 1e-9);
        assert!((scored.relevance - 0.9).abs() < 1e-9);
        assert!(!scored.force_rejected);
    }

    #[tokio::test]
    async fn near_copy_of_irrelevant_item_is_forced_out() {
        let store = MemoryStore::new();
        store.add_similar_irrelevant(uuid::Uuid::new_v4(), 0.95);
        let cand = candidate(raw_message(1, "text"), vec![1.0, 0.0]);

        let scored = score(&store, &PipelineSettings::default(), &cand, 0.9, 0.9, "John raised 25M Monday", Utc::now()).await;
        assert_eq!(scored.relevance, 0.0);
        assert_eq!(scored.importance, 0.0);
        assert!(scored.force_rejected);
    }

    #[tokio::test]
    async fn moderate_irrelevant_similarity_only_penalizes() {
        let store = MemoryStore::new();
        store.add_similar_irrelevant(uuid::Uuid::new_v4(), 0.85);
        let cand = candidate(raw_message(1, "text"), vec![1.0, 0.0]);

        let scored = score(&store, &PipelineSettings::default(), &cand, 0.9, 0.9, "John raised 25M Monday", Utc::now()).await;
        assert!((scored.relevance - 0.75).abs() < 1e-9);
        assert!((scored.importance - 0.75).abs() < 1e-9);
        assert!(!scored.force_rejected);
    }
}
