//! Oracle orchestration: cached-summary bypass, per-model grouping,
//! batch submission under a deadline, positional result mapping, and a
//! tiered second pass for high-importance items. A failed group releases
//! its claims so another worker can retry.

use std::collections::BTreeMap;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{info, warn};
use uuid::Uuid;

use briefwire_common::score::clamp01;
use briefwire_common::textprep::sha256_hex;
use briefwire_common::{BatchResult, Oracle, OracleMessage};

use crate::settings::{PipelineSettings, ORACLE_BATCH_TIMEOUT, REANALYSIS_IMPORTANCE_MIN};
use crate::traits::Storage;
use crate::Candidate;

pub const SUMMARY_PROMPT_VERSION_DEFAULT: &str = "v1";

/// Version string for the summarization prompt, resolved through the
/// same settings indirection the gate uses.
pub async fn load_prompt_version<S: Storage>(store: &S) -> String {
    match store.get_setting("prompt:summarize:active").await {
        Some(serde_json::Value::String(v)) if !v.is_empty() => v,
        _ => SUMMARY_PROMPT_VERSION_DEFAULT.to_string(),
    }
}

/// Deterministic cache key: `canonical_hash:prompt_version`, extended
/// with a preview digest when the message carries one.
pub fn summary_cache_key(canonical_hash: &str, prompt_version: &str, preview: Option<&str>) -> String {
    match preview {
        Some(p) if !p.is_empty() => {
            format!("{canonical_hash}:{prompt_version}:{}", sha256_hex(p))
        }
        _ => format!("{canonical_hash}:{prompt_version}"),
    }
}

#[derive(Debug, Clone)]
pub struct OracleOutcome {
    pub result: BatchResult,
    /// Served from the summary cache; skips post-processing and re-caching.
    pub cached: bool,
}

/// Obtain one result per candidate. `None` entries mean the oracle group
/// failed or under-returned; those claims were already released.
pub async fn run_batch<S: Storage, O: Oracle + ?Sized>(
    store: &S,
    oracle: &O,
    settings: &PipelineSettings,
    digest_language: &str,
    prompt_version: &str,
    candidates: &[Candidate],
) -> Vec<Option<OracleOutcome>> {
    let mut outcomes: Vec<Option<OracleOutcome>> = vec![None; candidates.len()];

    // Cache bypass first.
    let mut pending: Vec<usize> = Vec::new();
    for (i, candidate) in candidates.iter().enumerate() {
        let key = summary_cache_key(
            &candidate.message.canonical_hash,
            prompt_version,
            candidate.preview.as_deref(),
        );
        match store.get_summary_cache(&key, digest_language).await {
            Ok(Some(entry)) => {
                counter!("oracle_cache_hits_total").increment(1);
                outcomes[i] = Some(OracleOutcome {
                    result: BatchResult {
                        index: i,
                        relevance: entry.relevance,
                        importance: entry.importance,
                        topic: entry.topic,
                        summary: entry.summary,
                        language: entry.language,
                        source_channel: None,
                    },
                    cached: true,
                });
            }
            Ok(None) => pending.push(i),
            Err(e) => {
                warn!(error = %e, "summary cache lookup failed, calling oracle");
                pending.push(i);
            }
        }
    }

    // Group by model hint. Today every candidate lands in the settings
    // bucket; the grouping keeps per-task routing possible.
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for i in pending {
        groups.entry(settings.oracle_model.clone()).or_default().push(i);
    }

    for (model, indices) in groups {
        let results =
            call_group(store, oracle, settings, digest_language, &model, &indices, candidates)
                .await;
        if let Some(results) = results {
            for (slot, result) in indices.iter().zip(results) {
                outcomes[*slot] = Some(OracleOutcome { result, cached: false });
            }
        }
    }

    reanalyze(oracle, settings, digest_language, candidates, &mut outcomes).await;

    outcomes
}

/// Second pass over non-cached results whose first-pass importance
/// clears the re-analysis bar, typically with a stronger model. Only
/// successful results overwrite; a failure keeps the first pass.
async fn reanalyze<O: Oracle + ?Sized>(
    oracle: &O,
    settings: &PipelineSettings,
    digest_language: &str,
    candidates: &[Candidate],
    outcomes: &mut [Option<OracleOutcome>],
) {
    let indices: Vec<usize> = outcomes
        .iter()
        .enumerate()
        .filter_map(|(i, outcome)| match outcome {
            Some(o) if !o.cached && o.result.importance > REANALYSIS_IMPORTANCE_MIN => Some(i),
            _ => None,
        })
        .collect();
    if indices.is_empty() {
        return;
    }
    info!(count = indices.len(), "re-analyzing high-importance items");

    let messages: Vec<OracleMessage> =
        indices.iter().map(|&i| oracle_message(&candidates[i])).collect();
    let started = Instant::now();
    let call = oracle.process_batch(
        &messages,
        digest_language,
        &settings.reanalysis_model,
        &settings.tone,
    );
    match tokio::time::timeout(ORACLE_BATCH_TIMEOUT, call).await {
        Ok(Ok(results)) => {
            histogram!("oracle_batch_duration_seconds", "pass" => "reanalysis")
                .record(started.elapsed().as_secs_f64());
            for (slot, result) in indices.iter().zip(results) {
                outcomes[*slot] = Some(OracleOutcome { result: sanitize(result), cached: false });
            }
        }
        Ok(Err(e)) => warn!(error = %e, "re-analysis failed, keeping first-pass results"),
        Err(_) => warn!("re-analysis timed out, keeping first-pass results"),
    }
}

async fn call_group<S: Storage, O: Oracle + ?Sized>(
    store: &S,
    oracle: &O,
    settings: &PipelineSettings,
    digest_language: &str,
    model: &str,
    indices: &[usize],
    candidates: &[Candidate],
) -> Option<Vec<BatchResult>> {
    let messages: Vec<OracleMessage> =
        indices.iter().map(|&i| oracle_message(&candidates[i])).collect();

    let started = Instant::now();
    let call = oracle.process_batch(&messages, digest_language, model, &settings.tone);
    let results = match tokio::time::timeout(ORACLE_BATCH_TIMEOUT, call).await {
        Ok(Ok(results)) => results,
        Ok(Err(e)) => {
            warn!(model, error = %e, "oracle batch failed, releasing claims");
            release_group(store, indices, candidates).await;
            return None;
        }
        Err(_) => {
            warn!(model, "oracle batch timed out, releasing claims");
            release_group(store, indices, candidates).await;
            return None;
        }
    };
    histogram!("oracle_batch_duration_seconds", "pass" => "first")
        .record(started.elapsed().as_secs_f64());

    if results.len() != messages.len() {
        warn!(
            submitted = messages.len(),
            returned = results.len(),
            "oracle result count mismatch, mapping positionally"
        );
        if results.len() < messages.len() {
            // Candidates past the common prefix got no result; put their
            // claims back instead of waiting out the stuck sweep.
            let ids: Vec<Uuid> =
                indices[results.len()..].iter().map(|&i| candidates[i].message.id).collect();
            if let Err(e) = store.release_claims(&ids).await {
                warn!(error = %e, "failed to release unmapped claims");
            }
        }
    }
    Some(results.into_iter().take(messages.len()).map(sanitize).collect())
}

async fn release_group<S: Storage>(store: &S, indices: &[usize], candidates: &[Candidate]) {
    counter!("oracle_batches_failed_total").increment(1);
    let ids: Vec<Uuid> = indices.iter().map(|&i| candidates[i].message.id).collect();
    if let Err(e) = store.release_claims(&ids).await {
        warn!(error = %e, "failed to release claims after oracle error");
    }
}

fn oracle_message(candidate: &Candidate) -> OracleMessage {
    OracleMessage {
        text: candidate.text.clone(),
        channel_name: candidate.message.channel_name.clone(),
        context: candidate.context.clone(),
        link_excerpts: candidate.links.iter().map(|l| l.content.clone()).collect(),
    }
}

fn sanitize(mut result: BatchResult) -> BatchResult {
    result.relevance = clamp01(result.relevance);
    result.importance = clamp01(result.importance);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{batch_result, candidate, raw_message, MemoryStore, ScriptedOracle};
    use briefwire_common::SummaryCacheEntry;
    use chrono::Utc;

    #[test]
    fn cache_key_shape() {
        assert_eq!(summary_cache_key("h1", "v1", None), "h1:v1");
        assert_eq!(summary_cache_key("h1", "v1", Some("")), "h1:v1");
        let with_preview = summary_cache_key("h1", "v1", Some("preview text"));
        assert_eq!(with_preview, format!("h1:v1:{}", sha256_hex("preview text")));
    }

    #[tokio::test]
    async fn cache_hit_skips_the_oracle() {
        let store = MemoryStore::new();
        let oracle = ScriptedOracle::new();
        let cand = candidate(raw_message(1, "cached story"), vec![]);
        let key = summary_cache_key(&cand.message.canonical_hash, "v1", None);
        store.put_summary_cache(
            &key,
            "ru",
            SummaryCacheEntry {
                summary: "Cached summary of the story".to_string(),
                topic: "news".to_string(),
                language: "en".to_string(),
                relevance: 0.7,
                importance: 0.6,
                updated_at: Utc::now(),
            },
        );

        let outcomes = run_batch(
            &store,
            &oracle,
            &PipelineSettings::default(),
            "ru",
            "v1",
            std::slice::from_ref(&cand),
        )
        .await;
        let outcome = outcomes[0].as_ref().unwrap();
        assert!(outcome.cached);
        assert_eq!(outcome.result.summary, "Cached summary of the story");
        assert_eq!(oracle.batch_calls(), 0);
    }

    #[tokio::test]
    async fn oracle_failure_releases_claims() {
        let store = MemoryStore::new();
        let oracle = ScriptedOracle::new().failing_batch();
        let cand = candidate(raw_message(1, "story"), vec![]);

        let outcomes = run_batch(
            &store,
            &oracle,
            &PipelineSettings::default(),
            "ru",
            "v1",
            std::slice::from_ref(&cand),
        )
        .await;
        assert!(outcomes[0].is_none());
        assert_eq!(store.released_claims(), vec![cand.message.id]);
    }

    #[tokio::test]
    async fn length_mismatch_maps_positionally() {
        let store = MemoryStore::new();
        let oracle = ScriptedOracle::new();
        oracle.push_batch_results(vec![batch_result(0, 0.8, 0.5, "only one result")]);
        let a = candidate(raw_message(1, "first story"), vec![]);
        let b = candidate(raw_message(2, "second story"), vec![]);

        let b_id = b.message.id;
        let outcomes = run_batch(
            &store,
            &oracle,
            &PipelineSettings::default(),
            "ru",
            "v1",
            &[a, b],
        )
        .await;
        assert!(outcomes[0].is_some());
        assert!(outcomes[1].is_none());
        // The unmapped candidate goes back to the pool immediately.
        assert_eq!(store.released_claims(), vec![b_id]);
    }

    #[tokio::test]
    async fn high_importance_results_get_a_second_pass() {
        let store = MemoryStore::new();
        let oracle = ScriptedOracle::new();
        oracle.push_batch_results(vec![
            batch_result(0, 0.9, 0.95, "first-pass summary"),
            batch_result(1, 0.5, 0.4, "ordinary summary"),
        ]);
        oracle.push_batch_results(vec![batch_result(0, 0.95, 0.97, "refined summary")]);
        let a = candidate(raw_message(1, "major development"), vec![]);
        let b = candidate(raw_message(2, "minor note"), vec![]);

        let outcomes = run_batch(
            &store,
            &oracle,
            &PipelineSettings::default(),
            "ru",
            "v1",
            &[a, b],
        )
        .await;
        assert_eq!(outcomes[0].as_ref().unwrap().result.summary, "refined summary");
        assert_eq!(outcomes[1].as_ref().unwrap().result.summary, "ordinary summary");
        assert_eq!(oracle.batch_calls(), 2);
    }

    #[tokio::test]
    async fn scores_are_clamped() {
        let store = MemoryStore::new();
        let oracle = ScriptedOracle::new();
        oracle.push_batch_results(vec![batch_result(0, 1.7, -0.2, "summary")]);
        let cand = candidate(raw_message(1, "story"), vec![]);

        let outcomes = run_batch(
            &store,
            &oracle,
            &PipelineSettings::default(),
            "ru",
            "v1",
            std::slice::from_ref(&cand),
        )
        .await;
        let result = &outcomes[0].as_ref().unwrap().result;
        assert_eq!(result.relevance, 1.0);
        assert_eq!(result.importance, 0.0);
    }
}
