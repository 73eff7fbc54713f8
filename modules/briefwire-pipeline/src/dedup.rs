//! Item-level deduplication. Strict mode probes the store by canonical
//! hash; semantic mode layers in-batch, same-channel, and global
//! embedding checks with widening time windows.

use chrono::{DateTime, Utc};

use briefwire_common::score::cosine_similarity;
use briefwire_common::DropReason;

use crate::settings::{DedupMode, PipelineSettings};
use crate::traits::Storage;
use crate::Candidate;

/// Floor for the same-channel threshold: near-identical reposts inside
/// one channel are common, so the bar is higher than the cluster one.
const SAME_CHANNEL_FLOOR: f64 = 0.85;

#[derive(Debug, Clone, PartialEq)]
pub enum DedupVerdict {
    Unique,
    Duplicate { reason: DropReason, detail: String },
}

/// Decide whether `candidate` duplicates an already-accepted candidate
/// from this batch or a stored item.
pub async fn check<S: Storage>(
    store: &S,
    settings: &PipelineSettings,
    candidate: &Candidate,
    accepted: &[Candidate],
    now: DateTime<Utc>,
) -> anyhow::Result<DedupVerdict> {
    match settings.dedup_mode {
        DedupMode::Strict => strict_check(store, candidate).await,
        DedupMode::Semantic => semantic_check(store, settings, candidate, accepted, now).await,
    }
}

async fn strict_check<S: Storage>(
    store: &S,
    candidate: &Candidate,
) -> anyhow::Result<DedupVerdict> {
    let hit = store
        .strict_duplicate(&candidate.message.canonical_hash, candidate.message.id)
        .await?;
    Ok(match hit {
        Some(item_id) => DedupVerdict::Duplicate {
            reason: DropReason::DedupStrictGlobal,
            detail: item_id.to_string(),
        },
        None => DedupVerdict::Unique,
    })
}

async fn semantic_check<S: Storage>(
    store: &S,
    settings: &PipelineSettings,
    candidate: &Candidate,
    accepted: &[Candidate],
    now: DateTime<Utc>,
) -> anyhow::Result<DedupVerdict> {
    // No embedding means semantic checks are undecidable; let it through.
    if candidate.embedding.is_empty() {
        return Ok(DedupVerdict::Unique);
    }
    let threshold = settings.cluster_similarity_threshold;

    if let Some(twin) = in_batch_duplicate(candidate, accepted, threshold) {
        return Ok(DedupVerdict::Duplicate {
            reason: DropReason::DedupSemanticBatch,
            detail: twin,
        });
    }

    let same_channel_threshold = threshold.max(SAME_CHANNEL_FLOOR);
    if let Some((item_id, similarity)) = store
        .similar_item(
            &candidate.embedding,
            now - settings.dedup_same_channel_window,
            Some(candidate.message.channel_id),
            same_channel_threshold,
        )
        .await?
    {
        return Ok(DedupVerdict::Duplicate {
            reason: DropReason::DedupSemanticSameChannel,
            detail: format!("{item_id} sim={similarity:.3}"),
        });
    }

    if let Some((item_id, similarity)) = store
        .similar_item(&candidate.embedding, now - settings.dedup_window, None, threshold)
        .await?
    {
        return Ok(DedupVerdict::Duplicate {
            reason: DropReason::DedupSemanticGlobal,
            detail: format!("{item_id} sim={similarity:.3}"),
        });
    }

    Ok(DedupVerdict::Unique)
}

fn in_batch_duplicate(
    candidate: &Candidate,
    accepted: &[Candidate],
    threshold: f64,
) -> Option<String> {
    accepted
        .iter()
        .find(|other| {
            cosine_similarity(&candidate.embedding, &other.embedding) > threshold
        })
        .map(|other| other.message.id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{candidate, raw_message, MemoryStore};

    fn settings() -> PipelineSettings {
        PipelineSettings::default()
    }

    #[tokio::test]
    async fn strict_mode_flags_stored_hash() {
        let store = MemoryStore::new();
        let settings = PipelineSettings { dedup_mode: DedupMode::Strict, ..settings() };
        let msg = raw_message(1, "the same story text again");
        store.set_strict_duplicate(&msg.canonical_hash, uuid::Uuid::new_v4());

        let cand = candidate(msg, vec![]);
        let verdict = check(&store, &settings, &cand, &[], Utc::now()).await.unwrap();
        assert!(matches!(
            verdict,
            DedupVerdict::Duplicate { reason: DropReason::DedupStrictGlobal, .. }
        ));
    }

    #[tokio::test]
    async fn empty_embedding_passes_semantic_mode() {
        let store = MemoryStore::new();
        let cand = candidate(raw_message(1, "unembedded text"), vec![]);
        let verdict = check(&store, &settings(), &cand, &[], Utc::now()).await.unwrap();
        assert_eq!(verdict, DedupVerdict::Unique);
    }

    #[tokio::test]
    async fn in_batch_similarity_above_threshold_is_duplicate() {
        let store = MemoryStore::new();
        let first = candidate(raw_message(1, "first"), vec![1.0, 0.0, 0.0]);
        let near = candidate(raw_message(2, "second"), vec![0.99, 0.1, 0.0]);

        let verdict = check(&store, &settings(), &near, &[first.clone()], Utc::now())
            .await
            .unwrap();
        match verdict {
            DedupVerdict::Duplicate { reason, detail } => {
                assert_eq!(reason, DropReason::DedupSemanticBatch);
                assert_eq!(detail, first.message.id.to_string());
            }
            other => panic!("expected duplicate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn orthogonal_in_batch_vectors_pass() {
        let store = MemoryStore::new();
        let first = candidate(raw_message(1, "first"), vec![1.0, 0.0, 0.0]);
        let far = candidate(raw_message(2, "second"), vec![0.0, 1.0, 0.0]);

        let verdict = check(&store, &settings(), &far, &[first], Utc::now()).await.unwrap();
        assert_eq!(verdict, DedupVerdict::Unique);
    }

    #[tokio::test]
    async fn same_channel_probe_uses_raised_threshold() {
        let store = MemoryStore::new();
        let cand = candidate(raw_message(1, "channel repost"), vec![1.0, 0.0]);
        store.add_similar_item(Some(cand.message.channel_id), uuid::Uuid::new_v4(), 0.9);

        let verdict = check(&store, &settings(), &cand, &[], Utc::now()).await.unwrap();
        assert!(matches!(
            verdict,
            DedupVerdict::Duplicate { reason: DropReason::DedupSemanticSameChannel, .. }
        ));
        let probes = store.similar_item_probes();
        assert_eq!(probes[0].threshold, 0.85);
    }

    #[tokio::test]
    async fn global_probe_uses_cluster_threshold() {
        let store = MemoryStore::new();
        let cand = candidate(raw_message(1, "global repost"), vec![1.0, 0.0]);
        store.add_similar_item(None, uuid::Uuid::new_v4(), 0.8);

        let verdict = check(&store, &settings(), &cand, &[], Utc::now()).await.unwrap();
        assert!(matches!(
            verdict,
            DedupVerdict::Duplicate { reason: DropReason::DedupSemanticGlobal, .. }
        ));
        let probes = store.similar_item_probes();
        assert_eq!(probes.last().unwrap().threshold, 0.75);
    }
}
