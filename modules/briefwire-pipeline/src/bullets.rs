//! Oracle-assisted bullet extraction. Selection is pure (hash dedupe
//! plus length rules against the source message); persistence inserts
//! pending bullets and schedules their embeddings in the background.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use briefwire_common::textprep::bullet_hash;
use briefwire_common::{
    Bullet, BulletInput, BulletStatus, ExtractedBullet, Oracle, TextEmbedder,
};

use crate::settings::PipelineSettings;
use crate::traits::Storage;

/// Messages shorter than this keep at most one bullet.
const SHORT_MESSAGE_RUNES: usize = 70;

/// What bullet extraction contributed to the item.
#[derive(Debug, Clone, Copy, Default)]
pub struct BulletCounts {
    pub total: i32,
    pub included: i32,
    /// Max scores across kept bullets; overwrite the item's when present.
    pub max_relevance: Option<f64>,
    pub max_importance: Option<f64>,
}

/// Dedupe by normalized-text hash and apply the length rules. Kept
/// bullets are ordered best-first (importance, then relevance).
pub fn select_bullets(
    extracted: Vec<ExtractedBullet>,
    message_text: &str,
    item_topic: &str,
) -> Vec<ExtractedBullet> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut unique: Vec<ExtractedBullet> = extracted
        .into_iter()
        .filter(|b| !b.text.trim().is_empty())
        .filter(|b| seen.insert(bullet_hash(&b.text)))
        .map(|mut b| {
            // The item's topic wins; the suggested one is only a fallback
            // for items without a topic of their own.
            if !item_topic.trim().is_empty() {
                b.topic = Some(item_topic.to_string());
            }
            b
        })
        .collect();
    unique.sort_by(|a, b| {
        b.importance
            .partial_cmp(&a.importance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.relevance.partial_cmp(&a.relevance).unwrap_or(std::cmp::Ordering::Equal))
    });

    let message_runes = message_text.chars().count();
    if message_runes < SHORT_MESSAGE_RUNES {
        // Short source: at most the best bullet, and only if it fits.
        return unique
            .into_iter()
            .take(1)
            .filter(|b| b.text.chars().count() <= message_runes)
            .collect();
    }

    let mut kept = Vec::new();
    let mut cumulative = 0usize;
    for bullet in unique {
        let runes = bullet.text.chars().count();
        if cumulative + runes > message_runes {
            continue;
        }
        cumulative += runes;
        kept.push(bullet);
    }
    kept
}

/// Call the oracle and run selection. Returns at most
/// `bullet_batch_size` bullets, best-first; an oracle failure returns
/// none, leaving the item on its oracle scores.
pub async fn extract<O: Oracle + ?Sized>(
    oracle: &O,
    settings: &PipelineSettings,
    digest_language: &str,
    item_topic: &str,
    message_text: &str,
    preview: Option<&str>,
    summary: &str,
) -> Vec<ExtractedBullet> {
    let input = BulletInput {
        text: message_text.to_string(),
        preview: preview.map(|p| p.to_string()),
        summary: summary.to_string(),
    };
    let extracted = match oracle
        .extract_bullets(&input, digest_language, &settings.oracle_model)
        .await
    {
        Ok(extracted) => extracted,
        Err(e) => {
            warn!(error = %e, "bullet extraction failed, item keeps oracle scores");
            return vec![];
        }
    };
    let mut selected = select_bullets(extracted, message_text, item_topic);
    selected.truncate(settings.bullet_batch_size);
    selected
}

/// Counts and max scores the item inherits from its bullets.
pub fn counts_for(selected: &[ExtractedBullet], min_importance: f64) -> BulletCounts {
    let mut counts = BulletCounts { total: selected.len() as i32, ..Default::default() };
    for bullet in selected {
        if bullet.importance >= min_importance {
            counts.included += 1;
        }
        counts.max_relevance =
            Some(counts.max_relevance.map_or(bullet.relevance, |m| m.max(bullet.relevance)));
        counts.max_importance =
            Some(counts.max_importance.map_or(bullet.importance, |m| m.max(bullet.importance)));
    }
    counts
}

/// Insert the selected bullets under a saved item. Insert failures are
/// warned and skipped; embeddings land in the background.
pub async fn persist<S, E>(
    store: Arc<S>,
    embedder: Arc<E>,
    item_id: Uuid,
    item_topic: &str,
    selected: Vec<ExtractedBullet>,
) where
    S: Storage + 'static,
    E: TextEmbedder + ?Sized + 'static,
{
    for (index, extracted) in selected.into_iter().enumerate() {
        let bullet = Bullet {
            id: Uuid::new_v4(),
            item_id,
            bullet_index: index as i32,
            text: extracted.text.clone(),
            topic: extracted.topic.clone().unwrap_or_else(|| item_topic.to_string()),
            relevance_score: extracted.relevance,
            importance_score: extracted.importance,
            embedding: vec![],
            bullet_hash: bullet_hash(&extracted.text),
            bullet_cluster_id: None,
            status: BulletStatus::Pending,
            created_at: Utc::now(),
        };
        let bullet_id = match store.insert_bullet(&bullet).await {
            Ok(id) => id,
            Err(e) => {
                warn!(%item_id, error = %e, "bullet insert failed, skipping");
                continue;
            }
        };
        spawn_embedding(Arc::clone(&store), Arc::clone(&embedder), bullet_id, extracted.text);
    }
}

/// Fire-and-forget: a bullet without an embedding simply sits out
/// semantic dedup until one lands.
fn spawn_embedding<S, E>(store: Arc<S>, embedder: Arc<E>, bullet_id: Uuid, text: String)
where
    S: Storage + 'static,
    E: TextEmbedder + ?Sized + 'static,
{
    tokio::spawn(async move {
        match embedder.embed(&text).await {
            Ok(embedding) if !embedding.is_empty() => {
                if let Err(e) = store.update_bullet_embedding(bullet_id, &embedding).await {
                    warn!(%bullet_id, error = %e, "bullet embedding update failed");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(%bullet_id, error = %e, "bullet embedding failed"),
        }
    });
}
