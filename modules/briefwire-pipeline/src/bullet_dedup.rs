//! Periodic cross-item bullet dedup. The store hands back the pool
//! already ordered canonical-first (ready before pending, then
//! importance descending); the scan is pure and the state transitions
//! run afterwards, so re-running is always safe.

use chrono::Duration;
use metrics::counter;
use tracing::{info, warn};
use uuid::Uuid;

use briefwire_common::score::cosine_similarity;
use briefwire_common::{Bullet, BulletStatus};

use crate::settings::PipelineSettings;
use crate::traits::Storage;

#[derive(Debug, Default, PartialEq)]
pub struct DedupPlan {
    /// (duplicate bullet, canonical bullet) pairs.
    pub duplicates: Vec<(Uuid, Uuid)>,
    /// Pending bullets that become canonical themselves.
    pub ready: Vec<Uuid>,
}

/// Pairwise scan over the ordered pool. Bullets from the same item are
/// never dedup partners; already-ready bullets are never demoted.
pub fn plan(bullets: &[Bullet], threshold: f64) -> DedupPlan {
    let mut duplicate_of: Vec<Option<Uuid>> = vec![None; bullets.len()];

    for i in 0..bullets.len() {
        if duplicate_of[i].is_some() || bullets[i].embedding.is_empty() {
            continue;
        }
        for j in (i + 1)..bullets.len() {
            if duplicate_of[j].is_some()
                || bullets[j].status != BulletStatus::Pending
                || bullets[j].item_id == bullets[i].item_id
                || bullets[j].embedding.is_empty()
            {
                continue;
            }
            if cosine_similarity(&bullets[i].embedding, &bullets[j].embedding) >= threshold {
                duplicate_of[j] = Some(bullets[i].id);
            }
        }
    }

    let mut plan = DedupPlan::default();
    for (i, bullet) in bullets.iter().enumerate() {
        match duplicate_of[i] {
            Some(canonical) => plan.duplicates.push((bullet.id, canonical)),
            None if bullet.status == BulletStatus::Pending => plan.ready.push(bullet.id),
            None => {}
        }
    }
    plan
}

pub async fn run<S: Storage>(store: &S, settings: &PipelineSettings) -> anyhow::Result<()> {
    let pool = store
        .bullets_for_dedup(Duration::hours(settings.dedup_lookback_hours))
        .await?;
    if pool.is_empty() {
        return Ok(());
    }

    let plan = plan(&pool, settings.bullet_dedup_threshold);
    for (duplicate, canonical) in &plan.duplicates {
        if let Err(e) = store.mark_bullet_duplicate(*duplicate, *canonical).await {
            warn!(bullet_id = %duplicate, error = %e, "failed to mark bullet duplicate");
        }
    }
    for bullet_id in &plan.ready {
        if let Err(e) = store.mark_bullet_ready(*bullet_id).await {
            warn!(%bullet_id, error = %e, "failed to mark bullet ready");
        }
    }

    counter!("bullets_deduped_total").increment(plan.duplicates.len() as u64);
    info!(
        pool = pool.len(),
        duplicates = plan.duplicates.len(),
        promoted = plan.ready.len(),
        "bullet dedup pass complete"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::bullet;

    #[test]
    fn clustered_pending_bullet_points_at_canonical() {
        let item_x = Uuid::new_v4();
        let item_y = Uuid::new_v4();
        let a = bullet(item_x, 0.9, BulletStatus::Pending, vec![1.0, 0.0]);
        let b = bullet(item_y, 0.8, BulletStatus::Pending, vec![0.999, 0.02]);
        let c = bullet(item_x, 0.7, BulletStatus::Pending, vec![1.0, 0.01]);

        let plan = plan(&[a.clone(), b.clone(), c.clone()], 0.92);
        assert_eq!(plan.duplicates, vec![(b.id, a.id)]);
        // Same item as the canonical, never its partner.
        assert_eq!(plan.ready, vec![a.id, c.id]);
    }

    #[test]
    fn ready_bullets_stay_untouched() {
        let a = bullet(Uuid::new_v4(), 0.9, BulletStatus::Ready, vec![1.0, 0.0]);
        let b = bullet(Uuid::new_v4(), 0.8, BulletStatus::Pending, vec![1.0, 0.001]);

        let plan = plan(&[a.clone(), b.clone()], 0.92);
        assert_eq!(plan.duplicates, vec![(b.id, a.id)]);
        assert!(plan.ready.is_empty());
    }

    #[test]
    fn empty_embeddings_sit_out() {
        let a = bullet(Uuid::new_v4(), 0.9, BulletStatus::Pending, vec![]);
        let b = bullet(Uuid::new_v4(), 0.8, BulletStatus::Pending, vec![1.0, 0.0]);

        let plan = plan(&[a.clone(), b.clone()], 0.92);
        assert!(plan.duplicates.is_empty());
        assert_eq!(plan.ready, vec![a.id, b.id]);
    }

    #[test]
    fn duplicates_do_not_chain() {
        let a = bullet(Uuid::new_v4(), 0.9, BulletStatus::Pending, vec![1.0, 0.0]);
        let b = bullet(Uuid::new_v4(), 0.8, BulletStatus::Pending, vec![0.999, 0.02]);
        let c = bullet(Uuid::new_v4(), 0.7, BulletStatus::Pending, vec![0.998, 0.04]);

        let plan = plan(&[a.clone(), b.clone(), c.clone()], 0.92);
        // Both cluster to A; B never becomes a canonical for C.
        assert_eq!(plan.duplicates, vec![(b.id, a.id), (c.id, a.id)]);
        assert_eq!(plan.ready, vec![a.id]);
    }

    #[test]
    fn dissimilar_pool_is_a_no_op_plan() {
        let a = bullet(Uuid::new_v4(), 0.9, BulletStatus::Ready, vec![1.0, 0.0]);
        let b = bullet(Uuid::new_v4(), 0.8, BulletStatus::Pending, vec![0.0, 1.0]);

        let plan = plan(&[a, b.clone()], 0.92);
        assert!(plan.duplicates.is_empty());
        assert_eq!(plan.ready, vec![b.id]);
    }
}
