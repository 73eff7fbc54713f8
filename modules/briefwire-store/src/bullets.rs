//! Bullet persistence and the cross-item dedup pool.

use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use briefwire_common::{Bullet, BulletStatus};

use crate::{db_err, PipelineStore, Result};

#[derive(Debug, FromRow)]
struct BulletRow {
    id: Uuid,
    item_id: Uuid,
    bullet_index: i32,
    text: String,
    topic: String,
    relevance_score: f64,
    importance_score: f64,
    embedding: Vec<f32>,
    bullet_hash: String,
    bullet_cluster_id: Option<Uuid>,
    status: String,
    created_at: DateTime<Utc>,
}

impl BulletRow {
    fn into_bullet(self) -> Bullet {
        let status = match self.status.as_str() {
            "ready" => BulletStatus::Ready,
            "duplicate" => BulletStatus::Duplicate,
            _ => BulletStatus::Pending,
        };
        Bullet {
            id: self.id,
            item_id: self.item_id,
            bullet_index: self.bullet_index,
            text: self.text,
            topic: self.topic,
            relevance_score: self.relevance_score,
            importance_score: self.importance_score,
            embedding: self.embedding,
            bullet_hash: self.bullet_hash,
            bullet_cluster_id: self.bullet_cluster_id,
            status,
            created_at: self.created_at,
        }
    }
}

impl PipelineStore {
    pub async fn insert_bullet(&self, bullet: &Bullet) -> Result<Uuid> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO bullets
                (id, item_id, bullet_index, text, topic, relevance_score,
                 importance_score, embedding, bullet_hash, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(bullet.id)
        .bind(bullet.item_id)
        .bind(bullet.bullet_index)
        .bind(&bullet.text)
        .bind(&bullet.topic)
        .bind(bullet.relevance_score)
        .bind(bullet.importance_score)
        .bind(&bullet.embedding)
        .bind(&bullet.bullet_hash)
        .bind(bullet.status.as_str())
        .fetch_one(self.pool())
        .await
        .map_err(db_err)
    }

    pub async fn update_bullet_embedding(&self, bullet_id: Uuid, embedding: &[f32]) -> Result<()> {
        sqlx::query("UPDATE bullets SET embedding = $2 WHERE id = $1")
            .bind(bullet_id)
            .bind(embedding)
            .execute(self.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// The dedup pool: all pending bullets plus ready bullets from the
    /// lookback window, canonical candidates first (ready before pending),
    /// then by importance descending.
    pub async fn bullets_for_dedup(&self, lookback: Duration) -> Result<Vec<Bullet>> {
        let cutoff = Utc::now() - lookback;
        let rows = sqlx::query_as::<_, BulletRow>(
            r#"
            SELECT id, item_id, bullet_index, text, topic, relevance_score,
                   importance_score, embedding, bullet_hash, bullet_cluster_id,
                   status, created_at
            FROM bullets
            WHERE status = 'pending' OR (status = 'ready' AND created_at >= $1)
            ORDER BY CASE status WHEN 'ready' THEN 0 ELSE 1 END,
                     importance_score DESC
            "#,
        )
        .bind(cutoff)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(BulletRow::into_bullet).collect())
    }

    /// Mark a bullet as a duplicate of its canonical bullet.
    pub async fn mark_bullet_duplicate(&self, bullet_id: Uuid, canonical_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE bullets SET status = 'duplicate', bullet_cluster_id = $2 WHERE id = $1",
        )
        .bind(bullet_id)
        .bind(canonical_id)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Promote a pending bullet to ready; a ready bullet is its own cluster.
    pub async fn mark_bullet_ready(&self, bullet_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE bullets SET status = 'ready', bullet_cluster_id = id WHERE id = $1")
            .bind(bullet_id)
            .execute(self.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }
}
