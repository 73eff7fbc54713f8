//! Follow-up work queues: fact-check and source-enrichment.
//! Enqueues are idempotent per item.

use uuid::Uuid;

use crate::{db_err, PipelineStore, Result};

impl PipelineStore {
    /// Returns true if a new fact-check row was enqueued.
    pub async fn enqueue_fact_check(&self, item_id: Uuid, claim: &str) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO fact_check_queue (item_id, claim) VALUES ($1, $2)
             ON CONFLICT (item_id) DO NOTHING",
        )
        .bind(item_id)
        .bind(claim)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    /// Returns true if a new enrichment row was enqueued.
    pub async fn enqueue_enrichment(&self, item_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO enrichment_queue (item_id) VALUES ($1)
             ON CONFLICT (item_id) DO NOTHING",
        )
        .bind(item_id)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_pending_fact_checks(&self) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM fact_check_queue WHERE status = 'pending'",
        )
        .fetch_one(self.pool())
        .await
        .map_err(db_err)
    }

    pub async fn count_pending_enrichment(&self) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM enrichment_queue WHERE status = 'pending'",
        )
        .fetch_one(self.pool())
        .await
        .map_err(db_err)
    }
}
