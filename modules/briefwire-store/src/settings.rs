//! JSON-valued runtime settings with an audit history. Reads are
//! tolerant: a missing key or failed read never poisons the batch.

use tracing::warn;

use crate::{db_err, PipelineStore, Result};

impl PipelineStore {
    /// Read a setting. Returns None on missing keys AND on read errors —
    /// callers fall back to compiled defaults either way.
    pub async fn get_setting(&self, key: &str) -> Option<serde_json::Value> {
        let result = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT value FROM settings WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(self.pool())
        .await;
        match result {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Failed to read setting, using default");
                None
            }
        }
    }

    /// Write a setting, archiving the previous value to the history table.
    pub async fn save_setting(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings_history (key, value)
             SELECT key, value FROM settings WHERE key = $1",
        )
        .bind(key)
        .execute(self.pool())
        .await
        .map_err(db_err)?;

        sqlx::query(
            "INSERT INTO settings (key, value, updated_at) VALUES ($1, $2, now())
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()",
        )
        .bind(key)
        .bind(value)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn delete_setting(&self, key: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings_history (key, value)
             SELECT key, value FROM settings WHERE key = $1",
        )
        .bind(key)
        .execute(self.pool())
        .await
        .map_err(db_err)?;

        sqlx::query("DELETE FROM settings WHERE key = $1")
            .bind(key)
            .execute(self.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }
}
