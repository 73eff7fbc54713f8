//! Summary cache keyed on canonical content and prompt version.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use briefwire_common::SummaryCacheEntry;

use crate::{db_err, PipelineStore, Result};

/// Entries older than this are treated as absent.
const CACHE_MAX_AGE_DAYS: i64 = 30;

#[derive(Debug, FromRow)]
struct CacheRow {
    summary: String,
    topic: String,
    language: String,
    relevance: f64,
    importance: f64,
    updated_at: DateTime<Utc>,
}

impl PipelineStore {
    pub async fn get_summary_cache(
        &self,
        cache_key: &str,
        digest_language: &str,
    ) -> Result<Option<SummaryCacheEntry>> {
        let row = sqlx::query_as::<_, CacheRow>(
            r#"
            SELECT summary, topic, language, relevance, importance, updated_at
            FROM summary_cache
            WHERE cache_key = $1 AND digest_language = $2
              AND updated_at >= now() - make_interval(days => $3)
            "#,
        )
        .bind(cache_key)
        .bind(digest_language)
        .bind(CACHE_MAX_AGE_DAYS as i32)
        .fetch_optional(self.pool())
        .await
        .map_err(db_err)?;

        Ok(row.map(|r| SummaryCacheEntry {
            summary: r.summary,
            topic: r.topic,
            language: r.language,
            relevance: r.relevance,
            importance: r.importance,
            updated_at: r.updated_at,
        }))
    }

    pub async fn upsert_summary_cache(
        &self,
        cache_key: &str,
        digest_language: &str,
        entry: &SummaryCacheEntry,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO summary_cache
                (cache_key, digest_language, summary, topic, language,
                 relevance, importance, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, now())
            ON CONFLICT (cache_key, digest_language) DO UPDATE SET
                summary = EXCLUDED.summary,
                topic = EXCLUDED.topic,
                language = EXCLUDED.language,
                relevance = EXCLUDED.relevance,
                importance = EXCLUDED.importance,
                updated_at = now()
            "#,
        )
        .bind(cache_key)
        .bind(digest_language)
        .bind(&entry.summary)
        .bind(&entry.topic)
        .bind(&entry.language)
        .bind(entry.relevance)
        .bind(entry.importance)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }
}
