//! Channel score statistics and decayed rating summaries.

use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;

use briefwire_common::{ChannelStats, WeightedRatingSummary};

use crate::{db_err, PipelineStore, Result};

#[derive(Debug, FromRow)]
struct StatsRow {
    avg_relevance: f64,
    std_relevance: f64,
    avg_importance: f64,
    std_importance: f64,
}

#[derive(Debug, FromRow)]
struct RatingRow {
    rating: String,
    rated_at: DateTime<Utc>,
}

impl PipelineStore {
    /// Rolling per-channel score statistics, if any job has computed them.
    pub async fn get_channel_stats(&self, channel_id: i64) -> Result<Option<ChannelStats>> {
        let row = sqlx::query_as::<_, StatsRow>(
            "SELECT avg_relevance, std_relevance, avg_importance, std_importance
             FROM channel_stats WHERE channel_id = $1",
        )
        .bind(channel_id)
        .fetch_optional(self.pool())
        .await
        .map_err(db_err)?;

        Ok(row.map(|r| ChannelStats {
            avg_relevance: r.avg_relevance,
            std_relevance: r.std_relevance,
            avg_importance: r.avg_importance,
            std_importance: r.std_importance,
        }))
    }

    /// Rating counts over the lookback window, each weighted by an
    /// exponential half-life decay on its age.
    pub async fn get_weighted_rating_summary(
        &self,
        channel_id: i64,
        lookback: Duration,
        half_life: Duration,
    ) -> Result<WeightedRatingSummary> {
        let cutoff = Utc::now() - lookback;
        let rows = sqlx::query_as::<_, RatingRow>(
            "SELECT rating, rated_at FROM channel_ratings
             WHERE channel_id = $1 AND rated_at >= $2",
        )
        .bind(channel_id)
        .bind(cutoff)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;

        let now = Utc::now();
        let half_life_secs = half_life.num_seconds().max(1) as f64;
        let mut summary = WeightedRatingSummary::default();
        for row in rows {
            let age_secs = (now - row.rated_at).num_seconds().max(0) as f64;
            let weight = 0.5f64.powf(age_secs / half_life_secs);
            match row.rating.as_str() {
                "good" => summary.good += weight,
                "bad" => summary.bad += weight,
                "irrelevant" => summary.irrelevant += weight,
                _ => {}
            }
        }
        Ok(summary)
    }
}
