//! Postgres persistence for the pipeline worker. All mutable state lives
//! here; workers share nothing in memory.

mod bullets;
mod cache;
mod items;
mod messages;
mod queues;
mod settings;
mod stats;

use briefwire_common::BriefwireError;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub type Result<T> = std::result::Result<T, BriefwireError>;

pub(crate) fn db_err(e: sqlx::Error) -> BriefwireError {
    BriefwireError::Database(e.to_string())
}

#[derive(Clone)]
pub struct PipelineStore {
    pool: PgPool,
}

impl PipelineStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(db_err)?;
        Ok(Self { pool })
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| BriefwireError::Database(e.to_string()))?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}
