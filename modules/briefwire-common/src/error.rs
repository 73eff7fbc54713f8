use thiserror::Error;

#[derive(Error, Debug)]
pub enum BriefwireError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Oracle error: {0}")]
    Oracle(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
