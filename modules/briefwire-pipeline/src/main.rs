use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use briefwire_common::{Config, LinkResolver, NoopEmbedder, NoopLinkResolver, TextEmbedder};
use briefwire_oracle::{EmbedClient, OracleClient};
use briefwire_pipeline::PipelineWorker;
use briefwire_store::PipelineStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    config.log_redacted();

    let store = PipelineStore::connect(&config.database_url).await?;
    store.migrate().await?;
    info!("database connected and migrated");

    let mut oracle = OracleClient::new(&config.oracle_api_key);
    if let Some(base_url) = &config.oracle_base_url {
        oracle = oracle.with_base_url(base_url);
    }

    let embedder: Arc<dyn TextEmbedder> = if config.embedding_api_key.is_empty() {
        info!("no embedding key configured, semantic dedup disabled");
        Arc::new(NoopEmbedder)
    } else {
        Arc::new(EmbedClient::new(&config.embedding_api_key))
    };
    let links: Arc<dyn LinkResolver> = Arc::new(NoopLinkResolver);

    let worker = PipelineWorker::new(Arc::new(store), Arc::new(oracle), embedder, links, config);
    worker.run().await
}
