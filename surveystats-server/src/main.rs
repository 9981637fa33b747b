use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use surveystats_core::DatasetIndex;
use surveystats_server::{create_router, AppState, PoolCoordinator, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load configuration
    let config = Arc::new(ServerConfig::load()?);
    info!("Loaded configuration: {:?}", config);

    // Ingest the survey dataset before accepting any submission
    let index = Arc::new(
        DatasetIndex::from_csv_path(&config.dataset.csv_path).with_context(|| {
            format!("Failed to ingest dataset from {}", config.dataset.csv_path)
        })?,
    );
    info!(
        "Ingested {} records across {} questions and {} states",
        index.record_count(),
        index.question_count(),
        index.state_count()
    );

    // Start the worker pool
    let coordinator = Arc::new(PoolCoordinator::new(&config, index)?);

    // Create shared state
    let state = AppState {
        coordinator,
        config: config.clone(),
    };

    // Build router
    let app = create_router(state);

    // Start server. The server keeps answering status and result queries
    // after a graceful pool shutdown; only process exit ends it.
    let listener = TcpListener::bind(&config.bind_address).await?;
    let addr = listener.local_addr()?;
    info!("Survey statistics server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
