//! Recovery entry point.
//!
//! Connects to the configured deployment, opens the token store (which
//! sweeps abandoned saga intents when native transactions are unavailable)
//! and reports the result.

use std::process::ExitCode;

use document_store::{DocumentBackend, MongoStore};
use token_store::{StoreConfig, SweepReport, TokenStore};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

async fn recover(config: StoreConfig) -> token_store::Result<Option<SweepReport>> {
    let backend = MongoStore::connect(&config.mongo_options()).await?;
    backend.ping().await?;
    tracing::info!(database = %config.database, "connected to MongoDB");

    let store = TokenStore::open(backend, config).await?;
    Ok(store.last_sweep().copied())
}

#[tokio::main]
async fn main() -> ExitCode {
    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Load configuration
    let config = StoreConfig::from_env();
    tracing::info!(
        service = %config.service,
        replica_set = config.replica_set,
        "starting token store recovery"
    );

    // 3. Open the store and report
    match recover(config).await {
        Ok(Some(report)) if report.is_clean() => {
            tracing::info!(repaired = report.repaired, "recovery complete");
            ExitCode::SUCCESS
        }
        Ok(Some(report)) => {
            tracing::warn!(
                failed = report.failed,
                skipped = report.skipped,
                "recovery left intents in place, rerun to retry"
            );
            ExitCode::SUCCESS
        }
        Ok(None) => {
            tracing::info!("native transactions in use, nothing to recover");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, connectivity = e.is_connectivity(), "recovery failed");
            ExitCode::FAILURE
        }
    }
}
