//! Plantomio client binary: wires the components and runs the
//! dispatch loop.

use std::time::Duration;

use plantomio_client::app::App;
use plantomio_client::cache::{CacheStore, FreshnessCache};
use plantomio_client::config::{ClientConfig, Settings};
use plantomio_client::fetcher::DataFetcher;
use plantomio_client::transport::TransportManager;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Deadline for every network fetch.
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("plantomio_client=info".parse()?),
        )
        .init();

    // Load configuration and persisted settings
    let cfg = ClientConfig::load();
    tracing::info!("Starting Plantomio client against {}", cfg.base_url);

    let settings = Settings::load(&cfg.settings_path);

    // Open the freshness cache and run its lifecycle: precache the
    // critical assets, then drop stale generations.
    let store = CacheStore::new(&cfg.cache_db_path)?;
    let freshness = FreshnessCache::new(&cfg.base_url, store, FETCH_TIMEOUT)?;

    match freshness.install().await {
        Ok(count) => tracing::info!("Precached {} critical assets", count),
        Err(e) => tracing::warn!("Cache install failed, starting without precache: {}", e),
    }
    freshness.activate()?;

    // Wire the components
    let fetcher = DataFetcher::new(freshness.clone(), FETCH_TIMEOUT);
    let (transport, transport_rx) =
        TransportManager::new(&cfg.base_url, settings.refresh_interval());
    let _channel_task = transport.start();

    let app = App::new(cfg, settings, freshness, fetcher, transport);

    // Initial data load, then hand control to the dispatch loop
    app.refresh(false).await;
    app.run(transport_rx).await;

    Ok(())
}
