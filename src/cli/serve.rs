use crate::api;
use crate::core::config::AppConfig;
use crate::core::store::TaskStore;
use crate::providers::{ExchangeRatesFetcher, RateLimiter};
use crate::store::open_store;
use crate::worker::Poller;
use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

/// Wires the rate limiter, provider and store into a poller.
pub fn build_poller(config: &AppConfig, store: Arc<dyn TaskStore>) -> Result<Poller> {
    config.provider.require_api_key()?;
    let limits = &config.provider.rate_limit;
    let limiter = Arc::new(RateLimiter::new(
        limits.burst,
        Duration::from_secs(limits.window_secs),
    ));
    let fetcher = ExchangeRatesFetcher::from_config(&config.provider, limiter)?;

    Ok(Poller::new(
        store,
        Arc::new(fetcher),
        config.worker.tick(),
        config.worker.num_workers,
    ))
}

/// Opens the store and serves admissions and the poll loop on `listener`
/// until `shutdown` resolves.
pub async fn serve_on<S>(config: &AppConfig, listener: TcpListener, shutdown: S) -> Result<()>
where
    S: Future<Output = ()>,
{
    let store = open_store(config)?;
    let poller = build_poller(config, Arc::clone(&store))?;
    api::serve(listener, store, poller, shutdown)
        .await
        .context("Server failed")
}

pub async fn serve(config: &AppConfig) -> Result<()> {
    let addr = &config.server.listen_addr;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to listen on {addr}"))?;

    serve_on(config, listener, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    })
    .await
}

/// Runs one poll cycle directly against the store, for use while no server
/// holds it open.
pub async fn drain(config: &AppConfig) -> Result<()> {
    let store = open_store(config)?;
    let poller = build_poller(config, store)?;
    let report = poller.run_cycle().await;
    info!(?report, "Single poll cycle complete");
    Ok(())
}
