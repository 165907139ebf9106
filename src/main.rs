use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod error;
mod feed;
mod fetch;
mod processor;
mod query;
mod scheduler;
mod state;
mod static_data;

use config::Config;
use fetch::HttpFetcher;
use scheduler::{FeedUrls, Refresher};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 1. Configuration & State
    let config = Config::from_env()?;
    info!(?config, "Starting transit fusion engine");
    let state = Arc::new(AppState::new());
    let fetcher = Arc::new(HttpFetcher::new(config.fetch_timeout)?);
    let refresher = Arc::new(Refresher::new(
        state.clone(),
        fetcher,
        FeedUrls {
            vehicle_positions: config.vehicle_positions_url.clone(),
            trip_updates: config.trip_updates_url.clone(),
        },
    ));

    // 2. Static load (retried until it succeeds), first refresh, then the timer
    let refresher_bg = refresher.clone();
    let static_base = config.static_base.clone();
    let period = config.refresh_interval;
    tokio::spawn(async move {
        refresher_bg.bootstrap(&static_base, period).await;
        refresher_bg.run(period).await;
    });

    // 3. HTTP Server
    let routes = api::routes(state, refresher);
    info!("Server running at http://localhost:{}", config.port);
    warp::serve(routes).run(([0, 0, 0, 0], config.port)).await;

    Ok(())
}
