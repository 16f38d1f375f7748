// =============================================================================
// wallwatch — Main Entry Point
// =============================================================================
//
// Boots every subsystem in dependency order, rehydrates state from the
// store, cold-starts both order books, then spawns the background tasks
// that keep running for the life of the process. Shuts down cooperatively
// on Ctrl-C with a bounded grace period (SPEC_FULL.md §5).
// =============================================================================

mod alerts;
mod api;
mod app_state;
mod binance;
mod config;
mod digest;
mod error;
mod liquidations;
mod orderbook;
mod snapshot;
mod store;
mod trades;
mod types;
mod walls;
mod ws;

use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::Config;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("wallwatch starting up");

    let config = Config::load()?;
    let bind_addr = config.bind_addr.clone();

    let state = AppState::build(config)?;
    state.rehydrate().await?;

    info!("cold-starting order books from REST snapshots");
    state.snapshot_coordinator.cold_start().await;

    let stream_deps = state.stream_deps();
    let ws_handles = state.ws_manager.spawn_all(stream_deps);

    tokio::spawn(state.snapshot_coordinator.clone().run_recovery_loop());
    tokio::spawn(state.snapshot_coordinator.clone().run_periodic_refresh());
    tokio::spawn(state.snapshot_coordinator.clone().run_pruner());
    tokio::spawn(state.digest.clone().run());
    tokio::spawn(state.router.clone().run_flusher());

    {
        let walls = state.walls.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            loop {
                interval.tick().await;
                walls.check_confirmed_walls().await;
            }
        });
    }
    {
        let trades = state.trades.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                trades.flush_stale_buckets().await;
            }
        });
    }

    let app = api::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(%bind_addr, "status surface listening");
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "status surface server exited");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping stream tasks");
    state.ws_manager.shutdown();
    server.abort();

    match tokio::time::timeout(SHUTDOWN_GRACE, futures_util::future::join_all(ws_handles)).await {
        Ok(_) => info!("all stream tasks stopped cleanly"),
        Err(_) => warn!("shutdown grace period elapsed, exiting anyway"),
    }

    info!("flushing pending alert batches before exit");
    state.router.flush_all().await;

    Ok(())
}
