// =============================================================================
// Central Application State — wall-watch ingestion engine
// =============================================================================
//
// The single source of truth tying every subsystem together, the way the
// teacher's AppState ties its trading subsystems together. Each subsystem
// owns its own interior mutability; AppState just holds the `Arc`s and
// constructs them in dependency order at startup.
// =============================================================================

use std::sync::Arc;

use tracing::info;

use crate::alerts::{AlertRouter, AlertSink, LoggingSink};
use crate::api::auth::HasStatusToken;
use crate::binance::BinanceClient;
use crate::config::Config;
use crate::digest::DigestScheduler;
use crate::error::ConfigError;
use crate::liquidations::LiquidationFilter;
use crate::orderbook::OrderBook;
use crate::snapshot::SnapshotCoordinator;
use crate::store::{InMemoryStore, Store};
use crate::trades::TradeAggregator;
use crate::types::Market;
use crate::walls::WallTracker;
use crate::ws::{StreamDeps, WSManager};

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub router: Arc<AlertRouter>,
    pub client: Arc<BinanceClient>,
    pub spot_book: Arc<OrderBook>,
    pub futures_book: Arc<OrderBook>,
    pub walls: Arc<WallTracker>,
    pub trades: Arc<TradeAggregator>,
    pub liquidations: Arc<LiquidationFilter>,
    pub snapshot_coordinator: Arc<SnapshotCoordinator>,
    pub digest: Arc<DigestScheduler>,
    pub ws_manager: Arc<WSManager>,
}

impl AppState {
    /// Build every subsystem in dependency order: store and sink first,
    /// then the router that depends on them, then the detectors that
    /// depend on the router, then the streaming layer that depends on
    /// everything else (SPEC_FULL.md §2 data-flow DAG).
    pub fn build(config: Config) -> Result<Arc<Self>, ConfigError> {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let sink: Arc<dyn AlertSink> = Arc::new(LoggingSink);
        let router = Arc::new(AlertRouter::new(sink, default_channel_map(&config))?);

        let client = Arc::new(
            BinanceClient::new(config.proxy_url.as_deref())
                .map_err(|e| ConfigError::InvalidValue { field: "proxy_url".to_string(), reason: e.to_string() })?,
        );

        let spot_book = Arc::new(OrderBook::new(Market::Spot, config.thresholds.wall_threshold_usd));
        let futures_book = Arc::new(OrderBook::new(Market::Futures, config.thresholds.wall_threshold_usd));

        let walls = Arc::new(WallTracker::new(router.clone(), store.clone(), config.thresholds.clone()));
        let trades = Arc::new(TradeAggregator::new(router.clone(), store.clone(), config.thresholds.clone()));
        let liquidations = Arc::new(LiquidationFilter::new(router.clone(), store.clone(), config.thresholds.clone()));

        let snapshot_coordinator = Arc::new(SnapshotCoordinator::new(
            client.clone(),
            spot_book.clone(),
            futures_book.clone(),
            store.clone(),
        ));
        let digest = Arc::new(DigestScheduler::new(store.clone(), router.clone()));
        let ws_manager = Arc::new(WSManager::new());

        Ok(Arc::new(Self {
            config,
            store,
            router,
            client,
            spot_book,
            futures_book,
            walls,
            trades,
            liquidations,
            snapshot_coordinator,
            digest,
            ws_manager,
        }))
    }

    pub async fn rehydrate(&self) -> Result<(), crate::error::SinkError> {
        info!("rehydrating state from store");
        self.walls.rehydrate().await?;
        self.trades.rehydrate().await?;
        Ok(())
    }

    pub fn stream_deps(self: &Arc<Self>) -> Arc<StreamDeps> {
        Arc::new(StreamDeps {
            spot_book: self.spot_book.clone(),
            futures_book: self.futures_book.clone(),
            trades: self.trades.clone(),
            liquidations: self.liquidations.clone(),
            walls: self.walls.clone(),
            router: self.router.clone(),
        })
    }
}

impl HasStatusToken for Arc<AppState> {
    fn status_token(&self) -> &str {
        &self.config.status_token
    }
}

/// Every canonical topic_key mapped to a sink channel handle. For this
/// reference build, channel handles are the forum group suffixed by topic;
/// a production deployment would resolve these to real chat-platform
/// channel IDs at startup instead.
fn default_channel_map(config: &Config) -> std::collections::HashMap<String, String> {
    use crate::types::Market;

    let mut map = std::collections::HashMap::new();
    let mut insert = |topic: String| {
        let handle = format!("{}/{}", config.forum_group, topic);
        map.insert(topic, handle);
    };

    for k in ["mega_events", "liquidations", "digest_15m", "digest_30m", "digest_60m"] {
        insert(k.to_string());
    }
    // System alerts (ws_down/ws_recover, desync notices) go to the
    // configured fallback channel rather than a forum-group subtopic.
    map.insert("system".to_string(), config.admin_user.clone());
    for market in Market::all() {
        insert(format!("confirmed_walls_{}", market.as_str()));
        for side in ["bid", "ask"] {
            insert(format!("walls_{}_{}", market.as_str(), side));
        }
        for side in ["buy", "sell"] {
            insert(format!("large_trades_{}_{}", market.as_str(), side));
        }
    }
    map
}
