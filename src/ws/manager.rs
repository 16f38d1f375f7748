// =============================================================================
// WSManager — stream lifecycle, reconnect backoff, silence watchdog
// (SPEC_FULL.md §4.2)
// =============================================================================
//
// One task per logical stream (five total: two depth, two trade, one
// liquidation), following the teacher's run-and-return-on-error idiom
// (market_data/orderbook.rs, market_data/trade_stream.rs) generalized with
// exponential backoff and a silence watchdog folded into the same read loop
// via `tokio::time::timeout`, rather than a second task racing it.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::alerts::{AlertKind, AlertRequest, AlertRouter};
use crate::error::StreamError;
use crate::liquidations::LiquidationFilter;
use crate::orderbook::{DepthDiff, OrderBook};
use crate::trades::TradeAggregator;
use crate::types::{Market, TradeSide};
use crate::walls::WallTracker;

use super::wire::{AggTrade, ForceOrderEvent, StreamEnvelope};

const INITIAL_BACKOFF_SECS: u64 = 5;
const MAX_BACKOFF_SECS: u64 = 300;
const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(30);
const DOWN_ALERT_AFTER: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    SpotDepth,
    FuturesDepth,
    SpotTrade,
    FuturesTrade,
    Liquidation,
}

impl StreamKind {
    fn all() -> [StreamKind; 5] {
        [
            StreamKind::SpotDepth,
            StreamKind::FuturesDepth,
            StreamKind::SpotTrade,
            StreamKind::FuturesTrade,
            StreamKind::Liquidation,
        ]
    }

    fn url(&self) -> &'static str {
        match self {
            StreamKind::SpotDepth => "wss://stream.binance.com:9443/stream?streams=btcusdt@depth@100ms",
            StreamKind::SpotTrade => "wss://stream.binance.com:9443/stream?streams=btcusdt@aggTrade",
            StreamKind::FuturesDepth => "wss://fstream.binance.com/stream?streams=btcusdt@depth@100ms",
            StreamKind::FuturesTrade => "wss://fstream.binance.com/stream?streams=btcusdt@aggTrade",
            StreamKind::Liquidation => "wss://fstream.binance.com/stream?streams=!forceOrder@arr",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            StreamKind::SpotDepth => "spot_depth",
            StreamKind::FuturesDepth => "futures_depth",
            StreamKind::SpotTrade => "spot_trade",
            StreamKind::FuturesTrade => "futures_trade",
            StreamKind::Liquidation => "liquidation",
        }
    }
}

/// Handles shared by every stream task. Bundled so `spawn_all` can clone one
/// `Arc` per task instead of threading five separate handles through.
pub struct StreamDeps {
    pub spot_book: Arc<OrderBook>,
    pub futures_book: Arc<OrderBook>,
    pub trades: Arc<TradeAggregator>,
    pub liquidations: Arc<LiquidationFilter>,
    pub walls: Arc<WallTracker>,
    pub router: Arc<AlertRouter>,
}

pub struct WSManager {
    running: Arc<AtomicBool>,
}

impl WSManager {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Cooperative operator shutdown: every stream task observes this on its
    /// next loop iteration and terminates instead of reconnecting.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn spawn_all(&self, deps: Arc<StreamDeps>) -> Vec<JoinHandle<()>> {
        StreamKind::all()
            .into_iter()
            .map(|kind| {
                let running = self.running.clone();
                let deps = deps.clone();
                tokio::spawn(async move { run_stream(kind, running, deps).await })
            })
            .collect()
    }
}

impl Default for WSManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_stream(kind: StreamKind, running: Arc<AtomicBool>, deps: Arc<StreamDeps>) {
    let mut backoff_secs = INITIAL_BACKOFF_SECS;
    let mut disconnected_since: Option<Instant> = None;
    let mut down_alert_sent = false;

    loop {
        if !running.load(Ordering::SeqCst) {
            info!(stream = kind.label(), "operator shutdown observed, stopping stream task");
            return;
        }

        let mut watchdog_fired = false;

        match connect_async(kind.url()).await {
            Ok((ws_stream, _response)) => {
                info!(stream = kind.label(), "connected");
                let (_write, mut read) = ws_stream.split();
                let mut first_message = true;

                loop {
                    if !running.load(Ordering::SeqCst) {
                        info!(stream = kind.label(), "operator shutdown observed mid-stream, stopping");
                        return;
                    }

                    match tokio::time::timeout(WATCHDOG_TIMEOUT, read.next()).await {
                        Ok(Some(Ok(msg))) => {
                            if first_message {
                                first_message = false;
                                backoff_secs = INITIAL_BACKOFF_SECS;
                                if disconnected_since.is_some() {
                                    info!(stream = kind.label(), "stream recovered");
                                    deps.router.submit(AlertRequest::new(
                                        AlertKind::System,
                                        "system",
                                        format!("ws_recover:{}", kind.label()),
                                        format!("stream recovered: {}", kind.label()),
                                    ));
                                }
                                disconnected_since = None;
                                down_alert_sent = false;
                            }

                            if let Message::Text(text) = msg {
                                if let Err(e) = dispatch(kind, &text, &deps).await {
                                    warn!(stream = kind.label(), error = %e, "failed to process message");
                                }
                            }
                        }
                        Ok(Some(Err(e))) => {
                            warn!(stream = kind.label(), error = %e, "read error, reconnecting");
                            break;
                        }
                        Ok(None) => {
                            warn!(stream = kind.label(), "stream ended, reconnecting");
                            break;
                        }
                        Err(_elapsed) => {
                            warn!(stream = kind.label(), "watchdog silence timeout, forcing reconnect");
                            watchdog_fired = true;
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(stream = kind.label(), error = %e, "connect failed");
            }
        }

        if !running.load(Ordering::SeqCst) {
            return;
        }

        if disconnected_since.is_none() {
            disconnected_since = Some(Instant::now());
        }
        if !down_alert_sent {
            if let Some(since) = disconnected_since {
                if since.elapsed() >= DOWN_ALERT_AFTER {
                    down_alert_sent = true;
                    deps.router.submit(AlertRequest::new(
                        AlertKind::System,
                        "system",
                        format!("ws_down:{}", kind.label()),
                        format!("stream down for {}s: {}", since.elapsed().as_secs(), kind.label()),
                    ));
                }
            }
        }

        if watchdog_fired {
            // Watchdog-induced: reconnect immediately with backoff reset,
            // rather than propagating the cancellation to the caller.
            backoff_secs = INITIAL_BACKOFF_SECS;
        } else {
            tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
            backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
        }
    }
}

async fn dispatch(kind: StreamKind, text: &str, deps: &StreamDeps) -> Result<(), StreamError> {
    let envelope: StreamEnvelope =
        serde_json::from_str(text).map_err(|e| StreamError::MalformedPayload(e.to_string()))?;

    match kind {
        StreamKind::SpotDepth | StreamKind::FuturesDepth => {
            let diff: DepthDiff =
                serde_json::from_value(envelope.data).map_err(|e| StreamError::MalformedPayload(e.to_string()))?;
            let (market, book) = match kind {
                StreamKind::SpotDepth => (Market::Spot, &deps.spot_book),
                _ => (Market::Futures, &deps.futures_book),
            };
            match book.apply_diff(diff) {
                Ok(events) => {
                    for event in events {
                        deps.walls.handle_event(market, event).await;
                    }
                    Ok(())
                }
                Err(e) => {
                    warn!(market = %market, error = %e, "order book desync, awaiting recovery loop");
                    Ok(())
                }
            }
        }
        StreamKind::SpotTrade | StreamKind::FuturesTrade => {
            let trade: AggTrade =
                serde_json::from_value(envelope.data).map_err(|e| StreamError::MalformedPayload(e.to_string()))?;
            let market = if kind == StreamKind::SpotTrade { Market::Spot } else { Market::Futures };
            let side = if trade.buyer_is_maker { TradeSide::Sell } else { TradeSide::Buy };
            let price: Decimal = trade
                .price
                .parse()
                .map_err(|_| StreamError::MalformedPayload("bad trade price".to_string()))?;
            let qty: Decimal = trade
                .qty
                .parse()
                .map_err(|_| StreamError::MalformedPayload("bad trade qty".to_string()))?;
            deps.trades.handle_trade(market, side, price, qty, trade.trade_time).await;
            Ok(())
        }
        StreamKind::Liquidation => {
            let event: ForceOrderEvent =
                serde_json::from_value(envelope.data).map_err(|e| StreamError::MalformedPayload(e.to_string()))?;
            if !event.order.symbol.eq_ignore_ascii_case("btcusdt") {
                return Ok(());
            }
            let side = if event.order.side.eq_ignore_ascii_case("SELL") {
                TradeSide::Sell
            } else {
                TradeSide::Buy
            };
            let price: Decimal = event
                .order
                .avg_price
                .parse()
                .map_err(|_| StreamError::MalformedPayload("bad liquidation price".to_string()))?;
            let qty: Decimal = event
                .order
                .qty
                .parse()
                .map_err(|_| StreamError::MalformedPayload("bad liquidation qty".to_string()))?;
            deps.liquidations.handle_liquidation(side, price, qty, event.order.order_time).await;
            Ok(())
        }
    }
}
