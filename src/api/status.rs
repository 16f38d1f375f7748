// =============================================================================
// Status surface — read-only HTTP endpoints over Store + live state
// (SPEC_FULL.md §4.11, §6A)
// =============================================================================
//
// Every handler only reads; none mutate trading-relevant state. Slash-command
// parsing and chat rendering belong to the external chat-platform client —
// this is the data surface such a client would call.
// =============================================================================

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::app_state::AppState;
use crate::types::Market;

use super::auth::AuthBearer;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/status", get(status))
        .route("/api/v1/walls", get(walls))
        .route("/api/v1/trades/cvd", get(cvd))
        .route("/api/v1/trades", get(trades))
        .route("/api/v1/liquidations", get(liquidations_stats))
        .route("/api/v1/depth", get(depth))
        .route("/api/v1/stats", get(stats))
        .route("/api/v1/notify-toggles", get(notify_toggles))
        .route("/api/v1/topics", get(topics))
        .route("/api/v1/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn status(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "spot_ready": state.spot_book.is_ready(),
        "futures_ready": state.futures_book.is_ready(),
        "rate_limit": state.client.rate_limit().snapshot(),
        "alerts_dropped": state.router.dropped_count(),
    }))
}

async fn walls(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    match state.store.open_walls().await {
        Ok(rows) => Json(json!({ "walls": rows })),
        Err(e) => Json(json!({ "error": e.to_string() })),
    }
}

#[derive(Deserialize)]
struct MarketQuery {
    market: Option<String>,
}

fn parse_market(q: &MarketQuery) -> Market {
    match q.market.as_deref() {
        Some("futures") => Market::Futures,
        _ => Market::Spot,
    }
}

async fn cvd(_auth: AuthBearer, State(state): State<Arc<AppState>>, Query(q): Query<MarketQuery>) -> Json<serde_json::Value> {
    let market = parse_market(&q);
    Json(json!({ "market": market.as_str(), "cvd": state.trades.cvd(market) }))
}

const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Deserialize)]
struct HistoryQuery {
    market: Option<String>,
    since_ms: Option<i64>,
    limit: Option<usize>,
}

async fn trades(_auth: AuthBearer, State(state): State<Arc<AppState>>, Query(q): Query<HistoryQuery>) -> Json<serde_json::Value> {
    let market = match q.market.as_deref() {
        Some("futures") => Market::Futures,
        _ => Market::Spot,
    };
    let since = q.since_ms.unwrap_or(0);
    let limit = q.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    match state.store.recent_trades(market, since, limit).await {
        Ok(rows) => Json(json!({ "market": market.as_str(), "trades": rows })),
        Err(e) => Json(json!({ "error": e.to_string() })),
    }
}

async fn liquidations_stats(_auth: AuthBearer, State(state): State<Arc<AppState>>, Query(q): Query<HistoryQuery>) -> Json<serde_json::Value> {
    let since = q.since_ms.unwrap_or(0);
    let limit = q.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    match state.store.recent_liquidations(since, limit).await {
        Ok(rows) => Json(json!({ "liquidations": rows })),
        Err(e) => Json(json!({ "error": e.to_string() })),
    }
}

async fn depth(_auth: AuthBearer, State(state): State<Arc<AppState>>, Query(q): Query<MarketQuery>) -> Json<serde_json::Value> {
    let market = parse_market(&q);
    let book = match market {
        Market::Spot => &state.spot_book,
        Market::Futures => &state.futures_book,
    };
    let snap = book.snapshot(20);
    Json(json!({
        "market": market.as_str(),
        "ready": snap.ready,
        "mid": snap.mid,
        "best_bid": snap.best_bid.map(|d| d.to_string()),
        "best_ask": snap.best_ask.map(|d| d.to_string()),
        "imbalance_1pct": snap.imbalance_1pct,
        "top_bids": snap.top_bids.iter().map(|(p, q)| (p.to_string(), q.to_string())).collect::<Vec<_>>(),
        "top_asks": snap.top_asks.iter().map(|(p, q)| (p.to_string(), q.to_string())).collect::<Vec<_>>(),
    }))
}

async fn stats(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "spot_cvd": state.trades.cvd(Market::Spot),
        "futures_cvd": state.trades.cvd(Market::Futures),
        "rate_limit": state.client.rate_limit().snapshot(),
    }))
}

async fn notify_toggles(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    match state.store.all_notification_settings().await {
        Ok(settings) => Json(json!({ "settings": settings })),
        Err(e) => Json(json!({ "error": e.to_string() })),
    }
}

#[derive(Serialize)]
struct TopicsResponse {
    topics: Vec<String>,
}

async fn topics(_auth: AuthBearer) -> Json<TopicsResponse> {
    Json(TopicsResponse {
        topics: vec![
            "walls_spot_bid".into(),
            "walls_spot_ask".into(),
            "walls_futures_bid".into(),
            "walls_futures_ask".into(),
            "confirmed_walls_spot".into(),
            "confirmed_walls_futures".into(),
            "large_trades_spot_buy".into(),
            "large_trades_spot_sell".into(),
            "large_trades_futures_buy".into(),
            "large_trades_futures_sell".into(),
            "mega_events".into(),
            "liquidations".into(),
            "digest_15m".into(),
            "digest_30m".into(),
            "digest_60m".into(),
            "system".into(),
        ],
    })
}
