// =============================================================================
// Store record types — prices as text, timestamps as epoch milliseconds
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::types::{EpochMs, Market, Side, TradeSide};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WallStatus {
    Candidate,
    Active,
    Confirmed,
    Gone,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WallRecord {
    pub market: Market,
    pub side: Side,
    pub price_str: String,
    pub qty_str: String,
    pub notional_usd: f64,
    pub detected_at: EpochMs,
    pub status: WallStatus,
    pub confirmed_at: Option<EpochMs>,
    pub gone_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub market: Market,
    pub side: TradeSide,
    pub price_str: String,
    pub qty_str: String,
    pub notional_usd: f64,
    pub ts: EpochMs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationRecord {
    pub market: Market,
    pub side: TradeSide,
    pub price_str: String,
    pub qty_str: String,
    pub notional_usd: f64,
    pub ts: EpochMs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinuteBucketRecord {
    pub market: Market,
    pub minute_epoch: EpochMs,
    pub buy_vol_usd: f64,
    pub sell_vol_usd: f64,
    pub delta_usd: f64,
    pub vwap_num: f64,
    pub vwap_den: f64,
    pub trade_count: u64,
    pub cvd_at_end: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertLogRecord {
    pub kind: String,
    pub topic_key: String,
    pub fingerprint: String,
    pub text: String,
    pub sent_at: EpochMs,
}
