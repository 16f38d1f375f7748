// =============================================================================
// Combined-stream wire formats (SPEC_FULL.md §6)
// =============================================================================

use serde::Deserialize;

/// Envelope wrapping every message on the combined WebSocket endpoint.
#[derive(Debug, Deserialize)]
pub struct StreamEnvelope {
    pub stream: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct AggTrade {
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "q")]
    pub qty: String,
    /// True when the buyer is the market maker — i.e. the taker sold.
    #[serde(rename = "m")]
    pub buyer_is_maker: bool,
    #[serde(rename = "T")]
    pub trade_time: i64,
}

#[derive(Debug, Deserialize)]
pub struct ForceOrderEvent {
    #[serde(rename = "o")]
    pub order: ForceOrderDetail,
}

#[derive(Debug, Deserialize)]
pub struct ForceOrderDetail {
    #[serde(rename = "S")]
    pub side: String,
    #[serde(rename = "q")]
    pub qty: String,
    #[serde(rename = "ap")]
    pub avg_price: String,
    #[serde(rename = "T")]
    pub order_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
}
