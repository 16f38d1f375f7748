// =============================================================================
// Shared types used across the wall-watch ingestion pipeline
// =============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the two markets this system watches for the symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Market {
    Spot,
    Futures,
}

impl Market {
    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Spot => "spot",
            Market::Futures => "futures",
        }
    }

    pub fn all() -> [Market; 2] {
        [Market::Spot, Market::Futures]
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resting-order side in the order book, or taker side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Bid => "bid",
            Side::Ask => "ask",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Taker side of an executed trade. BUY means the taker was the buyer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The tracked symbol. The system is single-symbol by design (Non-goals).
pub const SYMBOL: &str = "BTC";

/// Epoch milliseconds, as the exchange and the store both use.
pub type EpochMs = i64;

/// Epoch seconds, used for minute-bucket keys.
pub type EpochSecs = i64;

/// Current wall-clock time as epoch milliseconds, the timestamp format the
/// store persists (SPEC_FULL.md §6B).
pub fn now_epoch_ms() -> EpochMs {
    chrono::Utc::now().timestamp_millis()
}
