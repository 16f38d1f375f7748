// =============================================================================
// Alert kinds — closed set of tagged variants, not open polymorphism
// =============================================================================
//
// SPEC_FULL.md §9 calls for tagged variants over dynamic dispatch here; the
// static_route table below is the "simple dispatch table keyed by a variant
// tag" it asks for.
// =============================================================================

use std::time::Duration;

use crate::types::Market;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    WallNew,
    WallGone,
    ConfirmedWall,
    ConfirmedWallGone,
    LargeTrade,
    MegaTrade,
    Liquidation,
    MegaLiquidation,
    Digest,
    System,
}

impl AlertKind {
    /// Default cooldown applied per-fingerprint (SPEC_FULL.md §4.7).
    pub fn cooldown(&self) -> Duration {
        match self {
            AlertKind::WallNew => Duration::from_secs(30),
            AlertKind::WallGone => Duration::from_secs(30),
            AlertKind::ConfirmedWall => Duration::from_secs(60),
            AlertKind::ConfirmedWallGone => Duration::from_secs(60),
            AlertKind::LargeTrade | AlertKind::MegaTrade => Duration::from_secs(10),
            AlertKind::Liquidation | AlertKind::MegaLiquidation => Duration::from_secs(5),
            AlertKind::System => Duration::from_secs(0),
            AlertKind::Digest => Duration::from_secs(0),
        }
    }

    /// Fallback channel when no explicit `topic_key` is supplied. Walls and
    /// large trades split by (market, side) so their topic is always
    /// resolved explicitly at the call site instead.
    pub fn static_route(&self) -> &'static str {
        match self {
            AlertKind::WallNew => "walls",
            AlertKind::WallGone => "walls",
            AlertKind::ConfirmedWall => "confirmed_walls",
            AlertKind::ConfirmedWallGone => "confirmed_walls",
            AlertKind::LargeTrade => "large_trades",
            AlertKind::MegaTrade => "mega_events",
            AlertKind::Liquidation => "liquidations",
            AlertKind::MegaLiquidation => "mega_events",
            AlertKind::Digest => "digest",
            AlertKind::System => "system",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    PlainText,
    Markdown,
}

/// One request to notify the outside world. `topic_key`, when present,
/// overrides `kind.static_route()`.
#[derive(Debug, Clone)]
pub struct AlertRequest {
    pub kind: AlertKind,
    pub topic_key: Option<String>,
    pub fingerprint: String,
    pub text: String,
    pub produced_at: std::time::Instant,
}

impl AlertRequest {
    pub fn new(kind: AlertKind, topic_key: impl Into<String>, fingerprint: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind,
            topic_key: Some(topic_key.into()),
            fingerprint: fingerprint.into(),
            text: text.into(),
            produced_at: std::time::Instant::now(),
        }
    }

    pub fn channel(&self) -> &str {
        self.topic_key.as_deref().unwrap_or_else(|| self.kind.static_route())
    }
}

/// Topic naming helper for (kind, market, side)-scoped channels, e.g.
/// `walls_futures_bid`, `large_trades_spot_ask`.
pub fn market_side_topic(prefix: &str, market: Market, side_suffix: &str) -> String {
    format!("{prefix}_{}_{}", market.as_str(), side_suffix)
}
