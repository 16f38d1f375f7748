// =============================================================================
// LiquidationFilter — futures forced-liquidation ingestion (SPEC_FULL.md §4.6)
// =============================================================================

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::info;

use crate::alerts::{AlertKind, AlertRequest, AlertRouter};
use crate::config::Thresholds;
use crate::store::{LiquidationRecord, Store};
use crate::types::{now_epoch_ms, Market, TradeSide};

pub struct LiquidationFilter {
    router: Arc<AlertRouter>,
    store: Arc<dyn Store>,
    thresholds: Thresholds,
}

impl LiquidationFilter {
    pub fn new(router: Arc<AlertRouter>, store: Arc<dyn Store>, thresholds: Thresholds) -> Self {
        Self { router, store, thresholds }
    }

    /// Liquidations only arrive on the futures stream, already filtered to
    /// the tracked symbol upstream in the WS dispatch.
    pub async fn handle_liquidation(&self, side: TradeSide, price: Decimal, qty: Decimal, ts: i64) {
        let price_f: f64 = price.to_string().parse().unwrap_or(0.0);
        let qty_f: f64 = qty.to_string().parse().unwrap_or(0.0);
        let notional_usd = price_f * qty_f;

        let record = LiquidationRecord {
            market: Market::Futures,
            side,
            price_str: price.to_string(),
            qty_str: qty.to_string(),
            notional_usd,
            ts,
        };
        if let Err(e) = self.store.append_liquidation(record).await {
            tracing::warn!(error = %e, "failed to persist liquidation");
        }

        if notional_usd < self.thresholds.liquidation_alert_usd {
            return;
        }

        let kind = if notional_usd >= self.thresholds.liquidation_mega_usd {
            AlertKind::MegaLiquidation
        } else {
            AlertKind::Liquidation
        };
        info!(side = %side, notional_usd, "liquidation alert");
        let label = if kind == AlertKind::MegaLiquidation { "MEGA LIQUIDATION" } else { "LIQUIDATION" };
        self.router.submit(AlertRequest::new(
            kind,
            kind.static_route(),
            format!("liq:{side}:{price}:{}", now_epoch_ms() / 1000),
            format!("{label} futures {side} @ {price}: ${notional_usd:.0}"),
        ));
    }
}
