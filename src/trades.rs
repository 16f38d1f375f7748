// =============================================================================
// TradeAggregator — CVD, 1-minute buckets, large-trade classification
// (SPEC_FULL.md §4.5)
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::alerts::{AlertKind, AlertRequest, AlertRouter};
use crate::config::Thresholds;
use crate::error::SinkError;
use crate::store::{MinuteBucketRecord, Store, TradeRecord};
use crate::types::{EpochMs, Market, TradeSide};

/// How far back (in minutes) CVD is rehydrated from the store at cold start.
const CVD_REHYDRATE_HORIZON_MINUTES: i64 = 1_440;

#[derive(Clone)]
struct Bucket {
    minute_epoch: i64,
    buy_vol_usd: f64,
    sell_vol_usd: f64,
    vwap_num: f64,
    vwap_den: f64,
    trade_count: u64,
}

impl Bucket {
    fn new(minute_epoch: i64) -> Self {
        Self {
            minute_epoch,
            buy_vol_usd: 0.0,
            sell_vol_usd: 0.0,
            vwap_num: 0.0,
            vwap_den: 0.0,
            trade_count: 0,
        }
    }

    fn delta_usd(&self) -> f64 {
        self.buy_vol_usd - self.sell_vol_usd
    }
}

struct MarketState {
    bucket: Bucket,
    cvd: f64,
}

pub struct TradeAggregator {
    router: Arc<AlertRouter>,
    store: Arc<dyn Store>,
    thresholds: Thresholds,
    state: Mutex<HashMap<Market, MarketState>>,
}

impl TradeAggregator {
    pub fn new(router: Arc<AlertRouter>, store: Arc<dyn Store>, thresholds: Thresholds) -> Self {
        let mut state = HashMap::new();
        for market in Market::all() {
            state.insert(
                market,
                MarketState {
                    bucket: Bucket::new(current_minute_epoch()),
                    cvd: 0.0,
                },
            );
        }
        Self {
            router,
            store,
            thresholds,
            state: Mutex::new(state),
        }
    }

    /// Rehydrate CVD from the persisted bucket tail (SPEC_FULL.md §4.5).
    pub async fn rehydrate(&self) -> Result<(), SinkError> {
        let since = crate::types::now_epoch_ms() / 1000 - CVD_REHYDRATE_HORIZON_MINUTES * 60;
        for market in Market::all() {
            let rows = self.store.recent_minute_buckets(market, since).await?;
            if let Some(last) = rows.last() {
                if let Some(entry) = self.state.lock().get_mut(&market) {
                    entry.cvd = last.cvd_at_end;
                }
            }
        }
        Ok(())
    }

    pub fn cvd(&self, market: Market) -> f64 {
        self.state.lock().get(&market).map(|s| s.cvd).unwrap_or(0.0)
    }

    pub async fn handle_trade(&self, market: Market, side: TradeSide, price: Decimal, qty: Decimal, ts: EpochMs) {
        let price_f: f64 = price.to_string().parse().unwrap_or(0.0);
        let qty_f: f64 = qty.to_string().parse().unwrap_or(0.0);
        let notional_usd = price_f * qty_f;
        let minute_epoch = ts / 1000 / 60 * 60;

        let completed_bucket = {
            let mut state = self.state.lock();
            let entry = state.entry(market).or_insert_with(|| MarketState {
                bucket: Bucket::new(minute_epoch),
                cvd: 0.0,
            });

            let rotated = if entry.bucket.minute_epoch != minute_epoch && entry.bucket.trade_count > 0 {
                let finished = entry.bucket.clone();
                entry.cvd += finished.delta_usd();
                entry.bucket = Bucket::new(minute_epoch);
                Some((finished, entry.cvd))
            } else {
                entry.bucket.minute_epoch = minute_epoch;
                None
            };

            match side {
                TradeSide::Buy => entry.bucket.buy_vol_usd += notional_usd,
                TradeSide::Sell => entry.bucket.sell_vol_usd += notional_usd,
            }
            entry.bucket.vwap_num += price_f * qty_f;
            entry.bucket.vwap_den += qty_f;
            entry.bucket.trade_count += 1;

            rotated
        };

        if let Some((finished, cvd_at_end)) = completed_bucket {
            self.persist_bucket(market, &finished, cvd_at_end).await;
        }

        let record = TradeRecord {
            market,
            side,
            price_str: price.to_string(),
            qty_str: qty.to_string(),
            notional_usd,
            ts,
        };
        if let Err(e) = self.store.append_trade(record).await {
            warn!(error = %e, "failed to persist trade");
        }

        self.maybe_alert(market, side, price, notional_usd);
    }

    /// Periodic (60s) flush: close out any bucket whose minute has elapsed
    /// even if no trade has arrived to trigger the rotation inline.
    pub async fn flush_stale_buckets(&self) {
        let now_minute = current_minute_epoch();
        let mut to_persist = Vec::new();
        {
            let mut state = self.state.lock();
            for (market, entry) in state.iter_mut() {
                if entry.bucket.minute_epoch < now_minute && entry.bucket.trade_count > 0 {
                    let finished = entry.bucket.clone();
                    entry.cvd += finished.delta_usd();
                    to_persist.push((*market, finished, entry.cvd));
                    entry.bucket = Bucket::new(now_minute);
                }
            }
        }
        for (market, finished, cvd_at_end) in to_persist {
            self.persist_bucket(market, &finished, cvd_at_end).await;
        }
    }

    async fn persist_bucket(&self, market: Market, bucket: &Bucket, cvd_at_end: f64) {
        let record = MinuteBucketRecord {
            market,
            minute_epoch: bucket.minute_epoch,
            buy_vol_usd: bucket.buy_vol_usd,
            sell_vol_usd: bucket.sell_vol_usd,
            delta_usd: bucket.delta_usd(),
            vwap_num: bucket.vwap_num,
            vwap_den: bucket.vwap_den,
            trade_count: bucket.trade_count,
            cvd_at_end,
        };
        debug!(market = %market, minute_epoch = bucket.minute_epoch, trade_count = bucket.trade_count, "flushing minute bucket");
        if let Err(e) = self.store.upsert_minute_bucket(record).await {
            warn!(error = %e, "failed to persist minute bucket");
        }
    }

    fn maybe_alert(&self, market: Market, side: TradeSide, price: Decimal, notional_usd: f64) {
        let large_threshold = match market {
            Market::Spot => self.thresholds.large_trade_threshold_spot_usd,
            Market::Futures => self.thresholds.large_trade_threshold_futures_usd,
        };
        if notional_usd < large_threshold {
            return;
        }

        let mega_threshold = large_threshold * self.thresholds.mega_trade_multiplier;
        let side_suffix = match side {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        };

        if notional_usd >= mega_threshold {
            info!(market = %market, side = %side, notional_usd, "mega trade");
            self.router.submit(AlertRequest::new(
                AlertKind::MegaTrade,
                "mega_events",
                format!("mega_trade:{market}:{side}:{}:{price}", crate::types::now_epoch_ms() / 1000),
                format!("MEGA TRADE {market} {side} @ {price}: ${notional_usd:.0}"),
            ));
        } else {
            let topic = format!("large_trades_{}_{}", market.as_str(), side_suffix);
            self.router.submit(AlertRequest::new(
                AlertKind::LargeTrade,
                topic,
                format!("large_trade:{market}:{side}:{}:{price}", crate::types::now_epoch_ms() / 1000),
                format!("LARGE TRADE {market} {side} @ {price}: ${notional_usd:.0}"),
            ));
        }
    }
}

fn current_minute_epoch() -> i64 {
    crate::types::now_epoch_ms() / 1000 / 60 * 60
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::collections::HashMap as Map;

    fn router() -> Arc<AlertRouter> {
        let sink = Arc::new(crate::alerts::LoggingSink);
        let mut map: Map<String, String> = Map::new();
        for market in Market::all() {
            map.insert(format!("confirmed_walls_{}", market.as_str()), "x".into());
            for s in ["bid", "ask"] {
                map.insert(format!("walls_{}_{}", market.as_str(), s), "x".into());
            }
            for s in ["buy", "sell"] {
                map.insert(format!("large_trades_{}_{}", market.as_str(), s), "x".into());
            }
        }
        for k in ["mega_events", "liquidations", "digest_15m", "digest_30m", "digest_60m", "system"] {
            map.insert(k.to_string(), "x".into());
        }
        Arc::new(AlertRouter::new(sink, map).unwrap())
    }

    #[tokio::test]
    async fn cvd_accumulates_signed_delta_across_buckets() {
        let store = Arc::new(InMemoryStore::new());
        let agg = TradeAggregator::new(router(), store, Thresholds::default());

        let base_ts = 0i64;
        agg.handle_trade(Market::Spot, TradeSide::Buy, Decimal::new(5000000, 2), Decimal::new(100, 2), base_ts).await;
        agg.handle_trade(Market::Spot, TradeSide::Sell, Decimal::new(5000000, 2), Decimal::new(50, 2), base_ts).await;
        // force rotation into a later minute
        agg.handle_trade(Market::Spot, TradeSide::Buy, Decimal::new(5000000, 2), Decimal::new(10, 2), base_ts + 60_000).await;

        assert!(agg.cvd(Market::Spot) > 0.0);
    }
}
