// =============================================================================
// InMemoryStore — reference Store implementation backing tests and standalone runs
// =============================================================================

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::SinkError;
use crate::types::{EpochMs, Market, Side};

use super::records::{AlertLogRecord, LiquidationRecord, MinuteBucketRecord, TradeRecord, WallRecord, WallStatus};
use super::Store;

type WallKey = (Market, Side, String, EpochMs);

#[derive(Default)]
struct Tables {
    walls: HashMap<WallKey, WallRecord>,
    trades: Vec<TradeRecord>,
    liquidations: Vec<LiquidationRecord>,
    buckets: HashMap<(Market, EpochMs), MinuteBucketRecord>,
    depth_snapshots: Vec<(Market, u64, EpochMs)>,
    alert_log: Vec<AlertLogRecord>,
    settings: HashMap<String, String>,
}

/// In-process reference implementation of the `Store` contract. Guarded
/// internally so it can be shared across tasks the same way a pooled
/// database connection would be (SPEC_FULL.md §4.8).
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_wall(&self, record: WallRecord) -> Result<(), SinkError> {
        let key = (record.market, record.side, record.price_str.clone(), record.detected_at);
        self.tables.lock().walls.insert(key, record);
        Ok(())
    }

    async fn close_wall(
        &self,
        market: Market,
        side: Side,
        price_str: &str,
        detected_at: EpochMs,
        reason: &str,
    ) -> Result<(), SinkError> {
        let key = (market, side, price_str.to_string(), detected_at);
        let mut tables = self.tables.lock();
        if let Some(record) = tables.walls.get_mut(&key) {
            record.status = WallStatus::Gone;
            record.gone_reason = Some(reason.to_string());
        }
        Ok(())
    }

    async fn open_walls(&self) -> Result<Vec<WallRecord>, SinkError> {
        Ok(self
            .tables
            .lock()
            .walls
            .values()
            .filter(|w| w.status != WallStatus::Gone)
            .cloned()
            .collect())
    }

    async fn append_trade(&self, record: TradeRecord) -> Result<(), SinkError> {
        self.tables.lock().trades.push(record);
        Ok(())
    }

    async fn append_liquidation(&self, record: LiquidationRecord) -> Result<(), SinkError> {
        self.tables.lock().liquidations.push(record);
        Ok(())
    }

    async fn recent_trades(&self, market: Market, since: EpochMs, limit: usize) -> Result<Vec<TradeRecord>, SinkError> {
        let mut out: Vec<TradeRecord> = self
            .tables
            .lock()
            .trades
            .iter()
            .filter(|t| t.market == market && t.ts >= since)
            .cloned()
            .collect();
        out.sort_by_key(|t| t.ts);
        if out.len() > limit {
            let start = out.len() - limit;
            out = out.split_off(start);
        }
        Ok(out)
    }

    async fn recent_liquidations(&self, since: EpochMs, limit: usize) -> Result<Vec<LiquidationRecord>, SinkError> {
        let mut out: Vec<LiquidationRecord> = self
            .tables
            .lock()
            .liquidations
            .iter()
            .filter(|l| l.ts >= since)
            .cloned()
            .collect();
        out.sort_by_key(|l| l.ts);
        if out.len() > limit {
            let start = out.len() - limit;
            out = out.split_off(start);
        }
        Ok(out)
    }

    async fn upsert_minute_bucket(&self, record: MinuteBucketRecord) -> Result<(), SinkError> {
        let key = (record.market, record.minute_epoch);
        self.tables.lock().buckets.insert(key, record);
        Ok(())
    }

    async fn recent_minute_buckets(&self, market: Market, since: EpochMs) -> Result<Vec<MinuteBucketRecord>, SinkError> {
        let mut out: Vec<MinuteBucketRecord> = self
            .tables
            .lock()
            .buckets
            .values()
            .filter(|b| b.market == market && b.minute_epoch >= since)
            .cloned()
            .collect();
        out.sort_by_key(|b| b.minute_epoch);
        Ok(out)
    }

    async fn append_depth_snapshot(&self, market: Market, last_update_id: u64, taken_at: EpochMs) -> Result<(), SinkError> {
        self.tables.lock().depth_snapshots.push((market, last_update_id, taken_at));
        Ok(())
    }

    async fn append_alert_log(&self, record: AlertLogRecord) -> Result<(), SinkError> {
        self.tables.lock().alert_log.push(record);
        Ok(())
    }

    async fn get_notification_setting(&self, key: &str) -> Result<Option<String>, SinkError> {
        Ok(self.tables.lock().settings.get(key).cloned())
    }

    async fn set_notification_setting(&self, key: &str, value: &str) -> Result<(), SinkError> {
        self.tables.lock().settings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn all_notification_settings(&self) -> Result<Vec<(String, String)>, SinkError> {
        Ok(self.tables.lock().settings.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wall_upsert_then_close_is_idempotent() {
        let store = InMemoryStore::new();
        let record = WallRecord {
            market: Market::Futures,
            side: Side::Bid,
            price_str: "50000.00".to_string(),
            qty_str: "50".to_string(),
            notional_usd: 2_500_000.0,
            detected_at: 1_000,
            status: WallStatus::Active,
            confirmed_at: None,
            gone_reason: None,
        };
        store.upsert_wall(record.clone()).await.unwrap();
        store.upsert_wall(record.clone()).await.unwrap();
        assert_eq!(store.open_walls().await.unwrap().len(), 1);

        store.close_wall(Market::Futures, Side::Bid, "50000.00", 1_000, "filled").await.unwrap();
        store.close_wall(Market::Futures, Side::Bid, "50000.00", 1_000, "filled").await.unwrap();
        assert_eq!(store.open_walls().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn minute_bucket_upsert_is_idempotent_by_key() {
        let store = InMemoryStore::new();
        let bucket = MinuteBucketRecord {
            market: Market::Spot,
            minute_epoch: 60,
            buy_vol_usd: 100.0,
            sell_vol_usd: 50.0,
            delta_usd: 50.0,
            vwap_num: 100.0,
            vwap_den: 1.0,
            trade_count: 1,
            cvd_at_end: 50.0,
        };
        store.upsert_minute_bucket(bucket.clone()).await.unwrap();
        let mut updated = bucket.clone();
        updated.trade_count = 2;
        store.upsert_minute_bucket(updated).await.unwrap();

        let rows = store.recent_minute_buckets(Market::Spot, 0).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].trade_count, 2);
    }

    #[tokio::test]
    async fn recent_trades_filters_by_market_and_caps_at_limit() {
        use crate::types::TradeSide;

        let store = InMemoryStore::new();
        for i in 0..5 {
            store
                .append_trade(TradeRecord {
                    market: Market::Spot,
                    side: TradeSide::Buy,
                    price_str: "50000.00".to_string(),
                    qty_str: "1".to_string(),
                    notional_usd: 50_000.0,
                    ts: i,
                })
                .await
                .unwrap();
        }
        store
            .append_trade(TradeRecord {
                market: Market::Futures,
                side: TradeSide::Sell,
                price_str: "50000.00".to_string(),
                qty_str: "1".to_string(),
                notional_usd: 50_000.0,
                ts: 100,
            })
            .await
            .unwrap();

        let rows = store.recent_trades(Market::Spot, 0, 3).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|t| t.market == Market::Spot));
        assert_eq!(rows.last().unwrap().ts, 4);
    }

    #[tokio::test]
    async fn recent_liquidations_filters_by_since() {
        use crate::types::TradeSide;

        let store = InMemoryStore::new();
        for i in 0..3 {
            store
                .append_liquidation(LiquidationRecord {
                    market: Market::Futures,
                    side: TradeSide::Sell,
                    price_str: "50000.00".to_string(),
                    qty_str: "1".to_string(),
                    notional_usd: 50_000.0,
                    ts: i * 1_000,
                })
                .await
                .unwrap();
        }

        let rows = store.recent_liquidations(1_000, 10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].ts, 1_000);
    }
}
