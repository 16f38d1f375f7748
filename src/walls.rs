// =============================================================================
// WallTracker — converts order-book wall-lifecycle events into alerts and
// persisted wall records (SPEC_FULL.md §4.4)
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::info;

use crate::alerts::{AlertKind, AlertRequest, AlertRouter};
use crate::config::Thresholds;
use crate::orderbook::{GoneReason, WallEvent};
use crate::store::{Store, WallRecord, WallStatus};
use crate::types::{now_epoch_ms, Market, Side};

const SPOOF_WINDOW: Duration = Duration::from_secs(3600);

struct WallEntry {
    qty: Decimal,
    notional_usd: f64,
    detected_at: Instant,
    detected_at_ms: i64,
    first_seen_mid: f64,
    confirmed: bool,
    /// Set once a `wall_new` alert has fired for this entry, so growth past
    /// `wall_alert_usd` is only reported on the transition, not every update.
    alerted: bool,
}

type WallKey = (Market, Side, String);

pub struct WallTracker {
    router: Arc<AlertRouter>,
    store: Arc<dyn Store>,
    thresholds: Thresholds,
    registry: Mutex<HashMap<WallKey, WallEntry>>,
    spoof_log: Mutex<HashMap<WallKey, VecDeque<Instant>>>,
}

impl WallTracker {
    pub fn new(router: Arc<AlertRouter>, store: Arc<dyn Store>, thresholds: Thresholds) -> Self {
        Self {
            router,
            store,
            thresholds,
            registry: Mutex::new(HashMap::new()),
            spoof_log: Mutex::new(HashMap::new()),
        }
    }

    /// Rehydrate currently-open walls from the store at cold start.
    pub async fn rehydrate(&self) -> Result<(), crate::error::SinkError> {
        let open = self.store.open_walls().await?;
        let mut registry = self.registry.lock();
        for record in open {
            let key = (record.market, record.side, record.price_str.clone());
            let qty = record.qty_str.parse::<Decimal>().unwrap_or(Decimal::ZERO);
            registry.insert(
                key,
                WallEntry {
                    qty,
                    notional_usd: record.notional_usd,
                    detected_at: Instant::now(),
                    detected_at_ms: record.detected_at,
                    first_seen_mid: 0.0,
                    confirmed: matches!(record.status, WallStatus::Confirmed),
                    alerted: record.notional_usd >= self.thresholds.wall_alert_usd,
                },
            );
        }
        Ok(())
    }

    pub async fn handle_event(&self, market: Market, event: WallEvent) {
        match event {
            WallEvent::Seen { side, price, qty, notional_usd, mid } => {
                self.handle_seen(market, side, price, qty, notional_usd, mid).await;
            }
            WallEvent::Gone { side, price, last_qty, last_notional_usd, reason } => {
                self.handle_gone(market, side, price, last_qty, last_notional_usd, reason).await;
            }
        }
    }

    async fn handle_seen(&self, market: Market, side: Side, price: Decimal, qty: Decimal, notional_usd: f64, mid: f64) {
        let price_str = price.to_string();
        let key = (market, side, price_str.clone());

        // `wall_new` fires on the notional *crossing* wall_alert_usd, not on
        // registry-entry creation: a wall already tracked below the alert
        // threshold still needs to alert once it grows past it (SPEC_FULL.md
        // §4.4, "first crosses WALL_ALERT_USD").
        let (is_new, crossed_alert_threshold) = {
            let mut registry = self.registry.lock();
            match registry.get_mut(&key) {
                Some(entry) => {
                    entry.qty = qty;
                    entry.notional_usd = notional_usd;
                    let crossed = !entry.alerted && notional_usd >= self.thresholds.wall_alert_usd;
                    if crossed {
                        entry.alerted = true;
                    }
                    (false, crossed)
                }
                None => {
                    let crossed = notional_usd >= self.thresholds.wall_alert_usd;
                    registry.insert(
                        key.clone(),
                        WallEntry {
                            qty,
                            notional_usd,
                            detected_at: Instant::now(),
                            detected_at_ms: now_epoch_ms(),
                            first_seen_mid: mid,
                            confirmed: false,
                            alerted: crossed,
                        },
                    );
                    (true, crossed)
                }
            }
        };

        let record = WallRecord {
            market,
            side,
            price_str: price_str.clone(),
            qty_str: qty.to_string(),
            notional_usd,
            detected_at: now_epoch_ms(),
            status: WallStatus::Active,
            confirmed_at: None,
            gone_reason: None,
        };
        if let Err(e) = self.store.upsert_wall(record).await {
            tracing::warn!(error = %e, "failed to persist wall upsert");
        }

        if is_new {
            // Spoof tracking counts repeated *appearances* of a wall at this
            // price level, independent of whether this sighting happens to
            // cross the alert threshold.
            self.record_spoof_sighting(&key);
        }

        if crossed_alert_threshold {
            let spoof_count = self.spoof_count_last_hour(&key);
            let distance_pct = (price.to_string().parse::<f64>().unwrap_or(0.0) - mid) / mid * 100.0;
            let side_suffix = match side {
                Side::Bid => "bid",
                Side::Ask => "ask",
            };
            let topic = format!("walls_{}_{}", market.as_str(), side_suffix);
            let spoof_note = if spoof_count >= 2 {
                " [spoof warning: repeated appearance at this level]"
            } else {
                ""
            };
            let text = format!(
                "NEW WALL {market} {side} @ {price_str}: ${notional_usd:.0} ({distance_pct:+.2}% from mid ${mid:.2}){spoof_note}"
            );
            info!(market = %market, side = %side, price = %price_str, notional_usd, "new wall alert");
            self.router.submit(AlertRequest::new(
                AlertKind::WallNew,
                topic,
                format!("wall_new:{market}:{side}:{price_str}"),
                text,
            ));
        }
    }

    async fn handle_gone(&self, market: Market, side: Side, price: Decimal, last_qty: Decimal, last_notional_usd: f64, reason: GoneReason) {
        let price_str = price.to_string();
        let key = (market, side, price_str.clone());

        let removed = self.registry.lock().remove(&key);
        let age = removed.as_ref().map(|e| e.detected_at.elapsed()).unwrap_or_default();
        let detected_at_ms = removed.as_ref().map(|e| e.detected_at_ms).unwrap_or_else(now_epoch_ms);
        let was_confirmed = removed.as_ref().map(|e| e.confirmed).unwrap_or(false);

        if let Err(e) = self
            .store
            .close_wall(market, side, &price_str, detected_at_ms, reason.as_str())
            .await
        {
            tracing::warn!(error = %e, "failed to persist wall close");
        }

        if was_confirmed {
            let topic = format!("confirmed_walls_{}", market.as_str());
            let text = format!(
                "CONFIRMED WALL GONE {market} {side} @ {price_str}: last ${last_notional_usd:.0}, age {}s, reason={}",
                age.as_secs(),
                reason.as_str()
            );
            self.router.submit(AlertRequest::new(
                AlertKind::ConfirmedWallGone,
                topic,
                format!("confirmed_wall_gone:{market}:{side}:{price_str}:{detected_at_ms}"),
                text,
            ));
        }

        if last_notional_usd >= self.thresholds.wall_cancel_alert_usd {
            let side_suffix = match side {
                Side::Bid => "bid",
                Side::Ask => "ask",
            };
            let topic = format!("walls_{}_{}", market.as_str(), side_suffix);
            let text = format!(
                "WALL GONE {market} {side} @ {price_str}: last ${last_notional_usd:.0} qty {last_qty}, age {}s, reason={}",
                age.as_secs(),
                reason.as_str()
            );
            self.router.submit(AlertRequest::new(
                AlertKind::WallGone,
                topic,
                format!("wall_gone:{market}:{side}:{price_str}:{detected_at_ms}"),
                text,
            ));
        }
    }

    fn record_spoof_sighting(&self, key: &WallKey) {
        let mut log = self.spoof_log.lock();
        let entries = log.entry(key.clone()).or_default();
        entries.push_back(Instant::now());
        while let Some(front) = entries.front() {
            if front.elapsed() > SPOOF_WINDOW {
                entries.pop_front();
            } else {
                break;
            }
        }
    }

    fn spoof_count_last_hour(&self, key: &WallKey) -> usize {
        let mut log = self.spoof_log.lock();
        if let Some(entries) = log.get_mut(key) {
            while let Some(front) = entries.front() {
                if front.elapsed() > SPOOF_WINDOW {
                    entries.pop_front();
                } else {
                    break;
                }
            }
            entries.len()
        } else {
            0
        }
    }

    /// Periodic (10s) scan promoting qualifying Active walls to Confirmed.
    /// Iterates over a materialized key snapshot so the registry is never
    /// walked while a concurrent Seen/Gone event could mutate it mid-scan.
    pub async fn check_confirmed_walls(&self) {
        let candidates: Vec<(WallKey, f64, f64, i64, Decimal)> = {
            let registry = self.registry.lock();
            registry
                .iter()
                .filter(|(_, entry)| !entry.confirmed)
                .map(|(key, entry)| (key.clone(), entry.notional_usd, entry.first_seen_mid, entry.detected_at_ms, entry.qty))
                .collect()
        };

        for (key, notional_usd, mid, detected_at_ms, qty) in candidates {
            if notional_usd < self.thresholds.confirmed_wall_threshold_usd || mid <= 0.0 {
                continue;
            }
            let price_f: f64 = key.2.parse().unwrap_or(0.0);
            let distance_pct = ((price_f - mid) / mid * 100.0).abs();
            if distance_pct > self.thresholds.confirmed_wall_max_distance_pct {
                continue;
            }

            let age_secs = {
                let registry = self.registry.lock();
                match registry.get(&key) {
                    Some(entry) => entry.detected_at.elapsed().as_secs(),
                    None => continue,
                }
            };
            if age_secs < self.thresholds.confirmed_wall_delay_sec {
                continue;
            }

            {
                let mut registry = self.registry.lock();
                if let Some(entry) = registry.get_mut(&key) {
                    if entry.confirmed {
                        continue;
                    }
                    entry.confirmed = true;
                } else {
                    continue;
                }
            }

            let (market, side, price_str) = key;

            let record = WallRecord {
                market,
                side,
                price_str: price_str.clone(),
                qty_str: qty.to_string(),
                notional_usd,
                detected_at: detected_at_ms,
                status: WallStatus::Confirmed,
                confirmed_at: Some(now_epoch_ms()),
                gone_reason: None,
            };
            if let Err(e) = self.store.upsert_wall(record).await {
                tracing::warn!(error = %e, "failed to persist wall confirmation");
            }

            let topic = format!("confirmed_walls_{}", market.as_str());
            let text = format!("CONFIRMED WALL {market} {side} @ {price_str}: ${notional_usd:.0}, {distance_pct:.2}% from mid, age {age_secs}s");
            self.router.submit(AlertRequest::new(
                AlertKind::ConfirmedWall,
                topic,
                format!("confirmed_wall:{market}:{side}:{price_str}:{detected_at_ms}"),
                text,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Thresholds;
    use crate::orderbook::GoneReason;
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

    fn thresholds() -> Thresholds {
        Thresholds {
            wall_threshold_usd: 500_000.0,
            wall_alert_usd: 2_000_000.0,
            wall_cancel_alert_usd: 1_000_000.0,
            confirmed_wall_threshold_usd: 5_000_000.0,
            confirmed_wall_max_distance_pct: 2.0,
            confirmed_wall_delay_sec: 0,
            ..Thresholds::default()
        }
    }

    #[tokio::test]
    async fn new_wall_above_alert_threshold_fires_immediately() {
        let store = Arc::new(InMemoryStore::new());
        let tracker = WallTracker::new(router(), store.clone(), thresholds());

        tracker
            .handle_seen(Market::Spot, Side::Bid, Decimal::new(5000000, 2), Decimal::new(100, 2), 2_500_000.0, 50_000.0)
            .await;

        let open = store.open_walls().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].status, WallStatus::Active);
    }

    #[tokio::test]
    async fn wall_growing_past_alert_threshold_fires_on_the_crossing_not_just_on_first_sight() {
        // Regression test: a wall first registered below wall_alert_usd must
        // still fire wall_new once it grows past the threshold on a later
        // update, not only when the registry entry is first created.
        let store = Arc::new(InMemoryStore::new());
        let th = thresholds();
        let tracker = WallTracker::new(router(), store.clone(), th.clone());
        let price = Decimal::new(5000000, 2);

        // First sighting: above wall_threshold_usd but below wall_alert_usd.
        tracker.handle_seen(Market::Spot, Side::Bid, price, Decimal::new(12, 0), 600_000.0, 50_000.0).await;
        {
            let registry = tracker.registry.lock();
            let entry = registry.get(&(Market::Spot, Side::Bid, price.to_string())).unwrap();
            assert!(!entry.alerted);
        }

        // Same level grows past wall_alert_usd on a later diff.
        tracker.handle_seen(Market::Spot, Side::Bid, price, Decimal::new(40, 0), 2_000_000.0, 50_000.0).await;
        {
            let registry = tracker.registry.lock();
            let entry = registry.get(&(Market::Spot, Side::Bid, price.to_string())).unwrap();
            assert!(entry.alerted);
        }

        // A further update that stays above the threshold must not re-fire
        // (alerted stays latched true, not re-evaluated every call).
        tracker.handle_seen(Market::Spot, Side::Bid, price, Decimal::new(45, 0), 2_250_000.0, 50_000.0).await;
        let registry = tracker.registry.lock();
        let entry = registry.get(&(Market::Spot, Side::Bid, price.to_string())).unwrap();
        assert!(entry.alerted);
    }

    #[tokio::test]
    async fn handle_gone_alerts_confirmed_wall_gone_and_closes_store_record() {
        let store = Arc::new(InMemoryStore::new());
        let tracker = WallTracker::new(router(), store.clone(), thresholds());
        let price = Decimal::new(5000000, 2);

        tracker.handle_seen(Market::Futures, Side::Ask, price, Decimal::new(200, 0), 10_000_000.0, 49_900.0).await;
        tracker.check_confirmed_walls().await;
        {
            let registry = tracker.registry.lock();
            assert!(registry.get(&(Market::Futures, Side::Ask, price.to_string())).unwrap().confirmed);
        }

        tracker
            .handle_gone(Market::Futures, Side::Ask, price, Decimal::new(200, 0), 10_000_000.0, GoneReason::Filled)
            .await;

        let open = store.open_walls().await.unwrap();
        assert!(open.is_empty());
        assert!(tracker.registry.lock().get(&(Market::Futures, Side::Ask, price.to_string())).is_none());
    }

    #[tokio::test]
    async fn check_confirmed_walls_persists_confirmed_status_to_store() {
        let store = Arc::new(InMemoryStore::new());
        let tracker = WallTracker::new(router(), store.clone(), thresholds());
        let price = Decimal::new(5000000, 2);

        tracker.handle_seen(Market::Spot, Side::Bid, price, Decimal::new(150, 0), 7_500_000.0, 49_500.0).await;
        tracker.check_confirmed_walls().await;

        let open = store.open_walls().await.unwrap();
        let record = open.iter().find(|w| w.price_str == price.to_string()).unwrap();
        assert_eq!(record.status, WallStatus::Confirmed);
        assert!(record.confirmed_at.is_some());
    }

    #[tokio::test]
    async fn check_confirmed_walls_skips_entries_too_far_from_mid() {
        let store = Arc::new(InMemoryStore::new());
        let tracker = WallTracker::new(router(), store.clone(), thresholds());
        let price = Decimal::new(5000000, 2);

        // 10% away from mid, beyond confirmed_wall_max_distance_pct.
        tracker.handle_seen(Market::Spot, Side::Bid, price, Decimal::new(150, 0), 7_500_000.0, 45_000.0).await;
        tracker.check_confirmed_walls().await;

        let registry = tracker.registry.lock();
        assert!(!registry.get(&(Market::Spot, Side::Bid, price.to_string())).unwrap().confirmed);
    }

    #[tokio::test]
    async fn spoof_count_increments_on_repeated_appearance_at_same_level() {
        let store = Arc::new(InMemoryStore::new());
        let tracker = WallTracker::new(router(), store, thresholds());
        let price = Decimal::new(5000000, 2);
        let key = (Market::Spot, Side::Bid, price.to_string());

        tracker.handle_seen(Market::Spot, Side::Bid, price, Decimal::new(60, 0), 3_000_000.0, 49_500.0).await;
        tracker.handle_gone(Market::Spot, Side::Bid, price, Decimal::new(60, 0), 3_000_000.0, GoneReason::Cancelled).await;
        tracker.handle_seen(Market::Spot, Side::Bid, price, Decimal::new(60, 0), 3_000_000.0, 49_500.0).await;

        assert_eq!(tracker.spoof_count_last_hour(&key), 2);
    }
}
