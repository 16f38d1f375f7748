// =============================================================================
// SnapshotCoordinator — REST anchoring, periodic refresh, gap recovery
// (SPEC_FULL.md §4.3)
// =============================================================================
//
// Follows the teacher's periodic-reconciliation shape (reconcile.rs): a
// background task on a fixed interval, with an explicit "invalidate before
// fetch" ordering called out the same way the teacher calls out its own
// safety-critical ordering.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::binance::BinanceClient;
use crate::orderbook::OrderBook;
use crate::store::Store;
use crate::types::{now_epoch_ms, Market};

const RECOVERY_INTERVAL: Duration = Duration::from_secs(5);
const DESYNC_TOLERANCE: Duration = Duration::from_secs(10);
const PERIODIC_REFRESH_INTERVAL: Duration = Duration::from_secs(3600);

pub struct SnapshotCoordinator {
    client: Arc<BinanceClient>,
    spot_book: Arc<OrderBook>,
    futures_book: Arc<OrderBook>,
    store: Arc<dyn Store>,
}

impl SnapshotCoordinator {
    pub fn new(client: Arc<BinanceClient>, spot_book: Arc<OrderBook>, futures_book: Arc<OrderBook>, store: Arc<dyn Store>) -> Self {
        Self { client, spot_book, futures_book, store }
    }

    fn book(&self, market: Market) -> &Arc<OrderBook> {
        match market {
            Market::Spot => &self.spot_book,
            Market::Futures => &self.futures_book,
        }
    }

    /// Cold start: invalidate, fetch, anchor, for both markets.
    pub async fn cold_start(&self) {
        for market in Market::all() {
            self.refresh(market).await;
        }
    }

    /// `invalidate()` strictly before the REST fetch. Diffs arriving during
    /// the fetch are buffered by the book itself and replayed by
    /// `apply_snapshot`; skipping this ordering is the canonical desync bug
    /// this coordinator exists to avoid (SPEC_FULL.md §4.3).
    async fn refresh(&self, market: Market) {
        let book = self.book(market);
        book.invalidate();

        match self.client.fetch_depth_snapshot(market).await {
            Ok(Some(snapshot)) => {
                let last_update_id = snapshot.last_update_id;
                book.apply_snapshot(snapshot);
                if let Err(e) = self.store.append_depth_snapshot(market, last_update_id, now_epoch_ms()).await {
                    warn!(market = %market, error = %e, "failed to persist depth snapshot record");
                }
                info!(market = %market, last_update_id, "order book re-anchored");
            }
            Ok(None) => {
                warn!(market = %market, "skipped snapshot fetch, rate-limit budget exhausted");
            }
            Err(e) => {
                error!(market = %market, error = %e, "depth snapshot fetch failed, will retry next cycle");
            }
        }
    }

    /// Every 5s: re-anchor any book that has been not-ready too long, or
    /// that flagged a sequencing violation since the last check. Bounds
    /// worst-case downtime regardless of cause (SPEC_FULL.md §4.3).
    pub async fn run_recovery_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(RECOVERY_INTERVAL);
        let mut not_ready_since: std::collections::HashMap<Market, std::time::Instant> = std::collections::HashMap::new();

        loop {
            interval.tick().await;
            for market in Market::all() {
                let book = self.book(market);
                let violated = book.take_violation_flag();

                if book.is_ready() {
                    not_ready_since.remove(&market);
                    continue;
                }

                let since = *not_ready_since.entry(market).or_insert_with(std::time::Instant::now);
                if violated || since.elapsed() >= DESYNC_TOLERANCE {
                    warn!(market = %market, violated, "recovery loop forcing re-anchor");
                    self.refresh(market).await;
                    not_ready_since.remove(&market);
                }
            }
        }
    }

    /// Hourly scheduled re-anchor, independent of the recovery loop's
    /// reactive checks.
    pub async fn run_periodic_refresh(self: Arc<Self>) {
        let mut interval = tokio::time::interval(PERIODIC_REFRESH_INTERVAL);
        interval.tick().await; // first tick fires immediately; skip it, cold_start already anchored.
        loop {
            interval.tick().await;
            info!("periodic hourly re-anchor");
            for market in Market::all() {
                self.refresh(market).await;
            }
        }
    }

    /// Once per minute, drop distant levels from both books.
    pub async fn run_pruner(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            self.spot_book.prune();
            self.futures_book.prune();
        }
    }
}
