// =============================================================================
// OrderBook — per-market synchronized ladder with wall-lifecycle emission
// =============================================================================
//
// One instance per (market, symbol). All mutating operations serialize on a
// single lock; read-only snapshots take the same lock and return defensive
// copies, so derived readers never observe a half-applied diff and never hold
// the lock across I/O (SPEC_FULL.md §4.1, §5).
// =============================================================================

use std::collections::{BTreeMap, HashMap, VecDeque};

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::warn;

use crate::error::BookError;
use crate::types::{Market, Side};

use super::wire::{DepthDiff, DepthSnapshot};

/// Levels further than this fraction of mid are pruned / ignored for walls.
const PRUNE_DISTANCE_PCT: f64 = 0.5;

/// Diff events queued while a book is invalid. Oldest dropped beyond this.
const MAX_BUFFERED_DIFFS: usize = 10_000;

/// A wall-lifecycle event emitted by the diff-application / wall scan.
#[derive(Debug, Clone)]
pub enum WallEvent {
    Seen {
        side: Side,
        price: Decimal,
        qty: Decimal,
        notional_usd: f64,
        mid: f64,
    },
    Gone {
        side: Side,
        price: Decimal,
        last_qty: Decimal,
        last_notional_usd: f64,
        reason: GoneReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoneReason {
    Filled,
    Partial,
    Cancelled,
}

impl GoneReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            GoneReason::Filled => "filled",
            GoneReason::Partial => "partial",
            GoneReason::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone)]
struct WallLevelInfo {
    qty: Decimal,
    notional_usd: f64,
}

struct Inner {
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    last_update_id: u64,
    ready: bool,
    invalid: bool,
    /// True immediately after an anchor is installed, until the first diff
    /// applies successfully — governs which sequencing rule to use.
    awaiting_first_diff: bool,
    buffer: VecDeque<DepthDiff>,
    wall_levels: HashMap<(Side, Decimal), WallLevelInfo>,
    /// Set when a sequencing violation forced invalidation since the last
    /// time the recovery loop inspected this book.
    violation_since_last_check: bool,
}

impl Inner {
    fn new() -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_update_id: 0,
            ready: false,
            invalid: true,
            awaiting_first_diff: false,
            buffer: VecDeque::new(),
            wall_levels: HashMap::new(),
            violation_since_last_check: false,
        }
    }

    fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next_back().copied()
    }

    fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().copied()
    }

    fn mid(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => {
                let mid = (b + a) / Decimal::from(2);
                mid.to_string().parse::<f64>().ok()
            }
            _ => None,
        }
    }
}

/// Per-(market, symbol) synchronized order book.
pub struct OrderBook {
    market: Market,
    wall_threshold_usd: f64,
    inner: Mutex<Inner>,
}

/// Defensive, serializable snapshot of the top of book.
#[derive(Debug, Clone)]
pub struct OrderBookSnapshot {
    pub ready: bool,
    pub mid: Option<f64>,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub top_bids: Vec<(Decimal, Decimal)>,
    pub top_asks: Vec<(Decimal, Decimal)>,
    pub imbalance_1pct: Option<f64>,
    pub last_update_id: u64,
}

impl OrderBook {
    pub fn new(market: Market, wall_threshold_usd: f64) -> Self {
        Self {
            market,
            wall_threshold_usd,
            inner: Mutex::new(Inner::new()),
        }
    }

    pub fn market(&self) -> Market {
        self.market
    }

    pub fn is_ready(&self) -> bool {
        self.inner.lock().ready
    }

    /// Atomically mark the book invalid, clear readiness, and begin
    /// buffering incoming diffs afresh (SPEC_FULL.md §4.1).
    pub fn invalidate(&self) {
        let mut inner = self.inner.lock();
        inner.invalid = true;
        inner.ready = false;
        inner.buffer.clear();
    }

    /// Record that a sequencing violation occurred, for the recovery loop.
    fn flag_violation(inner: &mut Inner) {
        inner.invalid = true;
        inner.ready = false;
        inner.violation_since_last_check = true;
        inner.buffer.clear();
    }

    /// Consumed by SnapshotCoordinator's recovery loop; clears the flag.
    pub fn take_violation_flag(&self) -> bool {
        let mut inner = self.inner.lock();
        std::mem::replace(&mut inner.violation_since_last_check, false)
    }

    /// Apply one diff event. While invalid, the diff is buffered (bounded,
    /// oldest dropped) and no wall events are produced. While ready, the
    /// per-market sequencing rule is enforced; a violation invalidates the
    /// book and reports `BookError::SequencingViolation`.
    pub fn apply_diff(&self, diff: DepthDiff) -> Result<Vec<WallEvent>, BookError> {
        let mut inner = self.inner.lock();

        if inner.invalid {
            if inner.buffer.len() >= MAX_BUFFERED_DIFFS {
                inner.buffer.pop_front();
            }
            inner.buffer.push_back(diff);
            return Ok(Vec::new());
        }

        if diff.final_update_id <= inner.last_update_id {
            // Stale, already-applied diff. No-op per the idempotence invariant.
            return Ok(Vec::new());
        }

        let sequencing_ok = if inner.awaiting_first_diff {
            first_diff_ok(self.market, inner.last_update_id, &diff)
        } else {
            subsequent_diff_ok(self.market, inner.last_update_id, &diff)
        };

        if !sequencing_ok {
            let msg = format!(
                "{} sequencing violation: U={} u={} pu={:?} last_update_id={}",
                self.market, diff.first_update_id, diff.final_update_id, diff.prev_final_update_id, inner.last_update_id
            );
            warn!(market = %self.market, %msg, "order book desync detected");
            Self::flag_violation(&mut inner);
            return Err(BookError::SequencingViolation(msg));
        }

        let events = apply_and_scan(&mut inner, &diff, self.wall_threshold_usd);
        inner.last_update_id = diff.final_update_id;
        inner.awaiting_first_diff = false;
        Ok(events)
    }

    /// Install a fresh snapshot as the new anchor, then replay any diffs
    /// buffered while the book was invalid. Returns wall events produced
    /// while replaying (installing the snapshot itself never produces wall
    /// events directly; the first replayed diff does).
    pub fn apply_snapshot(&self, snapshot: DepthSnapshot) -> Vec<WallEvent> {
        let mut inner = self.inner.lock();

        inner.bids.clear();
        inner.asks.clear();
        for (price_str, qty_str) in &snapshot.bids {
            upsert_level(&mut inner.bids, price_str, qty_str);
        }
        for (price_str, qty_str) in &snapshot.asks {
            upsert_level(&mut inner.asks, price_str, qty_str);
        }

        inner.last_update_id = snapshot.last_update_id;
        inner.invalid = false;
        inner.awaiting_first_diff = true;
        inner.wall_levels.clear();

        let buffered: Vec<DepthDiff> = inner.buffer.drain(..).collect();
        let mut events = Vec::new();

        for diff in buffered {
            if diff.final_update_id <= inner.last_update_id {
                continue;
            }
            let sequencing_ok = if inner.awaiting_first_diff {
                first_diff_ok(self.market, inner.last_update_id, &diff)
            } else {
                subsequent_diff_ok(self.market, inner.last_update_id, &diff)
            };
            if !sequencing_ok {
                // A gap survived the snapshot fetch; give up on this replay
                // and let the next recovery cycle re-anchor again.
                Self::flag_violation(&mut inner);
                break;
            }
            events.extend(apply_and_scan(&mut inner, &diff, self.wall_threshold_usd));
            inner.last_update_id = diff.final_update_id;
            inner.awaiting_first_diff = false;
        }

        if !inner.invalid {
            inner.ready = true;
        }

        events
    }

    /// Drop levels further than 50% of mid from the ladder. Memory
    /// management only; pruned levels are never walls (SPEC_FULL.md §4.1).
    pub fn prune(&self) {
        let mut inner = self.inner.lock();
        let mid = match inner.mid() {
            Some(m) => m,
            None => return,
        };
        let bound = mid * PRUNE_DISTANCE_PCT;
        let lo = Decimal::try_from(mid - bound).unwrap_or(Decimal::MIN);
        let hi = Decimal::try_from(mid + bound).unwrap_or(Decimal::MAX);
        inner.bids.retain(|p, _| *p >= lo && *p <= hi);
        inner.asks.retain(|p, _| *p >= lo && *p <= hi);
    }

    pub fn snapshot(&self, top_n: usize) -> OrderBookSnapshot {
        let inner = self.inner.lock();
        let mid = inner.mid();

        let top_bids: Vec<(Decimal, Decimal)> = inner
            .bids
            .iter()
            .rev()
            .take(top_n)
            .map(|(p, q)| (*p, *q))
            .collect();
        let top_asks: Vec<(Decimal, Decimal)> = inner
            .asks
            .iter()
            .take(top_n)
            .map(|(p, q)| (*p, *q))
            .collect();

        let imbalance_1pct = mid.and_then(|m| {
            let bound = Decimal::try_from(m * 0.01).ok()?;
            let lo = Decimal::try_from(m).ok()? - bound;
            let hi = Decimal::try_from(m).ok()? + bound;
            let bid_vol: Decimal = inner
                .bids
                .range(lo..=hi)
                .map(|(_, q)| *q)
                .fold(Decimal::ZERO, |a, b| a + b);
            let ask_vol: Decimal = inner
                .asks
                .range(lo..=hi)
                .map(|(_, q)| *q)
                .fold(Decimal::ZERO, |a, b| a + b);
            let total = bid_vol + ask_vol;
            if total.is_zero() {
                None
            } else {
                ((bid_vol - ask_vol) / total).to_string().parse::<f64>().ok()
            }
        });

        OrderBookSnapshot {
            ready: inner.ready,
            mid,
            best_bid: inner.best_bid(),
            best_ask: inner.best_ask(),
            top_bids,
            top_asks,
            imbalance_1pct,
            last_update_id: inner.last_update_id,
        }
    }
}

fn upsert_level(book: &mut BTreeMap<Decimal, Decimal>, price_str: &str, qty_str: &str) {
    let (Ok(price), Ok(qty)) = (price_str.parse::<Decimal>(), qty_str.parse::<Decimal>()) else {
        return;
    };
    if qty.is_sign_negative() {
        let err = BookError::Invariant(format!("negative quantity {qty} at price {price}"));
        warn!(%price, %qty, %err, "order book invariant violated, resetting level");
        book.remove(&price);
        return;
    }
    if qty.is_zero() {
        book.remove(&price);
    } else {
        book.insert(price, qty);
    }
}

fn first_diff_ok(market: Market, anchor: u64, diff: &DepthDiff) -> bool {
    match market {
        Market::Spot => diff.first_update_id <= anchor + 1 && anchor + 1 <= diff.final_update_id,
        Market::Futures => diff.first_update_id <= anchor && anchor <= diff.final_update_id,
    }
}

fn subsequent_diff_ok(market: Market, prev_u: u64, diff: &DepthDiff) -> bool {
    match market {
        Market::Spot => diff.first_update_id == prev_u + 1,
        Market::Futures => diff.prev_final_update_id == Some(prev_u),
    }
}

/// Apply a diff's level changes and run the wall scan, returning the
/// resulting lifecycle events. Caller already holds the lock.
fn apply_and_scan(inner: &mut Inner, diff: &DepthDiff, wall_threshold_usd: f64) -> Vec<WallEvent> {
    for (price_str, qty_str) in &diff.bids {
        upsert_level(&mut inner.bids, price_str, qty_str);
    }
    for (price_str, qty_str) in &diff.asks {
        upsert_level(&mut inner.asks, price_str, qty_str);
    }
    wall_scan(inner, wall_threshold_usd)
}

fn wall_scan(inner: &mut Inner, wall_threshold_usd: f64) -> Vec<WallEvent> {
    let mid = match inner.mid() {
        Some(m) => m,
        None => return Vec::new(),
    };

    let mut current: HashMap<(Side, Decimal), WallLevelInfo> = HashMap::new();
    let mut events = Vec::new();

    for (price, qty) in inner.bids.iter() {
        if let Some(notional) = qualifying_notional(*price, *qty, mid, wall_threshold_usd) {
            current.insert(
                (Side::Bid, *price),
                WallLevelInfo { qty: *qty, notional_usd: notional },
            );
        }
    }
    for (price, qty) in inner.asks.iter() {
        if let Some(notional) = qualifying_notional(*price, *qty, mid, wall_threshold_usd) {
            current.insert(
                (Side::Ask, *price),
                WallLevelInfo { qty: *qty, notional_usd: notional },
            );
        }
    }

    for (key, info) in &current {
        events.push(WallEvent::Seen {
            side: key.0,
            price: key.1,
            qty: info.qty,
            notional_usd: info.notional_usd,
            mid,
        });
    }

    for (key, prev) in inner.wall_levels.iter() {
        if current.contains_key(key) {
            continue;
        }
        let book_side = match key.0 {
            Side::Bid => &inner.bids,
            Side::Ask => &inner.asks,
        };
        let cur_qty = book_side.get(&key.1).copied().unwrap_or(Decimal::ZERO);
        let reason = if cur_qty.is_zero() {
            GoneReason::Filled
        } else if cur_qty < prev.qty {
            GoneReason::Partial
        } else {
            GoneReason::Cancelled
        };
        events.push(WallEvent::Gone {
            side: key.0,
            price: key.1,
            last_qty: prev.qty,
            last_notional_usd: prev.notional_usd,
            reason,
        });
    }

    inner.wall_levels = current;
    events
}

fn qualifying_notional(price: Decimal, qty: Decimal, mid: f64, wall_threshold_usd: f64) -> Option<f64> {
    if qty.is_zero() {
        return None;
    }
    let price_f: f64 = price.to_string().parse().ok()?;
    let qty_f: f64 = qty.to_string().parse().ok()?;
    let notional = price_f * qty_f;
    if notional < wall_threshold_usd {
        return None;
    }
    if mid <= 0.0 {
        return None;
    }
    let distance = (price_f - mid).abs() / mid;
    if distance > PRUNE_DISTANCE_PCT {
        return None;
    }
    Some(notional)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff(u: u64, first: u64, pu: Option<u64>, bids: Vec<(&str, &str)>, asks: Vec<(&str, &str)>) -> DepthDiff {
        DepthDiff {
            first_update_id: first,
            final_update_id: u,
            prev_final_update_id: pu,
            bids: bids.into_iter().map(|(p, q)| (p.to_string(), q.to_string())).collect(),
            asks: asks.into_iter().map(|(p, q)| (p.to_string(), q.to_string())).collect(),
        }
    }

    fn snap(last_update_id: u64, bids: Vec<(&str, &str)>, asks: Vec<(&str, &str)>) -> DepthSnapshot {
        DepthSnapshot {
            last_update_id,
            bids: bids.into_iter().map(|(p, q)| (p.to_string(), q.to_string())).collect(),
            asks: asks.into_iter().map(|(p, q)| (p.to_string(), q.to_string())).collect(),
        }
    }

    #[test]
    fn cold_start_futures_then_sequencing() {
        let book = OrderBook::new(Market::Futures, 500_000.0);
        book.invalidate();
        book.apply_snapshot(snap(100, vec![("50000.00", "1")], vec![("50100.00", "1")]));
        assert!(book.is_ready());

        let r1 = book.apply_diff(diff(105, 100, Some(99), vec![], vec![]));
        assert!(r1.is_ok());
        assert!(book.is_ready());

        let r2 = book.apply_diff(diff(110, 106, Some(105), vec![], vec![]));
        assert!(r2.is_ok());
        assert!(book.is_ready());

        let r3 = book.apply_diff(diff(115, 111, Some(109), vec![], vec![]));
        assert!(r3.is_err());
        assert!(!book.is_ready());
        assert!(book.take_violation_flag());
    }

    #[test]
    fn spot_first_diff_boundary() {
        let book = OrderBook::new(Market::Spot, 500_000.0);
        book.invalidate();
        book.apply_snapshot(snap(100, vec![], vec![]));
        // U == anchor + 1 is accepted.
        let r = book.apply_diff(diff(105, 101, None, vec![], vec![]));
        assert!(r.is_ok());
        assert!(book.is_ready());
    }

    #[test]
    fn spot_first_diff_rejects_gap() {
        let book = OrderBook::new(Market::Spot, 500_000.0);
        book.invalidate();
        book.apply_snapshot(snap(100, vec![], vec![]));
        let r = book.apply_diff(diff(105, 103, None, vec![], vec![]));
        assert!(r.is_err());
    }

    #[test]
    fn empty_diff_is_noop() {
        let book = OrderBook::new(Market::Spot, 500_000.0);
        book.invalidate();
        book.apply_snapshot(snap(100, vec![("50000.00", "1")], vec![("50100.00", "1")]));
        let before = book.snapshot(10);
        let r = book.apply_diff(diff(101, 101, None, vec![], vec![]));
        assert!(r.is_ok());
        let after = book.snapshot(10);
        assert_eq!(before.best_bid, after.best_bid);
        assert_eq!(before.best_ask, after.best_ask);
    }

    #[test]
    fn wall_detected_inclusive_at_threshold() {
        let book = OrderBook::new(Market::Futures, 500_000.0);
        book.invalidate();
        // mid = 50050, bid at 50000 qty 10 -> notional 500_000 exactly.
        let events = book.apply_snapshot(snap(
            100,
            vec![("50000.00", "1")],
            vec![("50100.00", "1")],
        ));
        assert!(events.is_empty()); // snapshot install itself emits nothing

        let events = book.apply_diff(diff(101, 101, Some(100), vec![("50000.00", "10")], vec![]));
        let events = events.unwrap();
        let saw_wall = events.iter().any(|e| matches!(e, WallEvent::Seen { notional_usd, .. } if (*notional_usd - 500_000.0).abs() < 1.0));
        assert!(saw_wall, "expected a wall at exactly threshold notional");
    }

    #[test]
    fn wall_gone_filled_on_zero_qty() {
        let book = OrderBook::new(Market::Futures, 500_000.0);
        book.invalidate();
        book.apply_snapshot(snap(100, vec![("50000.00", "10")], vec![("50100.00", "1")]));
        let events = book
            .apply_diff(diff(101, 101, Some(100), vec![], vec![]))
            .unwrap();
        // mid unchanged, wall already present from snapshot replay's implicit
        // scan on the first diff application.
        assert!(events.iter().any(|e| matches!(e, WallEvent::Seen { .. })));

        let events = book
            .apply_diff(diff(102, 102, Some(101), vec![("50000.00", "0")], vec![]))
            .unwrap();
        let gone = events.iter().find(|e| matches!(e, WallEvent::Gone { .. }));
        match gone {
            Some(WallEvent::Gone { reason, .. }) => assert_eq!(*reason, GoneReason::Filled),
            _ => panic!("expected a wall_gone event"),
        }
    }

    #[test]
    fn negative_quantity_is_dropped_not_inserted() {
        let book = OrderBook::new(Market::Spot, 500_000.0);
        book.invalidate();
        book.apply_snapshot(snap(100, vec![("50000.00", "1")], vec![("50100.00", "1")]));
        let r = book
            .apply_diff(diff(101, 101, None, vec![("50000.00", "-5")], vec![]))
            .unwrap();
        assert!(r.is_empty());
        let snap = book.snapshot(10);
        assert!(snap.top_bids.iter().all(|(p, _)| p.to_string() != "50000.00"));
    }
}
