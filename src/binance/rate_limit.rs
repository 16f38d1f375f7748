// =============================================================================
// Rate-Limit Tracker — monitors REST weight usage to avoid 429s
// =============================================================================
//
// Binance enforces a request-weight budget of 1200 per rolling minute; we
// hard-cap ourselves below that. The tracker reads the `X-MBX-USED-WEIGHT-1M`
// response header after every request and keeps an atomic counter any task
// may query lock-free (SPEC_FULL.md §4.9A).
// =============================================================================

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};

/// Hard ceiling at which we refuse to send additional requests.
const WEIGHT_HARD_LIMIT: u32 = 1000;
/// Soft warning threshold.
const WEIGHT_WARN_THRESHOLD: u32 = 800;

/// Thread-safe rate-limit tracker backed by an atomic counter. One instance
/// is shared across both the spot and futures REST clients.
pub struct RateLimitTracker {
    used_weight_1m: AtomicU32,
}

/// Immutable snapshot of the current rate-limit state, for the status surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub used_weight_1m: u32,
    pub hard_limit: u32,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self {
            used_weight_1m: AtomicU32::new(0),
        }
    }

    /// Update the counter from the HTTP response headers returned by Binance.
    pub fn update_from_headers(&self, headers: &reqwest::header::HeaderMap) {
        let Some(val) = headers.get("X-MBX-USED-WEIGHT-1M") else {
            return;
        };
        let Ok(s) = val.to_str() else { return };
        let Ok(w) = s.parse::<u32>() else { return };

        let prev = self.used_weight_1m.swap(w, Ordering::Relaxed);
        if w >= WEIGHT_WARN_THRESHOLD && prev < WEIGHT_WARN_THRESHOLD {
            warn!(used_weight = w, hard_limit = WEIGHT_HARD_LIMIT, "rate-limit weight crossed warning threshold");
        }
        debug!(used_weight_1m = w, "rate-limit weight updated from header");
    }

    /// Return `true` if we can afford to spend `weight` more request weight
    /// without exceeding the hard limit. Consulted by SnapshotCoordinator
    /// before every snapshot fetch.
    pub fn can_send_request(&self, weight: u32) -> bool {
        let current = self.used_weight_1m.load(Ordering::Relaxed);
        let allowed = current + weight <= WEIGHT_HARD_LIMIT;
        if !allowed {
            warn!(
                current_weight = current,
                requested_weight = weight,
                hard_limit = WEIGHT_HARD_LIMIT,
                "request blocked — would exceed rate-limit"
            );
        }
        allowed
    }

    /// Reset the 1-minute weight counter (call from a periodic timer).
    pub fn reset_1m_weight(&self) {
        self.used_weight_1m.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        RateLimitSnapshot {
            used_weight_1m: self.used_weight_1m.load(Ordering::Relaxed),
            hard_limit: WEIGHT_HARD_LIMIT,
        }
    }
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RateLimitTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitTracker")
            .field("used_weight_1m", &self.used_weight_1m.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warns_once_crossing_threshold() {
        let tracker = RateLimitTracker::new();
        assert!(tracker.can_send_request(50));
        tracker.used_weight_1m.store(950, Ordering::Relaxed);
        assert!(!tracker.can_send_request(100));
        assert!(tracker.can_send_request(10));
    }
}
