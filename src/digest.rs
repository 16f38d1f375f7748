// =============================================================================
// Digest boundary — periodic aggregate summaries (SPEC_FULL.md §4.6)
// =============================================================================
//
// Digest rendering and final thresholds are delegated to the chat-platform
// client; this renders a minimal plain-text summary sufficient to exercise
// the boundary and the router (Open Question, resolved in DESIGN.md).
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::{Timelike, Utc};
use tracing::warn;

use crate::alerts::{AlertKind, AlertRequest, AlertRouter};
use crate::store::Store;
use crate::types::Market;

const PERIODS_MIN: [i64; 3] = [15, 30, 60];
const CHECK_INTERVAL: Duration = Duration::from_secs(30);

pub struct DigestScheduler {
    store: Arc<dyn Store>,
    router: Arc<AlertRouter>,
}

impl DigestScheduler {
    pub fn new(store: Arc<dyn Store>, router: Arc<AlertRouter>) -> Self {
        Self { store, router }
    }

    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(CHECK_INTERVAL);
        let mut last_fired_minute = -1i64;

        loop {
            interval.tick().await;
            let now = Utc::now();
            let minute_of_hour = now.minute() as i64;

            if minute_of_hour == last_fired_minute {
                continue;
            }

            for period in PERIODS_MIN {
                if minute_of_hour % period == 0 {
                    self.emit_digest(period).await;
                }
            }
            last_fired_minute = minute_of_hour;
        }
    }

    async fn emit_digest(&self, period_min: i64) {
        let since = crate::types::now_epoch_ms() / 1000 - period_min * 60;
        let mut lines = Vec::new();

        for market in Market::all() {
            match self.store.recent_minute_buckets(market, since).await {
                Ok(buckets) => {
                    let trade_count: u64 = buckets.iter().map(|b| b.trade_count).sum();
                    let cvd_delta: f64 = buckets.iter().map(|b| b.delta_usd).sum();
                    lines.push(format!("{market}: {trade_count} trades, CVD delta ${cvd_delta:.0}"));
                }
                Err(e) => {
                    warn!(market = %market, error = %e, "failed to load digest data");
                }
            }
        }

        let text = format!("{}m digest:\n{}", period_min, lines.join("\n"));
        self.router.submit(AlertRequest::new(
            AlertKind::Digest,
            format!("digest_{period_min}m"),
            format!("digest:{period_min}:{}", crate::types::now_epoch_ms() / 1000 / (period_min * 60)),
            text,
        ));
    }
}
