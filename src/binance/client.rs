// =============================================================================
// Binance REST client — public depth snapshots only
// =============================================================================
//
// No account or order endpoints are wired up (order placement and execution
// are out of scope). The client exists purely to anchor an OrderBook via
// GET /depth and to track response weight through the shared rate-limit
// tracker (SPEC_FULL.md §6, §4.9A).
// =============================================================================

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

use crate::error::SnapshotError;
use crate::orderbook::DepthSnapshot;
use crate::types::{Market, SYMBOL};

use super::rate_limit::RateLimitTracker;

const SPOT_BASE: &str = "https://api.binance.com/api/v3";
const FUTURES_BASE: &str = "https://fapi.binance.com/fapi/v1";
const REST_TIMEOUT: Duration = Duration::from_secs(20);
const DEPTH_LIMIT: u32 = 1000;
/// Weight cost of `GET /depth?limit=1000`, per the public API docs.
const DEPTH_WEIGHT: u32 = 50;

pub struct BinanceClient {
    http: Client,
    rate_limit: RateLimitTracker,
}

impl BinanceClient {
    pub fn new(proxy_url: Option<&str>) -> Result<Self, SnapshotError> {
        let mut builder = Client::builder().timeout(REST_TIMEOUT);
        if let Some(proxy) = proxy_url {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| SnapshotError::PermanentIo(format!("invalid proxy url: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let http = builder
            .build()
            .map_err(|e| SnapshotError::PermanentIo(format!("failed to build http client: {e}")))?;
        Ok(Self {
            http,
            rate_limit: RateLimitTracker::new(),
        })
    }

    pub fn rate_limit(&self) -> &RateLimitTracker {
        &self.rate_limit
    }

    fn base_for(market: Market) -> &'static str {
        match market {
            Market::Spot => SPOT_BASE,
            Market::Futures => FUTURES_BASE,
        }
    }

    /// Fetch a fresh depth snapshot for `market`, budget permitting.
    /// Returns `None` (not an error) when the rate-limit budget is exhausted;
    /// the caller retries on its next cycle (SPEC_FULL.md §4.3).
    pub async fn fetch_depth_snapshot(&self, market: Market) -> Result<Option<DepthSnapshot>, SnapshotError> {
        if !self.rate_limit.can_send_request(DEPTH_WEIGHT) {
            return Ok(None);
        }

        let url = format!("{}/depth?symbol={}USDT&limit={}", Self::base_for(market), SYMBOL, DEPTH_LIMIT);
        debug!(market = %market, %url, "fetching depth snapshot");

        let resp = self.http.get(&url).send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                SnapshotError::TransientIo(e.to_string())
            } else {
                SnapshotError::PermanentIo(e.to_string())
            }
        })?;

        self.rate_limit.update_from_headers(resp.headers());

        let status = resp.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let body = resp.text().await.unwrap_or_default();
            warn!(market = %market, %status, %body, "transient error fetching depth snapshot");
            return Err(SnapshotError::TransientIo(format!("{status}: {body}")));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SnapshotError::PermanentIo(format!("{status}: {body}")));
        }

        let snapshot = resp
            .json::<DepthSnapshot>()
            .await
            .map_err(|e| SnapshotError::PermanentIo(format!("malformed depth snapshot: {e}")))?;

        Ok(Some(snapshot))
    }
}
