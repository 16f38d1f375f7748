// =============================================================================
// Configuration — environment-loaded, validated once at startup
// =============================================================================
//
// Every tunable threshold in the detection pipeline lives here so the rest of
// the system never reads `std::env` directly. Config is read-only after
// startup (see SPEC_FULL.md §9, Global process state) and is injected into
// every component that needs it, never reached for ambiently.
//
// Required fields with no sane default are rejected as `ConfigError::
// MissingRequired`, which is fatal at startup only (§7).
// =============================================================================

use crate::error::ConfigError;

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn required(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingRequired(key.to_string()))
}

/// Detection thresholds, all expressed in USD notional or percent.
#[derive(Debug, Clone)]
pub struct Thresholds {
    pub wall_threshold_usd: f64,
    pub large_trade_threshold_spot_usd: f64,
    pub large_trade_threshold_futures_usd: f64,
    pub wall_alert_usd: f64,
    pub wall_cancel_alert_usd: f64,
    pub confirmed_wall_threshold_usd: f64,
    pub confirmed_wall_max_distance_pct: f64,
    pub confirmed_wall_delay_sec: u64,
    pub liquidation_alert_usd: f64,
    pub liquidation_mega_usd: f64,
    pub mega_trade_multiplier: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            wall_threshold_usd: 500_000.0,
            large_trade_threshold_spot_usd: 100_000.0,
            large_trade_threshold_futures_usd: 500_000.0,
            wall_alert_usd: 2_000_000.0,
            wall_cancel_alert_usd: 1_000_000.0,
            confirmed_wall_threshold_usd: 5_000_000.0,
            confirmed_wall_max_distance_pct: 2.0,
            confirmed_wall_delay_sec: 60,
            liquidation_alert_usd: 250_000.0,
            liquidation_mega_usd: 1_000_000.0,
            mega_trade_multiplier: 10.0,
        }
    }
}

/// Top-level process configuration, loaded once in `main`.
#[derive(Clone)]
pub struct Config {
    /// Sink auth token. Never logged or included in `Debug` output.
    pub sink_token: String,
    /// Bearer token guarding the read-only status surface (§4.11). Never
    /// logged or included in `Debug` output.
    pub status_token: String,
    /// Fallback channel for alerts with no more specific topic.
    pub admin_user: String,
    /// Channel namespace the router resolves topic keys against.
    pub forum_group: String,
    /// Optional HTTP/SOCKS5 proxy for exchange connectivity.
    pub proxy_url: Option<String>,
    /// Bind address for the read-only status surface (§4.11).
    pub bind_addr: String,
    pub thresholds: Thresholds,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// `.env` is loaded first (if present) so local development does not
    /// require exporting variables manually; real deployments rely on the
    /// environment alone.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv();

        let thresholds = Thresholds {
            wall_threshold_usd: env_f64("WALL_THRESHOLD_USD", Thresholds::default().wall_threshold_usd),
            large_trade_threshold_spot_usd: env_f64(
                "LARGE_TRADE_THRESHOLD_USD",
                Thresholds::default().large_trade_threshold_spot_usd,
            ),
            large_trade_threshold_futures_usd: env_f64(
                "LARGE_TRADE_THRESHOLD_FUTURES_USD",
                Thresholds::default().large_trade_threshold_futures_usd,
            ),
            wall_alert_usd: env_f64("WALL_ALERT_USD", Thresholds::default().wall_alert_usd),
            wall_cancel_alert_usd: env_f64(
                "WALL_CANCEL_ALERT_USD",
                Thresholds::default().wall_cancel_alert_usd,
            ),
            confirmed_wall_threshold_usd: env_f64(
                "CONFIRMED_WALL_THRESHOLD_USD",
                Thresholds::default().confirmed_wall_threshold_usd,
            ),
            confirmed_wall_max_distance_pct: env_f64(
                "CONFIRMED_WALL_MAX_DISTANCE_PCT",
                Thresholds::default().confirmed_wall_max_distance_pct,
            ),
            confirmed_wall_delay_sec: env_u64(
                "CONFIRMED_WALL_DELAY_SEC",
                Thresholds::default().confirmed_wall_delay_sec,
            ),
            liquidation_alert_usd: env_f64(
                "LIQUIDATION_ALERT_USD",
                Thresholds::default().liquidation_alert_usd,
            ),
            liquidation_mega_usd: env_f64(
                "LIQUIDATION_MEGA_USD",
                Thresholds::default().liquidation_mega_usd,
            ),
            mega_trade_multiplier: env_f64(
                "MEGA_TRADE_MULTIPLIER",
                Thresholds::default().mega_trade_multiplier,
            ),
        };

        Ok(Self {
            sink_token: required("SINK_TOKEN")?,
            status_token: required("STATUS_TOKEN")?,
            admin_user: required("ADMIN_USER")?,
            forum_group: required("FORUM_GROUP")?,
            proxy_url: std::env::var("PROXY_URL").ok(),
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8090".to_string()),
            thresholds,
        })
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("sink_token", &"<redacted>")
            .field("status_token", &"<redacted>")
            .field("admin_user", &self.admin_user)
            .field("forum_group", &self.forum_group)
            .field("proxy_url", &self.proxy_url)
            .field("bind_addr", &self.bind_addr)
            .field("thresholds", &self.thresholds)
            .finish()
    }
}
