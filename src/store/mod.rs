mod memory;
mod records;

pub use memory::InMemoryStore;
pub use records::{AlertLogRecord, LiquidationRecord, MinuteBucketRecord, TradeRecord, WallRecord, WallStatus};

use async_trait::async_trait;

use crate::error::SinkError;
use crate::types::{EpochMs, Market};

/// Idempotent, append-or-upsert persistence boundary (SPEC_FULL.md §4.8).
///
/// A relational implementation is assumed in production; this crate defines
/// only the contract plus an in-process reference implementation used by
/// tests and standalone runs.
#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_wall(&self, record: WallRecord) -> Result<(), SinkError>;
    async fn close_wall(
        &self,
        market: Market,
        side: crate::types::Side,
        price_str: &str,
        detected_at: EpochMs,
        reason: &str,
    ) -> Result<(), SinkError>;
    async fn open_walls(&self) -> Result<Vec<WallRecord>, SinkError>;

    async fn append_trade(&self, record: TradeRecord) -> Result<(), SinkError>;
    async fn append_liquidation(&self, record: LiquidationRecord) -> Result<(), SinkError>;
    async fn recent_trades(&self, market: Market, since: EpochMs, limit: usize) -> Result<Vec<TradeRecord>, SinkError>;
    async fn recent_liquidations(&self, since: EpochMs, limit: usize) -> Result<Vec<LiquidationRecord>, SinkError>;

    async fn upsert_minute_bucket(&self, record: MinuteBucketRecord) -> Result<(), SinkError>;
    async fn recent_minute_buckets(&self, market: Market, since: EpochMs) -> Result<Vec<MinuteBucketRecord>, SinkError>;

    async fn append_depth_snapshot(&self, market: Market, last_update_id: u64, taken_at: EpochMs) -> Result<(), SinkError>;

    async fn append_alert_log(&self, record: AlertLogRecord) -> Result<(), SinkError>;

    async fn get_notification_setting(&self, key: &str) -> Result<Option<String>, SinkError>;
    async fn set_notification_setting(&self, key: &str, value: &str) -> Result<(), SinkError>;
    async fn all_notification_settings(&self) -> Result<Vec<(String, String)>, SinkError>;
}
