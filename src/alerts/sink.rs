// =============================================================================
// AlertSink — outbound messaging boundary (SPEC_FULL.md §6B)
// =============================================================================
//
// The real chat-platform client lives outside this crate; only the trait it
// must implement is specified here, plus a logging reference implementation
// used for tests and for running the pipeline without external credentials.
// =============================================================================

use async_trait::async_trait;
use tracing::info;

use super::kinds::ParseMode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkOutcome {
    Sent,
    Transient(String),
    Permanent(String),
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, channel: &str, text: &str, parse_mode: ParseMode) -> SinkOutcome;
}

/// Logs the message instead of calling a real chat API. Satisfies
/// `AlertSink` for tests and for running the system without a configured
/// messaging backend.
#[derive(Debug, Default)]
pub struct LoggingSink;

#[async_trait]
impl AlertSink for LoggingSink {
    async fn send(&self, channel: &str, text: &str, parse_mode: ParseMode) -> SinkOutcome {
        info!(channel, ?parse_mode, text, "alert sink delivery (logging sink)");
        SinkOutcome::Sent
    }
}
