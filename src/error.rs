// =============================================================================
// Error taxonomy — component-local error classes and their recovery meaning
// =============================================================================
//
// Each class maps to exactly one recovery behaviour (see SPEC_FULL.md §7):
//   SequencingViolation -> SnapshotCoordinator re-anchors the affected book.
//   TransientIo          -> retried with backoff by the caller.
//   PermanentIo          -> logged, counted, caller decides whether to drop.
//   Invariant            -> logged, component resets its own state.
//   FatalConfig          -> aborts the process, startup only.
//
// No error type here propagates across component boundaries; every component
// catches its own class and recovers locally, per the propagation rule.
// =============================================================================

use thiserror::Error;

/// Errors raised while applying or sequencing order-book diffs.
#[derive(Debug, Error)]
pub enum BookError {
    #[error("sequencing violation: {0}")]
    SequencingViolation(String),

    #[error("invariant violated: {0}")]
    Invariant(String),
}

/// Errors raised by WebSocket stream handling.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("transient I/O: {0}")]
    TransientIo(String),

    #[error("permanent I/O: {0}")]
    PermanentIo(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

/// Errors raised by REST snapshot fetches.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("transient I/O: {0}")]
    TransientIo(String),

    #[error("permanent I/O: {0}")]
    PermanentIo(String),
}

/// Errors raised while delivering an alert to the external sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("transient: {0}")]
    Transient(String),

    #[error("permanent: {0}")]
    Permanent(String),
}

/// Configuration errors. Always fatal at startup; never recovered from.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(String),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}
