mod client;
mod rate_limit;

pub use client::BinanceClient;
pub use rate_limit::{RateLimitSnapshot, RateLimitTracker};
