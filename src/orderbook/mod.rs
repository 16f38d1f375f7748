mod book;
mod wire;

pub use book::{GoneReason, OrderBook, OrderBookSnapshot, WallEvent};
pub use wire::{DepthDiff, DepthSnapshot};
