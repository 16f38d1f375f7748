mod manager;
mod wire;

pub use manager::{StreamDeps, StreamKind, WSManager};
