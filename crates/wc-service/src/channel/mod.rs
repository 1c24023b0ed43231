//! Channel tracking and lifecycle handling

mod lifecycle;
mod pool;

pub use lifecycle::SessionLifecycle;
pub use pool::{ChannelPool, PoolEntry};
