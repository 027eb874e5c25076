//! # proxy-session-pool
//!
//! A pool of upstream forwarding proxies with session-aware allocation.
//!
//! The pool keeps every known proxy and the subset currently reachable,
//! re-verifies reachability with periodic concurrent sweeps, and hands out
//! proxies so that a session never gets the same proxy twice while others are
//! available and load spreads round-robin across the active set. State is
//! persisted to a pair of plain text proxy lists. An optional reqwest
//! middleware routes requests through the pool.

pub mod allocator;
pub mod config;
pub mod error;
pub mod middleware;
pub mod pool;
pub mod prober;
pub mod proxy;
pub mod registry;
pub mod scanner;
pub mod store;
mod utils;

pub use allocator::SessionKey;
pub use config::{ProxyPoolConfig, ProxyPoolConfigBuilder};
pub use error::{Error, Result};
pub use middleware::{ProxyPoolMiddleware, SessionId};
pub use pool::ProxyPool;
pub use proxy::{Proxy, ProxyRecord, ProxyStatus};
pub use scanner::SweepReport;
