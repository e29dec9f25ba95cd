// src/proxy/mod.rs
mod backend;
mod forward;
mod pool;
mod proxy;

pub use backend::{Backend, BackendMetrics};
pub use forward::{target_uri, Forwarder, HttpForwarder};
pub use pool::BackendPool;
pub use proxy::{Proxy, ProxyError};
