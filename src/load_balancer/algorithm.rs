// src/load_balancer/algorithm.rs
use crate::proxy::Backend;
use std::sync::Arc;

pub trait LoadBalancer: Send + Sync {
    /// Pick the backend for the next request, or `None` when no backend is usable.
    fn select_backend(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>>;

    fn name(&self) -> &'static str;
}
