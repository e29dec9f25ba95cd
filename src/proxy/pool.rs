// src/proxy/pool.rs
use super::backend::Backend;
use crate::config::{BackendConfig, ConfigError};
use std::sync::Arc;

/// Ordered, non-empty set of backends fixed at startup.
///
/// The order defines the round-robin sequence. Nothing is ever added, removed or
/// reordered after construction, so the pool itself needs no lock.
#[derive(Debug, Clone)]
pub struct BackendPool {
    backends: Arc<[Arc<Backend>]>,
}

impl BackendPool {
    pub fn new(configs: &[BackendConfig]) -> Result<Self, ConfigError> {
        let backends = configs
            .iter()
            .map(|config| Backend::from_config(config).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_backends(backends)
    }

    pub fn from_backends(backends: Vec<Arc<Backend>>) -> Result<Self, ConfigError> {
        if backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }

        for backend in &backends {
            tracing::info!(backend = %backend.url, "Configured backend");
        }

        Ok(Self {
            backends: backends.into(),
        })
    }

    pub fn all_backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// A constructed pool is never empty.
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn healthy_count(&self) -> usize {
        self.backends.iter().filter(|b| b.is_alive()).count()
    }
}
