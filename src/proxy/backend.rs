// src/proxy/backend.rs
use crate::config::{BackendConfig, ConfigError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use url::Url;

/// One downstream server.
///
/// Liveness is a per-backend atomic, so probing or reading one backend never
/// contends with another. Backends start out dead until the first sweep.
#[derive(Debug)]
pub struct Backend {
    pub id: String,
    pub url: Url,

    // host:port used for probes and as the upstream authority
    address: String,

    // Runtime state
    alive: AtomicBool,
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
}

impl Backend {
    pub fn new(url: Url) -> Result<Self, ConfigError> {
        let host = url
            .host_str()
            .ok_or_else(|| ConfigError::MissingHost(url.clone()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| ConfigError::MissingPort(url.clone()))?;
        let address = format!("{}:{}", host, port);

        Ok(Self {
            id: address.clone(),
            url,
            address,
            alive: AtomicBool::new(false),
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
        })
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Self::new(config.url.clone())
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    /// Bare TCP reachability check. The connection is dropped as soon as it is
    /// established; a failed connect marks the backend dead immediately.
    pub async fn probe(&self, probe_timeout: Duration) -> bool {
        match timeout(probe_timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                tracing::debug!(backend = %self.id, error = %e, "site unreachable");
                self.set_alive(false);
                false
            }
            Err(_) => {
                tracing::debug!(
                    backend = %self.id,
                    timeout = ?probe_timeout,
                    "site unreachable: connect timed out"
                );
                self.set_alive(false);
                false
            }
        }
    }

    pub fn record_request(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get_metrics(&self) -> BackendMetrics {
        BackendMetrics {
            alive: self.is_alive(),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendMetrics {
    pub alive: bool,
    pub total_requests: u64,
    pub failed_requests: u64,
}
