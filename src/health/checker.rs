// src/health/checker.rs
use crate::config::HealthCheckConfig;
use crate::metrics::MetricsCollector;
use crate::proxy::{Backend, BackendPool};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, info, warn};
use url::Url;

pub struct HealthChecker {
    config: HealthCheckConfig,
    pool: BackendPool,
    metrics: Option<Arc<MetricsCollector>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub backend_id: String,
    pub url: Url,
    pub alive: bool,
    pub response_time_ms: u64,
}

impl HealthChecker {
    pub fn new(
        config: HealthCheckConfig,
        pool: BackendPool,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            pool,
            metrics,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Spawn the periodic loop on its own task.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Sweep every `interval` until shut down. The first sweep happens one full
    /// interval after the call; the eager startup sweep is the caller's job.
    pub async fn run(&self) {
        let period = self.config.interval();
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!("Starting health checker with interval: {:?}", period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let results = self.sweep().await;
                    let healthy = results.iter().filter(|r| r.alive).count();
                    let slowest_ms = results.iter().map(|r| r.response_time_ms).max().unwrap_or(0);
                    info!(
                        "Health check complete: {} healthy, {} unhealthy, slowest probe {}ms",
                        healthy,
                        results.len() - healthy,
                        slowest_ms
                    );
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Health checker shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Probe every backend once, in pool order, one at a time. Each backend's
    /// liveness is overwritten with its probe result.
    pub async fn sweep(&self) -> Vec<HealthCheckResult> {
        let mut results = Vec::with_capacity(self.pool.len());

        for backend in self.pool.all_backends() {
            results.push(self.check_backend(backend).await);
        }

        if let Some(metrics) = &self.metrics {
            metrics.update_backend_counts(self.pool.healthy_count(), self.pool.len());
        }

        results
    }

    async fn check_backend(&self, backend: &Arc<Backend>) -> HealthCheckResult {
        let start = Instant::now();
        let was_alive = backend.is_alive();

        let alive = backend.probe(self.config.timeout()).await;
        backend.set_alive(alive);

        let elapsed = start.elapsed();

        if let Some(metrics) = &self.metrics {
            metrics.update_backend_health(&backend.id, alive, elapsed);
        }

        match (was_alive, alive) {
            (false, true) => info!("Service on {} is doing well", backend.url),
            (true, false) => warn!("Service on {} is dead", backend.url),
            _ => debug!(backend = %backend.id, alive, "Health unchanged"),
        }

        HealthCheckResult {
            backend_id: backend.id.clone(),
            url: backend.url.clone(),
            alive,
            response_time_ms: elapsed.as_millis() as u64,
        }
    }
}
