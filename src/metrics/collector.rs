// src/metrics/collector.rs
use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn gather(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

pub struct MetricsCollector {
    // Request metrics
    pub requests_total: IntCounterVec,
    pub request_duration_seconds: HistogramVec,

    // Backend metrics
    pub backend_health_status: IntGaugeVec,
    pub probe_duration_seconds: HistogramVec,

    // Pool metrics
    pub healthy_backends: IntGauge,
    pub total_backends: IntGauge,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let requests_total = IntCounterVec::new(
            Opts::new("lb_requests_total", "Total number of requests"),
            &["method", "status_code", "backend"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "lb_request_duration_seconds",
                "Request duration in seconds",
            ),
            &["method", "status_code", "backend"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        let backend_health_status = IntGaugeVec::new(
            Opts::new(
                "lb_backend_health_status",
                "Backend health status (1=alive, 0=dead)",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(backend_health_status.clone()))?;

        let probe_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "lb_probe_duration_seconds",
                "TCP health probe duration in seconds",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(probe_duration_seconds.clone()))?;

        let healthy_backends =
            IntGauge::new("lb_healthy_backends", "Number of healthy backends")?;
        registry.register(Box::new(healthy_backends.clone()))?;

        let total_backends =
            IntGauge::new("lb_total_backends", "Total number of backends")?;
        registry.register(Box::new(total_backends.clone()))?;

        Ok(Self {
            requests_total,
            request_duration_seconds,
            backend_health_status,
            probe_duration_seconds,
            healthy_backends,
            total_backends,
        })
    }

    pub fn record_request(
        &self,
        method: &str,
        status_code: u16,
        backend: &str,
        duration: Duration,
    ) {
        let status = status_code.to_string();
        self.requests_total
            .with_label_values(&[method, &status, backend])
            .inc();

        self.request_duration_seconds
            .with_label_values(&[method, &status, backend])
            .observe(duration.as_secs_f64());
    }

    pub fn update_backend_health(&self, backend: &str, alive: bool, probe_duration: Duration) {
        let value = if alive { 1 } else { 0 };
        self.backend_health_status
            .with_label_values(&[backend])
            .set(value);

        self.probe_duration_seconds
            .with_label_values(&[backend])
            .observe(probe_duration.as_secs_f64());
    }

    pub fn update_backend_counts(&self, healthy: usize, total: usize) {
        self.healthy_backends.set(healthy as i64);
        self.total_backends.set(total as i64);
    }
}
