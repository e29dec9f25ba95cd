// src/config/models.rs
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one backend must be configured")]
    NoBackends,

    #[error("backend url {0} must use the http scheme")]
    UnsupportedScheme(Url),

    #[error("backend url {0} has no host")]
    MissingHost(Url),

    #[error("backend url {0} has no port and no known default")]
    MissingPort(Url),

    #[error("health check {0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("metrics path {0:?} must start with '/'")]
    InvalidMetricsPath(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_port: u16,
    pub backends: Vec<BackendConfig>,
    pub health_check: HealthCheckConfig,
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        let backends = (8081..=8089)
            .filter_map(|port| Url::parse(&format!("http://localhost:{port}")).ok())
            .map(|url| BackendConfig { url })
            .collect();

        Self {
            listen_port: 8080,
            backends,
            health_check: HealthCheckConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }

        for backend in &self.backends {
            backend.validate()?;
        }

        if self.health_check.interval_secs == 0 {
            return Err(ConfigError::ZeroDuration("interval"));
        }
        if self.health_check.timeout_secs == 0 {
            return Err(ConfigError::ZeroDuration("timeout"));
        }

        if !self.metrics.path.starts_with('/') {
            return Err(ConfigError::InvalidMetricsPath(self.metrics.path.clone()));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub url: Url,
}

impl BackendConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.scheme() != "http" {
            return Err(ConfigError::UnsupportedScheme(self.url.clone()));
        }
        if self.url.host_str().is_none() {
            return Err(ConfigError::MissingHost(self.url.clone()));
        }
        if self.url.port_or_known_default().is_none() {
            return Err(ConfigError::MissingPort(self.url.clone()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            timeout_secs: 5,
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
            path: "/metrics".to_string(),
        }
    }
}
