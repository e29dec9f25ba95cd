// ────────────────────────────────
// src/proxy/proxy.rs
// Request entry point: pick a backend and hand the request to the forwarder
// ────────────────────────────────

use super::forward::Forwarder;
use super::pool::BackendPool;
use crate::load_balancer::LoadBalancer;
use crate::metrics::MetricsCollector;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Request, Response, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

const X_REQUEST_ID: &str = "x-request-id";

pub struct Proxy {
    pool: BackendPool,
    balancer: Arc<dyn LoadBalancer>,
    forwarder: Arc<dyn Forwarder>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Proxy {
    pub fn new(
        pool: BackendPool,
        balancer: Arc<dyn LoadBalancer>,
        forwarder: Arc<dyn Forwarder>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        Self {
            pool,
            balancer,
            forwarder,
            metrics,
        }
    }

    pub fn pool(&self) -> &BackendPool {
        &self.pool
    }

    /// Never fails: every error is turned into a 503 for the client.
    pub async fn handle(
        &self,
        mut req: Request<Body>,
        client_addr: Option<SocketAddr>,
    ) -> Response<Body> {
        let request_id = ensure_request_id(&mut req);
        let span = tracing::info_span!(
            "request",
            id = %request_id,
            method = %req.method(),
            path = %req.uri().path(),
        );

        async move {
            let start = Instant::now();
            let method = req.method().clone();

            let (backend_id, response) = match self.dispatch(req, client_addr).await {
                Ok((backend_id, response)) => (backend_id, response),
                Err((backend_id, err)) => {
                    tracing::error!(backend = %backend_id, error = %err, "Error response from proxy");
                    (backend_id, Response::from(err))
                }
            };

            if let Some(metrics) = &self.metrics {
                metrics.record_request(
                    method.as_str(),
                    response.status().as_u16(),
                    &backend_id,
                    start.elapsed(),
                );
            }
            response
        }
        .instrument(span)
        .await
    }

    async fn dispatch(
        &self,
        req: Request<Body>,
        client_addr: Option<SocketAddr>,
    ) -> Result<(String, Response<Body>), (String, ProxyError)> {
        let backend = self
            .balancer
            .select_backend(self.pool.all_backends())
            .ok_or_else(|| ("none".to_string(), ProxyError::NoHealthyBackends))?;

        tracing::debug!(backend = %backend.id, "forwarding");
        let result = self.forwarder.forward(&backend, req, client_addr).await;
        backend.record_request(result.is_ok());

        match result {
            Ok(response) => Ok((backend.id.clone(), response)),
            Err(err) => Err((backend.id.clone(), err)),
        }
    }
}

fn ensure_request_id(req: &mut Request<Body>) -> String {
    if let Some(id) = req.headers().get(X_REQUEST_ID).and_then(|v| v.to_str().ok()) {
        return id.to_string();
    }

    let id = uuid::Uuid::new_v4().to_string();
    if let Ok(value) = HeaderValue::from_str(&id) {
        req.headers_mut().insert(X_REQUEST_ID, value);
    }
    id
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Service Unavailable")]
    NoHealthyBackends,

    #[error("invalid upstream uri: {0}")]
    InvalidUri(String),

    #[error("{0}")]
    Upstream(#[from] hyper::Error),
}

// Every proxy failure surfaces to the client as 503 with the error text.
impl From<ProxyError> for Response<Body> {
    fn from(err: ProxyError) -> Self {
        let mut response = Response::new(Body::from(format!("{}\n", err)));
        *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }
}
