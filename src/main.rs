// src/main.rs
use anyhow::{Context, Result};
use clap::Parser;
use hyper::header::CONTENT_TYPE;
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use roundrobin_lb::{
    config::{self, Config},
    health::HealthChecker,
    load_balancer::{LoadBalancer, RoundRobinBalancer},
    metrics::MetricsRegistry,
    proxy::{BackendPool, HttpForwarder, Proxy},
    server::{RequestHandler, ServerBuilder},
};

#[derive(Debug, Parser)]
#[command(name = "roundrobin-lb", about = "Round-robin HTTP load balancer")]
struct Args {
    /// Port to serve on [default: 8080, or listen_port from the config file]
    #[arg(short, long)]
    port: Option<u16>,

    /// YAML or JSON config file; built-in defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("roundrobin_lb=info".parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            config::load_config(path).await?
        }
        None => {
            let config = Config::default();
            config.validate().context("Invalid default configuration")?;
            config
        }
    };
    if let Some(port) = args.port {
        config.listen_port = port;
    }

    // Metrics are optional
    let metrics_registry = if config.metrics.enabled {
        Some(MetricsRegistry::new()?)
    } else {
        None
    };
    let metrics = metrics_registry.as_ref().map(|r| r.collector());

    let pool = BackendPool::new(&config.backends).context("Invalid backend configuration")?;

    // One eager sweep so traffic never sees unknown liveness
    let checker = Arc::new(HealthChecker::new(
        config.health_check.clone(),
        pool.clone(),
        metrics.clone(),
    ));
    let results = checker.sweep().await;
    for result in results.iter().filter(|r| !r.alive) {
        warn!("Service on {} is dead", result.url);
    }
    info!(
        "Initial health check: {}/{} backends alive",
        results.iter().filter(|r| r.alive).count(),
        results.len()
    );
    let health_task = checker.clone().start();

    if let Some(registry) = metrics_registry {
        let metrics_addr: SocketAddr = ([0, 0, 0, 0], config.metrics.port).into();
        start_metrics_server(metrics_addr, registry, config.metrics.path.clone())?;
    }

    let balancer: Arc<dyn LoadBalancer> = Arc::new(RoundRobinBalancer::new());
    info!("Load balancing algorithm: {}", balancer.name());

    let proxy = Arc::new(Proxy::new(
        pool,
        balancer,
        Arc::new(HttpForwarder::new()),
        metrics,
    ));
    let handler = RequestHandler::new(proxy);

    let addr: SocketAddr = ([0, 0, 0, 0], config.listen_port).into();
    info!("Load balancer started on port :{}", config.listen_port);

    ServerBuilder::new(addr)
        .with_handler(handler)
        .bind()
        .await?
        .serve_with_shutdown(shutdown_signal())
        .await?;

    checker.shutdown();
    if let Err(e) = health_task.await {
        error!("Health checker task failed: {}", e);
    }

    Ok(())
}

fn start_metrics_server(addr: SocketAddr, registry: MetricsRegistry, path: String) -> Result<()> {
    let registry = Arc::new(registry);
    let metrics_path = Arc::new(path); // keep this for logging
    let service_path = metrics_path.clone(); // clone for the service closure

    let make_service = hyper::service::make_service_fn(move |_| {
        let registry = registry.clone();
        let path = service_path.clone();

        async move {
            Ok::<_, Infallible>(hyper::service::service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                let path = path.clone();

                async move {
                    let response = if req.uri().path() == path.as_str() {
                        match registry.gather() {
                            Ok(metrics) => {
                                let mut response = Response::new(Body::from(metrics));
                                response.headers_mut().insert(
                                    CONTENT_TYPE,
                                    hyper::header::HeaderValue::from_static(
                                        "text/plain; version=0.0.4",
                                    ),
                                );
                                response
                            }
                            Err(e) => {
                                error!("Failed to encode metrics: {}", e);
                                status_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
                            }
                        }
                    } else {
                        status_response(StatusCode::NOT_FOUND, "Not Found")
                    };
                    Ok::<_, Infallible>(response)
                }
            }))
        }
    });

    let server = Server::try_bind(&addr)
        .with_context(|| format!("Failed to bind metrics listener {}", addr))?
        .serve(make_service);

    info!(
        "Metrics server listening on http://{}{}",
        addr,
        metrics_path.as_str()
    );

    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(())
}

fn status_response(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
}

// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
