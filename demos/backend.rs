//! demos/backend.rs
//! Run: cargo run --bin backend -- --port 8081

use clap::Parser;
use hyper::{
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server,
};
use rand::Rng;
use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::sleep;

#[derive(Debug, Parser)]
#[command(name = "backend", about = "Trivial HTTP backend for trying out the load balancer")]
struct Args {
    /// Port to serve on
    #[arg(short, long, default_value_t = 8081)]
    port: u16,

    /// Fixed delay added to every response
    #[arg(long, env = "BASE_DELAY_MS", default_value_t = 0)]
    base_delay_ms: u64,

    /// Random extra delay, uniformly drawn from 0..=JITTER_MS
    #[arg(long, env = "JITTER_MS", default_value_t = 0)]
    jitter_ms: u64,
}

#[derive(Clone)]
struct BackendState {
    port: u16,
    hostname: Arc<str>,
    req_counter: Arc<AtomicU64>,
    base_delay: u64,
    jitter_ms: u64,
}

async fn handle(req: Request<Body>, state: BackendState) -> Result<Response<Body>, Infallible> {
    let n = state.req_counter.fetch_add(1, Ordering::Relaxed) + 1;
    tracing::debug!(request = n, path = %req.uri().path(), "serving");

    let delay = state.base_delay + rand::thread_rng().gen_range(0..=state.jitter_ms);
    if delay > 0 {
        sleep(Duration::from_millis(delay)).await;
    }

    let body = format!(
        "Backend server on port {}, host: {}, Request path: {}\n",
        state.port,
        state.hostname,
        req.uri().path()
    );
    Ok(Response::new(Body::from(body)))
}

fn hostname() -> String {
    gethostname::gethostname()
        .into_string()
        .ok()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let hostname = hostname();

    let state = BackendState {
        port: args.port,
        hostname: hostname.into(),
        req_counter: Arc::new(AtomicU64::new(0)),
        base_delay: args.base_delay_ms,
        jitter_ms: args.jitter_ms,
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let make_svc = make_service_fn(move |_conn| {
        let st = state.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| handle(req, st.clone()))) }
    });

    tracing::info!("Backend started at :{}", args.port);
    Server::try_bind(&addr)?.serve(make_svc).await?;
    Ok(())
}
