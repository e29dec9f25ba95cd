// ────────────────────────────────
// src/server/builder.rs
// ────────────────────────────────
use crate::server::handler::RequestHandler;
use crate::server::listener::bind_tcp;
use anyhow::{anyhow, Result};
use hyper::server::conn::Http;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Builder pattern so `main.rs` can inject its request handler.
pub struct ServerBuilder {
    addr: SocketAddr,
    handler: Option<RequestHandler>,
}

impl ServerBuilder {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, handler: None }
    }

    pub fn with_handler(mut self, handler: RequestHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Bind the listening socket. A bind failure is returned to the caller.
    pub async fn bind(self) -> Result<Server> {
        let handler = self
            .handler
            .ok_or_else(|| anyhow!("handler must be set via with_handler()"))?;
        let listener = bind_tcp(self.addr).await?;

        Ok(Server { listener, handler })
    }
}

pub struct Server {
    listener: TcpListener,
    handler: RequestHandler,
}

impl Server {
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `signal` resolves, one Tokio task per connection.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!("Load balancer listening on {}", self.local_addr()?);
        tokio::pin!(signal);

        loop {
            let (stream, peer) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(err) => {
                        // Per-connection accept errors (e.g. EMFILE) are not fatal.
                        tracing::warn!(%err, "accept failed");
                        continue;
                    }
                },
                _ = &mut signal => {
                    tracing::info!("Server stopped accepting connections");
                    return Ok(());
                }
            };

            let svc = self.handler.for_peer(peer);
            tokio::spawn(async move {
                if let Err(err) = Http::new().serve_connection(stream, svc).await {
                    tracing::warn!(%peer, %err, "connection error");
                }
            });
        }
    }
}
