// src/proxy/forward.rs
// Reverse-proxy capability: rewrite a request for one backend and send it.

use super::backend::Backend;
use super::proxy::ProxyError;
use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::Uri;
use hyper::{Body, Client, Request, Response};
use std::net::SocketAddr;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

// RFC 7230 section 6.1, plus the non-standard Proxy-Connection.
const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(
        &self,
        backend: &Backend,
        req: Request<Body>,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response<Body>, ProxyError>;
}

/// Forwards over plain HTTP/1.1 with hyper's pooled client.
#[derive(Clone)]
pub struct HttpForwarder {
    client: Client<HttpConnector, Body>,
}

impl HttpForwarder {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for HttpForwarder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(
        &self,
        backend: &Backend,
        mut req: Request<Body>,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response<Body>, ProxyError> {
        *req.uri_mut() = target_uri(backend, req.uri())?;
        remove_hop_by_hop_headers(req.headers_mut());
        if let Some(addr) = client_addr {
            append_forwarded_for(req.headers_mut(), addr);
        }

        let mut response = self.client.request(req).await?;
        remove_hop_by_hop_headers(response.headers_mut());
        Ok(response)
    }
}

/// Upstream URI: the backend's scheme and authority, the backend base path joined
/// with the request path, and both query strings.
pub fn target_uri(backend: &Backend, uri: &Uri) -> Result<Uri, ProxyError> {
    let base = &backend.url;
    let path = single_joining_slash(base.path(), uri.path());

    let base_query = base.query().unwrap_or("");
    let req_query = uri.query().unwrap_or("");
    let query = if base_query.is_empty() || req_query.is_empty() {
        format!("{}{}", base_query, req_query)
    } else {
        format!("{}&{}", base_query, req_query)
    };

    let path_and_query = if query.is_empty() {
        path
    } else {
        format!("{}?{}", path, query)
    };
    Uri::builder()
        .scheme(base.scheme())
        .authority(backend.address())
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| ProxyError::InvalidUri(e.to_string()))
}

fn single_joining_slash(a: &str, b: &str) -> String {
    match (a.ends_with('/'), b.starts_with('/')) {
        (true, true) => format!("{}{}", a, &b[1..]),
        (false, false) => format!("{}/{}", a, b),
        _ => format!("{}{}", a, b),
    }
}

fn remove_hop_by_hop_headers(headers: &mut HeaderMap) {
    // Headers named in Connection are hop-by-hop too.
    let listed: Vec<HeaderName> = headers
        .get_all(hyper::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, addr: SocketAddr) {
    let ip = addr.ip().to_string();
    let value = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{}, {}", prior, ip),
        None => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}
