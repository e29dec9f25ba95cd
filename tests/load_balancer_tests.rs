// tests/load_balancer_tests.rs
use async_trait::async_trait;
use hyper::{Body, Client, Request, Response, StatusCode};
use roundrobin_lb::load_balancer::{LoadBalancer, RoundRobinBalancer};
use roundrobin_lb::proxy::{Backend, BackendPool, Forwarder, HttpForwarder, Proxy, ProxyError};
use roundrobin_lb::server::{RequestHandler, ServerBuilder};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use url::Url;

fn backend(port: u16, alive: bool) -> Arc<Backend> {
    let url = Url::parse(&format!("http://127.0.0.1:{}", port)).unwrap();
    let backend = Backend::new(url).unwrap();
    backend.set_alive(alive);
    Arc::new(backend)
}

fn pool_of(alive: &[bool]) -> BackendPool {
    let backends = alive
        .iter()
        .enumerate()
        .map(|(i, &a)| backend(9001 + i as u16, a))
        .collect();
    BackendPool::from_backends(backends).unwrap()
}

fn pick(balancer: &RoundRobinBalancer, pool: &BackendPool) -> Option<String> {
    balancer
        .select_backend(pool.all_backends())
        .map(|b| b.id.clone())
}

fn id(i: usize) -> String {
    format!("127.0.0.1:{}", 9001 + i)
}

/// Answers every request with the chosen backend's id and remembers the call.
#[derive(Default)]
struct RecordingForwarder {
    calls: Mutex<Vec<String>>,
}

impl RecordingForwarder {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Forwarder for RecordingForwarder {
    async fn forward(
        &self,
        backend: &Backend,
        _req: Request<Body>,
        _client_addr: Option<SocketAddr>,
    ) -> Result<Response<Body>, ProxyError> {
        self.calls.lock().unwrap().push(backend.id.clone());
        Ok(Response::new(Body::from(backend.id.clone())))
    }
}

fn proxy_with(pool: BackendPool, forwarder: Arc<dyn Forwarder>) -> Proxy {
    Proxy::new(pool, Arc::new(RoundRobinBalancer::new()), forwarder, None)
}

async fn body_string(response: Response<Body>) -> String {
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[test]
fn test_round_robin_distribution() {
    for n in 1..=6 {
        let pool = pool_of(&vec![true; n]);
        let balancer = RoundRobinBalancer::new();

        let picks: Vec<_> = (0..n).map(|_| pick(&balancer, &pool).unwrap()).collect();
        let expected: Vec<_> = (0..n).map(id).collect();
        assert_eq!(picks, expected, "pool of {}", n);
    }
}

#[test]
fn round_robin_keeps_cycling_after_a_full_turn() {
    let pool = pool_of(&[true, true, true]);
    let balancer = RoundRobinBalancer::starting_at(2);

    let picks: Vec<_> = (0..4).map(|_| pick(&balancer, &pool).unwrap()).collect();
    assert_eq!(picks, vec![id(2), id(0), id(1), id(2)]);
}

#[test]
fn dead_backend_is_never_selected() {
    let pool = pool_of(&[true, true, false, true]);
    let balancer = RoundRobinBalancer::new();

    let picks: Vec<_> = (0..40).map(|_| pick(&balancer, &pool).unwrap()).collect();
    assert!(!picks.contains(&id(2)));

    // The remaining backends still appear in their cyclic order.
    let order = [id(0), id(1), id(3)];
    for pair in picks.windows(2) {
        let a = order.iter().position(|x| *x == pair[0]).unwrap();
        let b = order.iter().position(|x| *x == pair[1]).unwrap();
        assert!(b == a || b == (a + 1) % order.len(), "{:?}", pair);
    }
}

#[test]
fn skip_dead_scenario_from_counter_zero() {
    // [A(alive), B(dead), C(alive)]: starts 0, 1, 2 land on A, C (B skipped), C.
    // The ticket is the value *before* the increment, so a fresh balancer starts at
    // index 0. Using the post-increment value (first request to index 1) would give
    // C, C, A instead; neither ordering produces A, C, A with a step-by-one counter.
    let pool = pool_of(&[true, false, true]);
    let balancer = RoundRobinBalancer::new();

    let picks: Vec<_> = (0..4).map(|_| pick(&balancer, &pool).unwrap()).collect();
    assert_eq!(picks, vec![id(0), id(2), id(2), id(0)]);
    assert_eq!(balancer.counter(), 4);
}

#[test]
fn round_robin_reports_its_name() {
    let balancer: Arc<dyn LoadBalancer> = Arc::new(RoundRobinBalancer::new());
    assert_eq!(balancer.name(), "round_robin");
}

#[test]
fn all_dead_yields_none_every_time() {
    let pool = pool_of(&[false, false, false]);
    let balancer = RoundRobinBalancer::new();

    for _ in 0..10 {
        assert!(pick(&balancer, &pool).is_none());
    }
}

#[test]
fn single_backend_pool() {
    let pool = pool_of(&[true]);
    let balancer = RoundRobinBalancer::new();
    for _ in 0..3 {
        assert_eq!(pick(&balancer, &pool), Some(id(0)));
    }

    pool.all_backends()[0].set_alive(false);
    assert_eq!(pick(&balancer, &pool), None);
}

#[test]
fn counter_wraps_without_panicking() {
    let pool = pool_of(&[true, true, true]);
    let balancer = RoundRobinBalancer::starting_at(usize::MAX);

    assert_eq!(pick(&balancer, &pool), Some(id(usize::MAX % 3)));
    assert_eq!(balancer.counter(), 0);
    assert_eq!(pick(&balancer, &pool), Some(id(0)));
}

#[test]
fn empty_pool_is_rejected() {
    assert!(BackendPool::from_backends(Vec::new()).is_err());
    assert!(BackendPool::new(&[]).is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_selection_loses_no_increments() {
    const N: usize = 4;
    const ROUNDS: usize = 50;

    let pool = pool_of(&[true; N]);
    let balancer = Arc::new(RoundRobinBalancer::new());

    let tasks: Vec<_> = (0..N * ROUNDS)
        .map(|_| {
            let pool = pool.clone();
            let balancer = balancer.clone();
            tokio::spawn(async move { pick(&balancer, &pool).unwrap() })
        })
        .collect();

    let mut counts = vec![0usize; N];
    for task in tasks {
        let chosen = task.await.unwrap();
        let idx = (0..N).position(|i| id(i) == chosen).unwrap();
        counts[idx] += 1;
    }

    assert_eq!(balancer.counter(), N * ROUNDS);
    // Distinct tickets cover every start position equally.
    assert_eq!(counts, vec![ROUNDS; N]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_liveness_writes_keep_the_last_value() {
    let b = backend(9001, false);

    let writers: Vec<_> = (0..64)
        .map(|i| {
            let b = b.clone();
            tokio::spawn(async move {
                for _ in 0..100 {
                    b.set_alive(i % 2 == 0);
                    let _ = b.is_alive();
                }
            })
        })
        .collect();
    for w in writers {
        w.await.unwrap();
    }

    b.set_alive(true);
    assert!(b.is_alive());
    b.set_alive(false);
    assert!(!b.is_alive());
}

#[tokio::test]
async fn dispatcher_returns_503_without_forwarding_when_all_dead() {
    let forwarder = Arc::new(RecordingForwarder::default());
    let proxy = proxy_with(pool_of(&[false, false]), forwarder.clone());

    for _ in 0..3 {
        let response = proxy.handle(Request::new(Body::empty()), None).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_string(response).await, "Service Unavailable\n");
    }
    assert!(forwarder.calls().is_empty());
}

#[tokio::test]
async fn dispatcher_forwards_in_round_robin_order() {
    let forwarder = Arc::new(RecordingForwarder::default());
    let proxy = proxy_with(pool_of(&[true, false, true]), forwarder.clone());

    for _ in 0..3 {
        let response = proxy.handle(Request::new(Body::empty()), None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(forwarder.calls(), vec![id(0), id(2), id(2)]);

    let metrics = proxy.pool().all_backends()[2].get_metrics();
    assert_eq!(metrics.total_requests, 2);
    assert_eq!(metrics.failed_requests, 0);
}

#[tokio::test]
async fn transport_failure_becomes_503() {
    // Alive according to liveness, but nothing is listening any more.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let pool = BackendPool::from_backends(vec![backend(port, true)]).unwrap();
    let proxy = proxy_with(pool, Arc::new(HttpForwarder::new()));

    let response = proxy.handle(Request::new(Body::empty()), None).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let metrics = proxy.pool().all_backends()[0].get_metrics();
    assert_eq!(metrics.failed_requests, 1);
}

#[tokio::test]
async fn forwards_path_query_and_method_to_backend() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/orders/42")
        .match_query(mockito::Matcher::UrlEncoded("expand".into(), "items".into()))
        .match_header("x-forwarded-for", "10.1.2.3")
        .match_body("payload")
        .with_status(201)
        .with_body("created")
        .create_async()
        .await;

    let url = Url::parse(&server.url()).unwrap();
    let b = Arc::new(Backend::new(url).unwrap());
    b.set_alive(true);
    let pool = BackendPool::from_backends(vec![b]).unwrap();
    let proxy = proxy_with(pool, Arc::new(HttpForwarder::new()));

    let req = Request::builder()
        .method("POST")
        .uri("/orders/42?expand=items")
        .body(Body::from("payload"))
        .unwrap();
    let response = proxy.handle(req, Some("10.1.2.3:5555".parse().unwrap())).await;

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_string(response).await, "created");
    mock.assert_async().await;
}

#[tokio::test]
async fn server_answers_503_end_to_end_when_pool_is_dead() {
    let forwarder = Arc::new(RecordingForwarder::default());
    let proxy = Arc::new(proxy_with(pool_of(&[false, false]), forwarder.clone()));

    let server = ServerBuilder::new("127.0.0.1:0".parse().unwrap())
        .with_handler(RequestHandler::new(proxy))
        .bind()
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let serving = tokio::spawn(server.serve_with_shutdown(async {
        let _ = stop_rx.await;
    }));

    let uri: hyper::Uri = format!("http://{}/anything", addr).parse().unwrap();
    let response = Client::new().get(uri).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(forwarder.calls().is_empty());

    stop_tx.send(()).unwrap();
    serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn bind_failure_is_reported() {
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = taken.local_addr().unwrap();

    let proxy = Arc::new(proxy_with(
        pool_of(&[true]),
        Arc::new(RecordingForwarder::default()),
    ));
    let result = ServerBuilder::new(addr)
        .with_handler(RequestHandler::new(proxy))
        .bind()
        .await;

    assert!(result.is_err());
}
