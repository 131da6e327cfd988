//! Shared doubles and mock origins for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, StatusCode, Version};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Barrier;
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::Registry;

use backend_director::backend::Backend;
use backend_director::config::{BackendConfig, ProbeConfig};
use backend_director::fetch::{BodyFraming, FetchError, Fetcher, HeaderFetch, RequestHead, ResponseHead, Transport};
use backend_director::health::HealthProbe;
use backend_director::observability::events::EVENT_TARGET;
use backend_director::net::{Connection, ConnectionPool, PoolError, PoolFactory};
use backend_director::resilience::timeouts::Timeouts;
use backend_director::{Admin, BackendDirector, Services};

// --- Pool ---

/// Pool handing out in-memory connections and counting every call.
#[derive(Debug)]
pub struct ScriptedPool {
    addr: SocketAddr,
    idle: Mutex<VecDeque<Connection>>,
    peers: Mutex<Vec<DuplexStream>>,
    gate: Option<Arc<Barrier>>,
    fail: AtomicBool,
    pub obtains: AtomicUsize,
    pub recycles: AtomicUsize,
    pub closes: AtomicUsize,
}

impl ScriptedPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(None))
    }

    /// Every `obtain` waits on `gate` before returning.
    pub fn gated(gate: Arc<Barrier>) -> Arc<Self> {
        Arc::new(Self::build(Some(gate)))
    }

    fn build(gate: Option<Arc<Barrier>>) -> Self {
        Self {
            addr: "127.0.0.1:8080".parse().unwrap(),
            idle: Mutex::new(VecDeque::new()),
            peers: Mutex::new(Vec::new()),
            gate,
            fail: AtomicBool::new(false),
            obtains: AtomicUsize::new(0),
            recycles: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    /// Park `n` connections so the next obtains return recycled ones.
    pub fn preload_idle(&self, n: usize) {
        for _ in 0..n {
            let conn = self.dial();
            self.idle.lock().unwrap().push_back(conn);
        }
    }

    pub fn fail_connects(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn obtains(&self) -> usize {
        self.obtains.load(Ordering::SeqCst)
    }

    pub fn recycles(&self) -> usize {
        self.recycles.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn dial(&self) -> Connection {
        let (near, far) = tokio::io::duplex(4096);
        self.peers.lock().unwrap().push(far);
        Connection::new(self.addr, Box::new(near))
    }
}

#[async_trait]
impl ConnectionPool for ScriptedPool {
    async fn obtain(&self, timeout: Duration) -> Result<Connection, PoolError> {
        self.obtains.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.wait().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(PoolError::Timeout {
                addr: self.addr,
                timeout,
            });
        }
        let recycled = self.idle.lock().unwrap().pop_front();
        Ok(match recycled {
            Some(mut conn) => {
                conn.set_recycled(true);
                conn
            }
            None => self.dial(),
        })
    }

    fn recycle(&self, mut conn: Connection) {
        self.recycles.fetch_add(1, Ordering::SeqCst);
        conn.set_recycled(false);
        self.idle.lock().unwrap().push_back(conn);
    }

    fn close(&self, conn: Connection) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        drop(conn);
    }

    fn idle_count(&self) -> usize {
        self.idle.lock().unwrap().len()
    }
}

/// Hands the same scripted pool to every backend.
#[derive(Debug)]
pub struct SharedPool(pub Arc<ScriptedPool>);

impl PoolFactory for SharedPool {
    fn create(&self, _name: &str, _addr: SocketAddr) -> Arc<dyn ConnectionPool> {
        self.0.clone()
    }
}

// --- Fetcher ---

#[derive(Debug, Clone, Copy)]
pub enum Step {
    NoData,
    Respond(u16),
    /// Response carrying `Connection: close`.
    RespondClose(u16),
    Fail,
}

/// Fetcher replaying a script of header outcomes. Defaults to `200 OK`.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    script: Mutex<VecDeque<Step>>,
    seen_recycled: Mutex<Vec<bool>>,
}

impl ScriptedFetcher {
    pub fn new(steps: &[Step]) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.iter().copied().collect()),
            seen_recycled: Mutex::new(Vec::new()),
        })
    }

    /// Recycled flag of the connection used by each header fetch.
    pub fn seen_recycled(&self) -> Vec<bool> {
        self.seen_recycled.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.seen_recycled.lock().unwrap().len()
    }
}

pub fn response(status: u16, close: bool) -> ResponseHead {
    let mut headers = HeaderMap::new();
    headers.insert("content-length", HeaderValue::from_static("8"));
    if close {
        headers.insert("connection", HeaderValue::from_static("close"));
    }
    ResponseHead {
        version: Version::HTTP_11,
        status: StatusCode::from_u16(status).unwrap(),
        reason: String::new(),
        headers,
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch_header_block(
        &self,
        _bereq: &RequestHead,
        transport: &mut Transport,
        _host_header: Option<&str>,
    ) -> HeaderFetch {
        self.seen_recycled.lock().unwrap().push(transport.is_recycled());
        let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Respond(200));
        match step {
            Step::NoData => HeaderFetch::NoData,
            Step::Respond(status) => HeaderFetch::Received(response(status, false)),
            Step::RespondClose(status) => HeaderFetch::Received(response(status, true)),
            Step::Fail => HeaderFetch::Failed(FetchError::Malformed("scripted failure".into())),
        }
    }

    async fn fetch_body(&self, _transport: &mut Transport, framing: BodyFraming) -> Result<Vec<u8>, FetchError> {
        match framing {
            BodyFraming::None => Ok(Vec::new()),
            _ => Ok(b"scripted".to_vec()),
        }
    }

    async fn send_request(
        &self,
        _bereq: &RequestHead,
        _transport: &mut Transport,
        _host_header: Option<&str>,
    ) -> Result<(), FetchError> {
        Ok(())
    }
}

// --- Probe ---

/// Probe subsystem that only counts calls.
#[derive(Debug, Default)]
pub struct CountingProbe {
    pub registers: AtomicUsize,
    pub starts: AtomicUsize,
    pub unregisters: AtomicUsize,
}

impl CountingProbe {
    pub fn counts(&self) -> (usize, usize, usize) {
        (
            self.registers.load(Ordering::SeqCst),
            self.starts.load(Ordering::SeqCst),
            self.unregisters.load(Ordering::SeqCst),
        )
    }
}

impl HealthProbe for CountingProbe {
    fn register(&self, _backend: &Arc<Backend>, _spec: &ProbeConfig, _host_header: Option<&str>) {
        self.registers.fetch_add(1, Ordering::SeqCst);
    }

    fn start(&self, _backend: &Arc<Backend>, _spec: &ProbeConfig) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn unregister(&self, _backend: &Arc<Backend>, _spec: &ProbeConfig) {
        self.unregisters.fetch_add(1, Ordering::SeqCst);
    }
}

// --- Events ---

/// Records the name of every backend event emitted on this thread.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    /// Install as the thread default until the guard drops.
    pub fn install() -> (Self, DefaultGuard) {
        let log = Self::default();
        let guard = tracing::subscriber::set_default(Registry::default().with(log.clone()));
        (log, guard)
    }

    pub fn names(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|n| *n == name).count()
    }
}

struct EventName(Option<String>);

impl Visit for EventName {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "event" {
            self.0 = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, _field: &Field, _value: &dyn std::fmt::Debug) {}
}

impl<S: Subscriber> Layer<S> for EventLog {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if event.metadata().target() != EVENT_TARGET {
            return;
        }
        let mut name = EventName(None);
        event.record(&mut name);
        if let Some(name) = name.0 {
            self.0.lock().unwrap().push(name);
        }
    }
}

// --- Wiring ---

pub fn test_timeouts() -> Timeouts {
    Timeouts::from_millis(500, 1000, 1000)
}

/// Services with a scripted pool and fetcher.
pub fn scripted_services(pool: Arc<ScriptedPool>, fetcher: Arc<ScriptedFetcher>) -> Services {
    Services::standard(test_timeouts(), Duration::from_secs(60))
        .with_pools(Arc::new(SharedPool(pool)))
        .with_fetcher(fetcher)
        .with_probes(Arc::new(CountingProbe::default()))
}

/// Publish a single director and return it.
pub fn publish(admin: &Admin, config: BackendConfig) -> Arc<BackendDirector> {
    let name = config.name.clone();
    admin.lock().load(vec![config]);
    admin.director(&name).unwrap()
}

pub fn backend_config(name: &str, addr: SocketAddr) -> BackendConfig {
    BackendConfig::new(name, addr)
}

// --- Mock origins ---

async fn read_request_head(socket: &mut TcpStream) -> bool {
    let mut seen = Vec::new();
    let mut buf = [0u8; 1024];
    while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return false,
            Ok(n) => seen.extend_from_slice(&buf[..n]),
        }
    }
    true
}

/// Keep-alive origin answering every request with `response`.
/// Returns its address and a count of accepted connections.
pub async fn start_origin(response: &'static str) -> (SocketAddr, Arc<AtomicUsize>) {
    start_origin_with(response, usize::MAX).await
}

/// Origin that closes each connection after `per_conn` responses without
/// announcing it, like a backend whose idle timeout is shorter than ours.
pub async fn start_origin_with(response: &'static str, per_conn: usize) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                for _ in 0..per_conn {
                    if !read_request_head(&mut socket).await {
                        return;
                    }
                    if socket.write_all(response.as_bytes()).await.is_err() {
                        return;
                    }
                }
            });
        }
    });
    (addr, accepted)
}

/// Origin for pipe mode: answers, then waits for the client to finish
/// sending before closing.
pub async fn start_pipe_origin(response: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                if !read_request_head(&mut socket).await {
                    return;
                }
                let _ = socket.write_all(response.as_bytes()).await;
                let mut rest = Vec::new();
                let _ = socket.read_to_end(&mut rest).await;
            });
        }
    });
    addr
}
