//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use flate2::Compression;
use flate2::write::GzEncoder;
use futures_util::future::BoxFuture;
use h2::RecvStream;
use h2::server::SendResponse;
use h2_pool::{BoxedIo, DialFn, Error, ProtocolEngine, Result, Session, TlsConfig};
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING};
use http::{Request, Response, StatusCode};
use parking_lot::Mutex;
use tokio::io::DuplexStream;
use tokio::sync::{Semaphore, watch};

// ============================================================================
// Tracing
// ============================================================================

/// Installs a test subscriber honouring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Polls `condition` until it holds or two seconds pass.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..1000 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    condition()
}

/// Runs `fut` with a generous deadline so a hung test fails instead.
pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(10), fut)
        .await
        .expect("test step timed out")
}

// ============================================================================
// Mock Session
// ============================================================================

/// Session with test-controlled capacity.
pub struct MockSession {
    accepting: AtomicBool,
    broken: AtomicBool,
    closed_tx: watch::Sender<bool>,
    requests: AtomicUsize,
}

impl MockSession {
    fn new() -> Arc<Self> {
        let (closed_tx, _) = watch::channel(false);
        Arc::new(Self {
            accepting: AtomicBool::new(true),
            broken: AtomicBool::new(false),
            closed_tx,
            requests: AtomicUsize::new(0),
        })
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    /// Makes every following request fail with a connection-level error.
    pub fn break_connection(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Session for MockSession {
    fn can_take_new_request(&self) -> bool {
        !self.is_closed() && self.accepting.load(Ordering::SeqCst)
    }

    async fn send_request(&self, _request: Request<Bytes>) -> Result<Response<Bytes>> {
        if self.is_closed() || self.broken.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(Response::new(Bytes::from_static(b"ok")))
    }

    async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    fn close(&self) {
        self.closed_tx.send_replace(true);
    }
}

// ============================================================================
// Mock Engine
// ============================================================================

/// Engine handing out [`MockSession`]s, with a gate to hold handshakes.
pub struct MockEngine {
    sessions: Mutex<Vec<Arc<MockSession>>>,
    failures: AtomicUsize,
    hold: watch::Sender<bool>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        let (hold, _) = watch::channel(false);
        Arc::new(Self {
            sessions: Mutex::new(Vec::new()),
            failures: AtomicUsize::new(0),
            hold,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    /// Makes the next `count` handshakes fail.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Blocks handshakes until [`MockEngine::release`].
    pub fn hold(&self) {
        self.hold.send_replace(true);
    }

    pub fn release(&self) {
        self.hold.send_replace(false);
    }

    pub fn sessions_created(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn session(&self, index: usize) -> Arc<MockSession> {
        Arc::clone(&self.sessions.lock()[index])
    }

    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.sessions.lock().clone()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of handshakes observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProtocolEngine for MockEngine {
    async fn new_session(&self, _io: BoxedIo) -> Result<Arc<dyn Session>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let mut hold = self.hold.subscribe();
        let _ = hold.wait_for(|held| !*held).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(Error::session("mock handshake refused"));
        }

        let session = MockSession::new();
        self.sessions.lock().push(Arc::clone(&session));
        Ok(session)
    }
}

// ============================================================================
// Dialers
// ============================================================================

/// Dialer returning an unused in-memory pipe, counting calls.
pub fn pipe_dial_fn(dials: Arc<AtomicUsize>) -> DialFn {
    Arc::new(
        move |_: &str, _: &str, _: TlsConfig| -> BoxFuture<'static, io::Result<BoxedIo>> {
            dials.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {
                let (client, _server) = tokio::io::duplex(64);
                Ok(Box::new(client) as BoxedIo)
            })
        },
    )
}

// ============================================================================
// In-process HTTP/2 Server
// ============================================================================

/// HTTP/2 server reached through in-memory pipes.
///
/// Paths: `/hold` waits for [`H2Server::release`]; `/gzip` answers with a
/// gzip body when the client accepts it; `/echo` answers with the request
/// body; `/reject` answers 417 before reading the body; anything else
/// echoes the path.
#[derive(Clone)]
pub struct H2Server {
    pub max_concurrent_streams: Option<u32>,
    release: Arc<Semaphore>,
    held: Arc<AtomicUsize>,
    dials: Arc<AtomicUsize>,
    requests: Arc<AtomicUsize>,
    body_bytes: Arc<AtomicUsize>,
    body_delays: Arc<Mutex<Vec<Duration>>>,
}

impl H2Server {
    pub fn new() -> Self {
        Self {
            max_concurrent_streams: None,
            release: Arc::new(Semaphore::new(0)),
            held: Arc::new(AtomicUsize::new(0)),
            dials: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(AtomicUsize::new(0)),
            body_bytes: Arc::new(AtomicUsize::new(0)),
            body_delays: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_max_concurrent_streams(mut self, max: u32) -> Self {
        self.max_concurrent_streams = Some(max);
        self
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn held(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Request body bytes received across all streams.
    pub fn body_bytes(&self) -> usize {
        self.body_bytes.load(Ordering::SeqCst)
    }

    /// Time between headers and the end of a non-empty body, per request.
    pub fn body_delays(&self) -> Vec<Duration> {
        self.body_delays.lock().clone()
    }

    /// Lets one held request complete.
    pub fn release(&self) {
        self.release.add_permits(1);
    }

    /// Dialer that starts a fresh server connection per dial.
    pub fn dial_fn(&self) -> DialFn {
        let server = self.clone();
        Arc::new(
            move |_: &str, _: &str, _: TlsConfig| -> BoxFuture<'static, io::Result<BoxedIo>> {
                let server = server.clone();
                Box::pin(async move {
                    server.dials.fetch_add(1, Ordering::SeqCst);
                    let (client, remote) = tokio::io::duplex(1 << 16);
                    tokio::spawn(server.serve(remote));
                    Ok(Box::new(client) as BoxedIo)
                })
            },
        )
    }

    async fn serve(self, io: DuplexStream) {
        let mut builder = h2::server::Builder::new();
        if let Some(max) = self.max_concurrent_streams {
            builder.max_concurrent_streams(max);
        }

        let Ok(mut connection) = builder.handshake::<_, Bytes>(io).await else {
            return;
        };

        while let Some(Ok((request, respond))) = connection.accept().await {
            tokio::spawn(self.clone().handle(request, respond));
        }
    }

    async fn handle(self, request: Request<RecvStream>, mut respond: SendResponse<Bytes>) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let headers_at = Instant::now();

        let (parts, body) = request.into_parts();
        let path = parts.uri.path().to_string();
        let accepts_gzip = parts
            .headers
            .get(ACCEPT_ENCODING)
            .is_some_and(|v| v == "gzip");

        if path == "/reject" {
            reply(&mut respond, StatusCode::EXPECTATION_FAILED, None, Bytes::new());
            self.read_body(body).await;
            return;
        }

        let payload = self.read_body(body).await;
        if !payload.is_empty() {
            self.body_delays.lock().push(headers_at.elapsed());
        }

        if path == "/hold" {
            self.held.fetch_add(1, Ordering::SeqCst);
            if let Ok(permit) = self.release.acquire().await {
                permit.forget();
            }
        }

        let text = Bytes::from(format!("hello from {path}"));
        match path.as_str() {
            "/echo" => reply(&mut respond, StatusCode::OK, None, payload),
            "/gzip" if accepts_gzip => {
                let body = Bytes::from(gzip(&text));
                reply(&mut respond, StatusCode::OK, Some("gzip"), body);
            }
            _ => reply(&mut respond, StatusCode::OK, None, text),
        }
    }

    async fn read_body(&self, mut body: RecvStream) -> Bytes {
        let mut buf = BytesMut::new();
        while let Some(Ok(chunk)) = body.data().await {
            let _ = body.flow_control().release_capacity(chunk.len());
            self.body_bytes.fetch_add(chunk.len(), Ordering::SeqCst);
            buf.extend_from_slice(&chunk);
        }
        buf.freeze()
    }
}

fn reply(
    respond: &mut SendResponse<Bytes>,
    status: StatusCode,
    encoding: Option<&str>,
    body: Bytes,
) {
    let mut response = Response::builder().status(status);
    if let Some(encoding) = encoding {
        response = response.header(CONTENT_ENCODING, encoding);
    }
    let Ok(head) = response.body(()) else {
        return;
    };

    let end_of_stream = body.is_empty();
    if let Ok(mut stream) = respond.send_response(head, end_of_stream)
        && !end_of_stream
    {
        let _ = stream.send_data(body, true);
    }
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("gzip write");
    encoder.finish().expect("gzip finish")
}
