//! HTTP/2 engine built on the `h2` crate.
//!
//! Each session owns one spawned driver task that polls the `h2`
//! connection. When the driver exits for any reason the session flips to
//! closed and everything waiting on [`Session::closed`] wakes up, which is
//! how the pool learns about dead connections.
//!
//! # Capacity
//!
//! A session accepts a new request while the number of in-flight streams is
//! below the peer's `SETTINGS_MAX_CONCURRENT_STREAMS`. With
//! `strict_max_concurrent_streams` the limit is treated as global instead and
//! the session always accepts; `h2` then queues the stream until a slot frees
//! up.
//!
//! # Background Tasks
//!
//! | Task | Runs when | Effect |
//! |------|-----------|--------|
//! | driver | always | polls the connection, marks the session closed on exit |
//! | monitor | `read_idle_timeout` or `idle_conn_timeout` set | PING health check, idle close |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use h2::client::{Connection as H2Connection, ResponseFuture, SendRequest};
use h2::{Ping, PingPong};
use http::header::EXPECT;
use http::{Request, Response};
use parking_lot::Mutex;
use tokio::sync::{Notify, watch};
use tokio::time::{sleep, timeout};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

use super::compression;
use super::engine::{BoxedIo, ProtocolEngine, Session};
use super::stall::WriteStallIo;

// ============================================================================
// Constants
// ============================================================================

/// ALPN identifier for HTTP/2 over TLS.
pub const NEXT_PROTO_TLS: &str = "h2";

/// Header list limit advertised when none is configured (10 MiB).
const DEFAULT_MAX_HEADER_LIST_SIZE: u32 = 10 << 20;

/// PING response deadline when none is configured.
const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(15);

/// Assumed stream limit until the peer's SETTINGS arrive.
const INITIAL_MAX_SEND_STREAMS: usize = 100;

/// Lower bound for the monitor's sleep between checks.
const MIN_MONITOR_TICK: Duration = Duration::from_millis(5);

// ============================================================================
// Types
// ============================================================================

/// Callback invoked with a short error class on transport errors.
///
/// Intended for incrementing a metric; labels are ASCII word characters.
pub type CountErrorFn = Arc<dyn Fn(&'static str) + Send + Sync>;

// ============================================================================
// EngineSettings
// ============================================================================

/// Knobs passed through to the HTTP/2 engine.
#[derive(Clone, Default)]
pub struct EngineSettings {
    /// Do not request or decode gzip transparently.
    pub disable_compression: bool,

    /// `SETTINGS_MAX_HEADER_LIST_SIZE` to advertise. Zero means 10 MiB.
    pub max_header_list_size: u32,

    /// Treat the peer's stream limit as global rather than per connection.
    pub strict_max_concurrent_streams: bool,

    /// Interval of inactivity after which a PING health check is sent.
    pub read_idle_timeout: Option<Duration>,

    /// Deadline for the PING response. Defaults to 15s.
    pub ping_timeout: Option<Duration>,

    /// Fail the connection when a write makes no progress for this long.
    pub write_byte_timeout: Option<Duration>,

    /// Close a session that has had no streams for this long.
    pub idle_conn_timeout: Option<Duration>,

    /// Bound on the wait for response headers.
    pub response_header_timeout: Option<Duration>,

    /// How long to withhold the body of an `Expect: 100-continue` request.
    ///
    /// `h2` does not surface interim `100 Continue` responses, so the body is
    /// always held for the full timeout unless a final response arrives
    /// first, in which case it is dropped.
    pub expect_continue_timeout: Option<Duration>,

    /// Error counter callback.
    pub count_error: Option<CountErrorFn>,
}

impl EngineSettings {
    /// Header list limit actually advertised.
    #[inline]
    #[must_use]
    pub fn effective_max_header_list_size(&self) -> u32 {
        if self.max_header_list_size == 0 {
            DEFAULT_MAX_HEADER_LIST_SIZE
        } else {
            self.max_header_list_size
        }
    }

    /// PING deadline actually used.
    #[inline]
    #[must_use]
    pub fn effective_ping_timeout(&self) -> Duration {
        self.ping_timeout.unwrap_or(DEFAULT_PING_TIMEOUT)
    }

    /// Reports an error class to the configured counter.
    pub(crate) fn count_error(&self, kind: &'static str) {
        if let Some(count) = &self.count_error {
            count(kind);
        }
    }
}

impl fmt::Debug for EngineSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineSettings")
            .field("disable_compression", &self.disable_compression)
            .field("max_header_list_size", &self.max_header_list_size)
            .field(
                "strict_max_concurrent_streams",
                &self.strict_max_concurrent_streams,
            )
            .field("read_idle_timeout", &self.read_idle_timeout)
            .field("ping_timeout", &self.ping_timeout)
            .field("write_byte_timeout", &self.write_byte_timeout)
            .field("idle_conn_timeout", &self.idle_conn_timeout)
            .field("response_header_timeout", &self.response_header_timeout)
            .field("expect_continue_timeout", &self.expect_continue_timeout)
            .field("count_error", &self.count_error.is_some())
            .finish()
    }
}

// ============================================================================
// Http2Engine
// ============================================================================

/// Protocol engine producing `h2` client sessions.
#[derive(Debug, Clone, Default)]
pub struct Http2Engine {
    settings: Arc<EngineSettings>,
}

impl Http2Engine {
    /// Creates an engine with the given settings.
    #[must_use]
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }

    /// Returns the engine settings.
    #[inline]
    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
}

#[async_trait]
impl ProtocolEngine for Http2Engine {
    async fn new_session(&self, io: BoxedIo) -> Result<Arc<dyn Session>> {
        let io: BoxedIo = match self.settings.write_byte_timeout {
            Some(limit) => Box::new(WriteStallIo::new(io, limit)),
            None => io,
        };

        let mut builder = h2::client::Builder::new();
        builder
            .enable_push(false)
            .initial_max_send_streams(INITIAL_MAX_SEND_STREAMS)
            .max_header_list_size(self.settings.effective_max_header_list_size());

        let (sender, mut connection) = builder
            .handshake::<_, Bytes>(io)
            .await
            .map_err(|e| {
                self.settings.count_error("handshake");
                Error::session(format!("HTTP/2 handshake failed: {e}"))
            })?;

        let ping_pong = connection.ping_pong();
        let (closed_tx, _) = watch::channel(false);

        let shared = Arc::new(SessionShared {
            sender: Mutex::new(sender),
            in_flight: AtomicUsize::new(0),
            closing: AtomicBool::new(false),
            closed_tx,
            shutdown: Notify::new(),
            last_active: Mutex::new(Instant::now()),
            settings: Arc::clone(&self.settings),
        });

        tokio::spawn(drive(connection, Arc::clone(&shared)));

        let needs_monitor = self.settings.read_idle_timeout.is_some()
            || self.settings.idle_conn_timeout.is_some();
        if needs_monitor {
            tokio::spawn(monitor(ping_pong, Arc::clone(&shared)));
        }

        debug!("HTTP/2 session established");

        Ok(Arc::new(Http2Session { shared }))
    }
}

// ============================================================================
// SessionShared
// ============================================================================

/// State shared between a session handle and its background tasks.
struct SessionShared {
    /// Template sender; cloned per request.
    sender: Mutex<SendRequest<Bytes>>,

    /// Streams currently open on this session.
    in_flight: AtomicUsize,

    /// Set once `close` was requested or the driver exited.
    closing: AtomicBool,

    /// Flips to `true` when the driver exits.
    closed_tx: watch::Sender<bool>,

    /// Wakes the driver for a local close.
    shutdown: Notify,

    /// Last time a stream started or finished.
    last_active: Mutex<Instant>,

    settings: Arc<EngineSettings>,
}

impl SessionShared {
    fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_active.lock().elapsed()
    }

    fn close(&self) {
        if !self.closing.swap(true, Ordering::SeqCst) {
            self.shutdown.notify_one();
        }
    }

    /// Maps an `h2` error, preferring `ConnectionClosed` once the session died.
    fn classify(&self, err: h2::Error) -> Error {
        if self.is_closed() {
            Error::ConnectionClosed
        } else {
            Error::Http2(err)
        }
    }
}

/// Counts a stream as in flight for its lifetime.
struct StreamGuard<'a>(&'a SessionShared);

impl<'a> StreamGuard<'a> {
    fn new(shared: &'a SessionShared) -> Self {
        shared.in_flight.fetch_add(1, Ordering::SeqCst);
        shared.touch();
        Self(shared)
    }
}

impl Drop for StreamGuard<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.0.touch();
    }
}

// ============================================================================
// Http2Session
// ============================================================================

/// One `h2` client connection.
pub struct Http2Session {
    shared: Arc<SessionShared>,
}

impl fmt::Debug for Http2Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Http2Session")
            .field("in_flight", &self.in_flight())
            .field("closed", &self.shared.is_closed())
            .finish_non_exhaustive()
    }
}

impl Drop for Http2Session {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl Http2Session {
    /// Returns the number of streams currently open.
    #[inline]
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Returns the peer's current concurrent stream limit.
    #[inline]
    #[must_use]
    pub fn max_concurrent_streams(&self) -> usize {
        self.shared.sender.lock().current_max_send_streams()
    }

    /// Waits for response headers, bounded by `response_header_timeout`.
    async fn await_headers(
        &self,
        response: &mut (impl Future<Output = std::result::Result<Response<h2::RecvStream>, h2::Error>>
                  + Unpin),
    ) -> Result<Response<h2::RecvStream>> {
        match self.shared.settings.response_header_timeout {
            Some(limit) => match timeout(limit, response).await {
                Ok(result) => result.map_err(|e| self.shared.classify(e)),
                Err(_) => {
                    self.shared.settings.count_error("response_header_timeout");
                    Err(Error::response_header_timeout(as_millis(limit)))
                }
            },
            None => response.await.map_err(|e| self.shared.classify(e)),
        }
    }

    /// Reads the whole body, releasing flow-control capacity as it goes.
    async fn collect_body(&self, response: Response<h2::RecvStream>) -> Result<Response<Bytes>> {
        let (parts, mut body) = response.into_parts();
        let mut buf = BytesMut::new();

        while let Some(chunk) = body.data().await {
            let chunk = chunk.map_err(|e| self.shared.classify(e))?;
            let _ = body.flow_control().release_capacity(chunk.len());
            buf.extend_from_slice(&chunk);
        }

        Ok(Response::from_parts(parts, buf.freeze()))
    }
}

#[async_trait]
impl Session for Http2Session {
    fn can_take_new_request(&self) -> bool {
        if self.shared.closing.load(Ordering::SeqCst) || self.shared.is_closed() {
            return false;
        }
        if self.shared.settings.strict_max_concurrent_streams {
            return true;
        }
        self.in_flight() < self.max_concurrent_streams()
    }

    async fn send_request(&self, mut request: Request<Bytes>) -> Result<Response<Bytes>> {
        if self.shared.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        let _stream = StreamGuard::new(&self.shared);
        let settings = &self.shared.settings;

        let decode_gzip = !settings.disable_compression && compression::request_gzip(&mut request);
        let expect_continue = request
            .headers()
            .get(EXPECT)
            .is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(b"100-continue"));

        let (parts, body) = request.into_parts();
        let head = Request::from_parts(parts, ());

        let sender = self.shared.sender.lock().clone();
        let mut sender = sender.ready().await.map_err(|e| self.shared.classify(e))?;

        let end_of_stream = body.is_empty();
        let (response, mut stream) = sender
            .send_request(head, end_of_stream)
            .map_err(|e| self.shared.classify(e))?;
        let mut response: Pin<&mut ResponseFuture> = pin!(response);

        trace!(end_of_stream, expect_continue, "HTTP/2 request headers sent");

        let early = match settings.expect_continue_timeout {
            Some(wait) if expect_continue && !end_of_stream => {
                tokio::select! {
                    result = &mut response => Some(result.map_err(|e| self.shared.classify(e))?),
                    () = sleep(wait) => None,
                }
            }
            _ => None,
        };

        let head = match early {
            Some(head) => {
                // Final response before the body went out: the peer does not want it.
                let _ = stream.send_data(Bytes::new(), true);
                head
            }
            None => {
                if !end_of_stream {
                    stream.reserve_capacity(body.len());
                    stream
                        .send_data(body, true)
                        .map_err(|e| self.shared.classify(e))?;
                }
                self.await_headers(&mut response).await?
            }
        };

        let response = self.collect_body(head).await?;

        if decode_gzip {
            compression::decode_gzip(response)
        } else {
            Ok(response)
        }
    }

    async fn closed(&self) {
        let mut rx = self.shared.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    fn close(&self) {
        self.shared.close();
    }
}

// ============================================================================
// Background Tasks
// ============================================================================

/// Polls the connection until it ends or a local close is requested.
async fn drive(mut connection: H2Connection<BoxedIo, Bytes>, shared: Arc<SessionShared>) {
    let result = tokio::select! {
        result = &mut connection => result,
        () = shared.shutdown.notified() => Ok(()),
    };
    drop(connection);

    match &result {
        Ok(()) => debug!("HTTP/2 connection closed"),
        Err(e) => {
            debug!(error = %e, "HTTP/2 connection failed");
            let kind = if e.is_go_away() {
                "recv_goaway"
            } else if e.is_io() {
                "read"
            } else {
                "conn"
            };
            shared.settings.count_error(kind);
        }
    }

    shared.closing.store(true, Ordering::SeqCst);
    shared.closed_tx.send_replace(true);
}

/// Runs the PING health check and the idle close timer.
async fn monitor(mut ping_pong: Option<PingPong>, shared: Arc<SessionShared>) {
    let read_idle = shared.settings.read_idle_timeout;
    let idle_conn = shared.settings.idle_conn_timeout;
    let ping_timeout = shared.settings.effective_ping_timeout();
    let mut closed_rx = shared.closed_tx.subscribe();
    let mut last_health = Instant::now();

    loop {
        let idle = shared.idle_for();
        let tick = next_tick(
            read_idle,
            idle_conn,
            last_health.elapsed().min(idle),
            idle,
            shared.in_flight.load(Ordering::SeqCst),
        );

        tokio::select! {
            _ = closed_rx.wait_for(|closed| *closed) => return,
            () = sleep(tick) => {}
        }

        let in_flight = shared.in_flight.load(Ordering::SeqCst);

        if let Some(limit) = idle_conn
            && in_flight == 0
            && shared.idle_for() >= limit
        {
            debug!(idle_ms = as_millis(limit), "Closing idle HTTP/2 session");
            shared.close();
            return;
        }

        if let Some(limit) = read_idle
            && last_health.elapsed().min(shared.idle_for()) >= limit
            && let Some(pinger) = ping_pong.as_mut()
        {
            trace!("Sending HTTP/2 health check PING");
            match timeout(ping_timeout, pinger.ping(Ping::opaque())).await {
                Ok(Ok(_)) => last_health = Instant::now(),
                Ok(Err(e)) => {
                    warn!(error = %e, "HTTP/2 health check failed");
                    shared.settings.count_error("ping");
                    shared.close();
                    return;
                }
                Err(_) => {
                    warn!(
                        timeout_ms = as_millis(ping_timeout),
                        "HTTP/2 health check timed out"
                    );
                    shared.settings.count_error("ping_timeout");
                    shared.close();
                    return;
                }
            }
        }
    }
}

/// Sleep before the monitor's next check.
///
/// The idle timer only counts down while no stream is open; otherwise it
/// is re-armed at its full length.
fn next_tick(
    read_idle: Option<Duration>,
    idle_conn: Option<Duration>,
    since_health: Duration,
    idle: Duration,
    in_flight: usize,
) -> Duration {
    let idle_conn = idle_conn.map(|limit| {
        if in_flight == 0 {
            limit.saturating_sub(idle)
        } else {
            limit
        }
    });

    [read_idle.map(|d| d.saturating_sub(since_health)), idle_conn]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(MIN_MONITOR_TICK)
        .max(MIN_MONITOR_TICK)
}

fn as_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Tests
// ============================================================================
