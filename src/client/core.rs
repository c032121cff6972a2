//! Transport facade.
//!
//! Owns the configuration and lazily wires the protocol engine, connection
//! factory and pool together on first use.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use http::{Request, Response};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::identifiers::Destination;
use crate::protocol::{CountErrorFn, Http2Engine, ProtocolEngine};
use crate::transport::{ConnectionFactory, ConnectionPool, DialFn, TlsConfig};

use super::builder::TransportBuilder;
use super::options::TransportOptions;

// ============================================================================
// Transport
// ============================================================================

/// HTTP/2 client transport with a scaling connection pool.
///
/// Cheap to clone; clones share one pool.
///
/// # Example
///
/// ```ignore
/// let transport = Transport::builder().max_conns_per_host(4).build()?;
///
/// let request = http::Request::get("https://example.com/").body(bytes::Bytes::new())?;
/// let response = transport.round_trip(request).await?;
/// println!("{}", response.status());
/// ```
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    options: TransportOptions,
    tls: TlsConfig,
    dial_fn: Option<DialFn>,
    count_error: Option<CountErrorFn>,
    engine: Option<Arc<dyn ProtocolEngine>>,
    pool: OnceLock<ConnectionPool>,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("options", &self.inner.options)
            .field("tls", &self.inner.tls)
            .field("initialized", &self.inner.pool.get().is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Transport - Constructor
// ============================================================================

impl Transport {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> TransportBuilder {
        TransportBuilder::new()
    }

    pub(crate) fn from_builder(builder: TransportBuilder) -> Self {
        Self {
            inner: Arc::new(TransportInner {
                options: builder.options,
                tls: builder.tls,
                dial_fn: builder.dial_fn,
                count_error: builder.count_error,
                engine: builder.engine,
                pool: OnceLock::new(),
            }),
        }
    }

    /// Returns the tuning options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &TransportOptions {
        &self.inner.options
    }

    /// Returns the connection pool, setting it up on first call.
    pub fn pool(&self) -> &ConnectionPool {
        self.inner.pool.get_or_init(|| self.inner.init_pool())
    }
}

impl TransportInner {
    fn init_pool(&self) -> ConnectionPool {
        let engine: Arc<dyn ProtocolEngine> = match &self.engine {
            Some(engine) => Arc::clone(engine),
            None => Arc::new(Http2Engine::new(
                self.options.to_engine_settings(self.count_error.clone()),
            )),
        };

        let mut factory = ConnectionFactory::new(engine).with_tls(self.tls.clone());
        if let Some(dial_fn) = &self.dial_fn {
            factory = factory.with_dial_fn(Arc::clone(dial_fn));
        }
        if let Some(limit) = self.options.dial_timeout {
            factory = factory.with_dial_timeout(limit);
        }

        info!(
            max_conns_per_host = self.options.max_conns_per_host,
            keep_alive = !self.options.disable_keep_alives,
            "Transport initialized"
        );

        ConnectionPool::new(factory, self.options.to_pool_config(self.count_error.clone()))
    }
}

// ============================================================================
// Transport - Requests
// ============================================================================

impl Transport {
    /// Sends one request and returns the buffered response.
    ///
    /// The request URI must be absolute. Connection-level failures retire
    /// the connection from the pool; the request itself is never retried.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedScheme`] for schemes other than `https`
    ///   (and `http` when allowed)
    /// - [`Error::InvalidDestination`] if the URI has no host
    /// - dial errors and [`Error::NoAvailableConnection`] from the pool
    /// - request errors from the session
    pub async fn round_trip(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
        let destination = self.destination_for(&request)?;
        let pool = self.pool();

        let connection = pool.get_connection(&destination).await?;
        let result = connection.send_request(request).await;

        if pool.config().disable_keep_alives {
            connection.close();
        } else if let Err(e) = &result
            && e.is_connection_error()
        {
            debug!(
                destination = %destination,
                connection_id = %connection.id(),
                error = %e,
                "Request failed on broken connection"
            );
            pool.mark_dead(&connection).await;
        }

        result
    }

    fn destination_for(&self, request: &Request<Bytes>) -> Result<Destination> {
        let uri = request.uri();

        match uri.scheme_str() {
            Some("https") => {}
            Some("http") if self.inner.options.allow_http => {}
            Some(other) => return Err(Error::unsupported_scheme(other)),
            None => return Err(Error::invalid_destination(uri.to_string())),
        }

        Destination::from_uri(uri)
    }
}

// ============================================================================
// Tests
// ============================================================================
