//! Connection factory.
//!
//! Dials a raw connection to a destination and upgrades it to a protocol
//! session. The factory never touches pool state; registering the result is
//! the caller's job.
//!
//! # Dial Paths
//!
//! | Configured | Transport | ALPN check |
//! |------------|-----------|------------|
//! | custom [`DialFn`] | whatever the function returns | none, result is trusted |
//! | nothing | TCP + rustls, bounded by the dial timeout | must negotiate `h2` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::Destination;
use crate::protocol::{BoxedIo, NEXT_PROTO_TLS, ProtocolEngine};

use super::connection::Connection;
use super::tls::TlsConfig;

// ============================================================================
// Constants
// ============================================================================

/// Network name passed to custom dial functions.
const NETWORK_TCP: &str = "tcp";

// ============================================================================
// Types
// ============================================================================

/// Custom dialer: `(network, address, tls) -> raw stream`.
///
/// The returned stream must already speak TLS (or whatever the engine
/// expects); the factory hands it to the engine unchecked.
pub type DialFn =
    Arc<dyn Fn(&str, &str, TlsConfig) -> BoxFuture<'static, io::Result<BoxedIo>> + Send + Sync>;

// ============================================================================
// ConnectionFactory
// ============================================================================

/// Produces new sessions for the pool.
#[derive(Clone)]
pub struct ConnectionFactory {
    engine: Arc<dyn ProtocolEngine>,
    tls: TlsConfig,
    dial_fn: Option<DialFn>,
    dial_timeout: Option<Duration>,
}

impl fmt::Debug for ConnectionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("tls", &self.tls)
            .field("dial_fn", &self.dial_fn.is_some())
            .field("dial_timeout", &self.dial_timeout)
            .finish_non_exhaustive()
    }
}

impl ConnectionFactory {
    /// Creates a factory using the built-in TLS dialer.
    #[must_use]
    pub fn new(engine: Arc<dyn ProtocolEngine>) -> Self {
        Self {
            engine,
            tls: TlsConfig::default(),
            dial_fn: None,
            dial_timeout: None,
        }
    }

    /// Sets the base TLS configuration.
    #[must_use]
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Replaces the built-in dialer.
    #[must_use]
    pub fn with_dial_fn(mut self, dial_fn: DialFn) -> Self {
        self.dial_fn = Some(dial_fn);
        self
    }

    /// Bounds TCP connect plus TLS handshake of the built-in dialer.
    #[must_use]
    pub fn with_dial_timeout(mut self, limit: Duration) -> Self {
        self.dial_timeout = Some(limit);
        self
    }

    /// Returns the base TLS configuration.
    #[inline]
    #[must_use]
    pub fn tls(&self) -> &TlsConfig {
        &self.tls
    }

    /// Dials `destination` and establishes a session on it.
    ///
    /// # Errors
    ///
    /// - [`Error::Dial`] / [`Error::DialTimeout`] if the connection fails
    /// - [`Error::Tls`] if the TLS configuration is unusable
    /// - [`Error::Negotiation`] if the peer does not select `h2`
    /// - [`Error::Session`] if the engine handshake fails
    pub async fn dial(&self, destination: &Destination) -> Result<Connection> {
        let tls = self.tls.resolve_for(destination.host());

        let io = match &self.dial_fn {
            Some(dial_fn) => dial_fn(NETWORK_TCP, &destination.address(), tls)
                .await
                .map_err(|e| Error::dial(destination.clone(), e))?,
            None => self.dial_tls(destination, tls).await?,
        };

        let session = self.engine.new_session(io).await?;
        let connection = Connection::new(destination.clone(), session);

        debug!(
            destination = %destination,
            connection_id = %connection.id(),
            "Connection established"
        );

        Ok(connection)
    }

    /// Built-in dialer: TCP connect, TLS handshake, ALPN check.
    async fn dial_tls(&self, destination: &Destination, tls: TlsConfig) -> Result<BoxedIo> {
        let connector = TlsConnector::from(tls.to_client_config()?);
        let server_name = tls.handshake_name()?;

        let connect = async {
            let tcp = TcpStream::connect((destination.host(), destination.port())).await?;
            tcp.set_nodelay(true)?;
            connector.connect(server_name, tcp).await
        };

        let stream = match self.dial_timeout {
            Some(limit) => timeout(limit, connect).await.map_err(|_| {
                Error::dial_timeout(
                    destination.clone(),
                    u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                )
            })?,
            None => connect.await,
        }
        .map_err(|e| Error::dial(destination.clone(), e))?;

        let negotiated = stream.get_ref().1.alpn_protocol();
        if negotiated != Some(NEXT_PROTO_TLS.as_bytes()) {
            return Err(Error::negotiation(
                destination.clone(),
                negotiated.map(|p| String::from_utf8_lossy(p).into_owned()),
            ));
        }

        Ok(Box::new(stream))
    }
}

// ============================================================================
// Tests
// ============================================================================
