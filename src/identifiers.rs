//! Type-safe identifiers for pool entities.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ConnectionId`] | Process-unique identity of a physical connection |
//! | [`Destination`] | `host:port` a connection group serves |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use http::Uri;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default port for `https` URIs.
const HTTPS_PORT: u16 = 443;

/// Default port for `http` URIs.
const HTTP_PORT: u16 = 80;

/// Next connection id to hand out.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// ConnectionId
// ============================================================================

/// Identity of a physical connection.
///
/// Connections are compared by identity, never by value; two sessions to the
/// same destination always carry different ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocates the next unused id.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ============================================================================
// Destination
// ============================================================================

/// Semantic address (`host:port`) identifying a connection group.
///
/// Cheap to clone; the host is shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    host: Arc<str>,
    port: u16,
}

impl Destination {
    /// Creates a destination from host and port.
    ///
    /// IPv6 hosts are given without brackets.
    #[must_use]
    pub fn new(host: impl AsRef<str>, port: u16) -> Self {
        let host = host.as_ref();
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        Self {
            host: Arc::from(host),
            port,
        }
    }

    /// Derives the destination of a request URI.
    ///
    /// Uses the explicit port if present, otherwise 443 for `https` and 80
    /// for `http`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidDestination`] if the URI has no host
    /// - [`Error::UnsupportedScheme`] if no port is given and the scheme is
    ///   neither `http` nor `https`
    pub fn from_uri(uri: &Uri) -> Result<Self> {
        let host = uri
            .host()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::invalid_destination(uri.to_string()))?;

        let port = match uri.port_u16() {
            Some(port) => port,
            None => match uri.scheme_str() {
                Some("https") | None => HTTPS_PORT,
                Some("http") => HTTP_PORT,
                Some(other) => return Err(Error::unsupported_scheme(other)),
            },
        };

        Ok(Self::new(host, port))
    }

    /// Returns the host without brackets.
    #[inline]
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Formats the destination as a dialable `host:port` address.
    #[inline]
    #[must_use]
    pub fn address(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Destination {
    type Err = Error;

    /// Parses `host:port` or `[v6-host]:port`.
    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::invalid_destination(s))?;

        if host.is_empty() || (host.contains(':') && !host.starts_with('[')) {
            return Err(Error::invalid_destination(s));
        }

        let port = port
            .parse::<u16>()
            .map_err(|_| Error::invalid_destination(s))?;

        Ok(Self::new(host, port))
    }
}

// ============================================================================
// Tests
// ============================================================================
