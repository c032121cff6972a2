//! Error types for the HTTP/2 connection pool.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use h2_pool::{Error, Result, Transport};
//!
//! async fn example(transport: &Transport, request: http::Request<bytes::Bytes>) -> Result<()> {
//!     match transport.round_trip(request).await {
//!         Ok(response) => println!("{}", response.status()),
//!         Err(e) if e.is_recoverable() => println!("retry later: {e}"),
//!         Err(e) => return Err(e),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidDestination`], [`Error::UnsupportedScheme`] |
//! | Dial | [`Error::Dial`], [`Error::DialTimeout`], [`Error::Tls`], [`Error::Negotiation`], [`Error::Session`] |
//! | Pool | [`Error::NoAvailableConnection`] |
//! | Request | [`Error::ConnectionClosed`], [`Error::ResponseHeaderTimeout`], [`Error::Decode`] |
//! | External | [`Error::Io`], [`Error::Http2`], [`Error::Http`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;

use crate::identifiers::Destination;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when transport configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Address could not be interpreted as `host:port`.
    #[error("Invalid destination: {address}")]
    InvalidDestination {
        /// The rejected address.
        address: String,
    },

    /// Request URI scheme is not served by this transport.
    ///
    /// Plain `http` is only accepted when `allow_http` is enabled.
    #[error("Unsupported scheme: {scheme}")]
    UnsupportedScheme {
        /// The rejected scheme.
        scheme: String,
    },

    // ========================================================================
    // Dial Errors
    // ========================================================================
    /// Network failure while establishing a connection.
    #[error("Dial to {destination} failed: {source}")]
    Dial {
        /// Destination being dialed.
        destination: Destination,
        /// Underlying I/O error.
        #[source]
        source: IoError,
    },

    /// Dial did not complete within the configured timeout.
    #[error("Dial to {destination} timed out after {timeout_ms}ms")]
    DialTimeout {
        /// Destination being dialed.
        destination: Destination,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// TLS configuration or handshake error.
    #[error("TLS error: {message}")]
    Tls {
        /// Description of the TLS failure.
        message: String,
    },

    /// Peer did not negotiate the HTTP/2 application protocol.
    ///
    /// The TLS handshake succeeded but ALPN selected something other than `h2`.
    #[error("Unexpected ALPN protocol {negotiated:?} from {destination}; want \"h2\"")]
    Negotiation {
        /// Destination that was dialed.
        destination: Destination,
        /// Protocol the peer selected, if any.
        negotiated: Option<String>,
    },

    /// Protocol engine failed to set up a session over a fresh connection.
    #[error("Session setup failed: {message}")]
    Session {
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // Pool Errors
    // ========================================================================
    /// Every live connection to the destination is saturated.
    ///
    /// The pool does not retry; callers decide whether to try again.
    #[error("No available connection to {destination}")]
    NoAvailableConnection {
        /// Destination with no spare capacity.
        destination: Destination,
    },

    // ========================================================================
    // Request Errors
    // ========================================================================
    /// Connection closed before or during the request.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Response headers did not arrive in time.
    #[error("Timeout after {timeout_ms}ms awaiting response headers")]
    ResponseHeaderTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Response body could not be decoded.
    #[error("Decode error: {message}")]
    Decode {
        /// Description of the decode failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// HTTP/2 protocol error.
    #[error("HTTP/2 error: {0}")]
    Http2(#[from] h2::Error),

    /// HTTP message construction error.
    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid destination error.
    #[inline]
    pub fn invalid_destination(address: impl Into<String>) -> Self {
        Self::InvalidDestination {
            address: address.into(),
        }
    }

    /// Creates an unsupported scheme error.
    #[inline]
    pub fn unsupported_scheme(scheme: impl Into<String>) -> Self {
        Self::UnsupportedScheme {
            scheme: scheme.into(),
        }
    }

    /// Creates a dial error.
    #[inline]
    pub fn dial(destination: Destination, source: IoError) -> Self {
        Self::Dial {
            destination,
            source,
        }
    }

    /// Creates a dial timeout error.
    #[inline]
    pub fn dial_timeout(destination: Destination, timeout_ms: u64) -> Self {
        Self::DialTimeout {
            destination,
            timeout_ms,
        }
    }

    /// Creates a TLS error.
    #[inline]
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls {
            message: message.into(),
        }
    }

    /// Creates a negotiation error.
    #[inline]
    pub fn negotiation(destination: Destination, negotiated: Option<String>) -> Self {
        Self::Negotiation {
            destination,
            negotiated,
        }
    }

    /// Creates a session setup error.
    #[inline]
    pub fn session(message: impl Into<String>) -> Self {
        Self::Session {
            message: message.into(),
        }
    }

    /// Creates a no available connection error.
    #[inline]
    pub fn no_available_connection(destination: Destination) -> Self {
        Self::NoAvailableConnection { destination }
    }

    /// Creates a response header timeout error.
    #[inline]
    pub fn response_header_timeout(timeout_ms: u64) -> Self {
        Self::ResponseHeaderTimeout { timeout_ms }
    }

    /// Creates a decode error.
    #[inline]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this error happened while establishing a connection.
    #[inline]
    #[must_use]
    pub fn is_dial_error(&self) -> bool {
        matches!(
            self,
            Self::Dial { .. }
                | Self::DialTimeout { .. }
                | Self::Tls { .. }
                | Self::Negotiation { .. }
                | Self::Session { .. }
        )
    }

    /// Returns `true` if the connection that produced this error is unusable.
    ///
    /// Stream-level resets leave the connection intact and return `false`.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::ConnectionClosed | Self::Io(_) => true,
            Self::Http2(e) => e.is_io() || e.is_go_away() || e.get_io().is_some(),
            _ => false,
        }
    }

    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::DialTimeout { .. } | Self::ResponseHeaderTimeout { .. }
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        self.is_timeout()
            || self.is_connection_error()
            || matches!(
                self,
                Self::NoAvailableConnection { .. } | Self::Dial { .. }
            )
    }

    /// Short label used when reporting this error to the error counter.
    #[must_use]
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::InvalidDestination { .. } => "invalid_destination",
            Self::UnsupportedScheme { .. } => "unsupported_scheme",
            Self::Dial { .. } => "dial",
            Self::DialTimeout { .. } => "dial_timeout",
            Self::Tls { .. } => "tls",
            Self::Negotiation { .. } => "alpn",
            Self::Session { .. } => "session_setup",
            Self::NoAvailableConnection { .. } => "no_available_connection",
            Self::ConnectionClosed => "conn_closed",
            Self::ResponseHeaderTimeout { .. } => "response_header_timeout",
            Self::Decode { .. } => "decode",
            Self::Io(_) => "io",
            Self::Http2(_) => "h2",
            Self::Http(_) => "http",
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
