//! Builder pattern for transport configuration.
//!
//! Provides a fluent API for configuring and creating [`Transport`]
//! instances. Serializable knobs live in [`TransportOptions`]; the builder
//! adds the pieces that cannot be serialized (TLS roots, dialer, callbacks).
//!
//! # Example
//!
//! ```ignore
//! use h2_pool::{TlsConfig, Transport, TransportOptions};
//!
//! let transport = Transport::builder()
//!     .options(TransportOptions::new().with_max_conns_per_host(4))
//!     .tls(TlsConfig::new().with_server_name("api.example.com"))
//!     .count_error(|kind| tracing::debug!(kind, "transport error"))
//!     .build()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::{CountErrorFn, ProtocolEngine};
use crate::transport::{DialFn, TlsConfig};

use super::core::Transport;
use super::options::TransportOptions;

// ============================================================================
// TransportBuilder
// ============================================================================

/// Builder for configuring a [`Transport`] instance.
///
/// Use [`Transport::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct TransportBuilder {
    pub(crate) options: TransportOptions,
    pub(crate) tls: TlsConfig,
    pub(crate) dial_fn: Option<DialFn>,
    pub(crate) count_error: Option<CountErrorFn>,
    pub(crate) engine: Option<Arc<dyn ProtocolEngine>>,
}

impl fmt::Debug for TransportBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportBuilder")
            .field("options", &self.options)
            .field("tls", &self.tls)
            .field("dial_fn", &self.dial_fn.is_some())
            .field("count_error", &self.count_error.is_some())
            .field("engine", &self.engine.is_some())
            .finish()
    }
}

// ============================================================================
// TransportBuilder Implementation
// ============================================================================

impl TransportBuilder {
    /// Creates a builder with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces all tuning options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: TransportOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the base TLS configuration.
    ///
    /// `h2` is added to the ALPN list and the server name defaults to the
    /// destination host when dialing.
    #[inline]
    #[must_use]
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Replaces the built-in TCP + TLS dialer.
    ///
    /// The function is trusted to negotiate TLS and ALPN itself.
    #[inline]
    #[must_use]
    pub fn dial_fn(mut self, dial_fn: DialFn) -> Self {
        self.dial_fn = Some(dial_fn);
        self
    }

    /// Installs an error counter, called with short error classes such as
    /// `"dial"`, `"ping_timeout"` or `"recv_goaway"`.
    #[inline]
    #[must_use]
    pub fn count_error(mut self, count: impl Fn(&'static str) + Send + Sync + 'static) -> Self {
        self.count_error = Some(Arc::new(count));
        self
    }

    /// Uses a custom protocol engine instead of the `h2` engine.
    #[inline]
    #[must_use]
    pub fn engine(mut self, engine: Arc<dyn ProtocolEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Caps connections per destination. Shortcut for the same option.
    #[inline]
    #[must_use]
    pub fn max_conns_per_host(mut self, max: usize) -> Self {
        self.options.max_conns_per_host = max;
        self
    }

    /// Builds the transport with validation.
    ///
    /// Nothing is dialed here; the engine and pool are set up on first use.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if a timeout is zero
    /// - [`Error::Config`] if the TLS configuration is inconsistent
    pub fn build(self) -> Result<Transport> {
        self.options.validate()?;
        self.validate_tls()?;

        Ok(Transport::from_builder(self))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl TransportBuilder {
    fn validate_tls(&self) -> Result<()> {
        if self.tls.next_protos.iter().any(String::is_empty) {
            return Err(Error::config("ALPN protocol names must not be empty"));
        }

        if self.dial_fn.is_none()
            && let Some(name) = &self.tls.server_name
            && !name.is_empty()
        {
            self.tls.resolve_for(name).handshake_name().map_err(|e| {
                Error::config(format!("TLS server name {name:?} is not usable: {e}"))
            })?;
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
