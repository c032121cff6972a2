//! Transport tuning options.
//!
//! Plain data that can be built in code or loaded from JSON. Durations are
//! expressed in milliseconds when serialized; an absent duration disables the
//! corresponding timer.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use h2_pool::TransportOptions;
//!
//! let options = TransportOptions::new()
//!     .with_max_conns_per_host(4)
//!     .with_read_idle_timeout(Duration::from_secs(30))
//!     .with_ping_timeout(Duration::from_secs(5));
//!
//! let same = TransportOptions::from_json(
//!     r#"{"max_conns_per_host": 4, "read_idle_timeout": 30000, "ping_timeout": 5000}"#,
//! )?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::{CountErrorFn, EngineSettings};
use crate::transport::PoolConfig;

// ============================================================================
// Constants
// ============================================================================

/// Default bound on TCP connect plus TLS handshake.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// TransportOptions
// ============================================================================

/// Serializable transport configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportOptions {
    /// Do not add `accept-encoding: gzip` or decode gzip bodies.
    pub disable_compression: bool,

    /// Accept `http://` request URIs. The connection is still dialed
    /// through the configured dialer.
    pub allow_http: bool,

    /// `SETTINGS_MAX_HEADER_LIST_SIZE` to advertise. Zero means 10 MiB.
    pub max_header_list_size: u32,

    /// Treat the peer's stream limit as global rather than per connection.
    pub strict_max_concurrent_streams: bool,

    /// Send a health-check PING after this much inactivity.
    #[serde(with = "duration_ms")]
    pub read_idle_timeout: Option<Duration>,

    /// Close the connection if a PING is not answered in time.
    #[serde(with = "duration_ms")]
    pub ping_timeout: Option<Duration>,

    /// Close the connection if a write makes no progress for this long.
    #[serde(with = "duration_ms")]
    pub write_byte_timeout: Option<Duration>,

    /// Use one connection per request and close it afterwards.
    pub disable_keep_alives: bool,

    /// Connections per destination. Zero means unlimited.
    pub max_conns_per_host: usize,

    /// Close connections that have carried no streams for this long.
    #[serde(with = "duration_ms")]
    pub idle_conn_timeout: Option<Duration>,

    /// Bound on the wait for response headers.
    #[serde(with = "duration_ms")]
    pub response_header_timeout: Option<Duration>,

    /// How long to hold back the body of `Expect: 100-continue` requests.
    #[serde(with = "duration_ms")]
    pub expect_continue_timeout: Option<Duration>,

    /// Bound on TCP connect plus TLS handshake for the built-in dialer.
    #[serde(with = "duration_ms")]
    pub dial_timeout: Option<Duration>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl TransportOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            disable_compression: false,
            allow_http: false,
            max_header_list_size: 0,
            strict_max_concurrent_streams: false,
            read_idle_timeout: None,
            ping_timeout: None,
            write_byte_timeout: None,
            disable_keep_alives: false,
            max_conns_per_host: 0,
            idle_conn_timeout: None,
            response_header_timeout: None,
            expect_continue_timeout: None,
            dial_timeout: Some(DEFAULT_DIAL_TIMEOUT),
        }
    }

    /// Parses options from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the JSON is malformed or has wrong types.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::config(format!("invalid options: {e}")))
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl TransportOptions {
    /// Disables transparent gzip.
    #[inline]
    #[must_use]
    pub fn with_disable_compression(mut self) -> Self {
        self.disable_compression = true;
        self
    }

    /// Accepts `http://` URIs.
    #[inline]
    #[must_use]
    pub fn with_allow_http(mut self) -> Self {
        self.allow_http = true;
        self
    }

    /// Sets the advertised header list limit.
    #[inline]
    #[must_use]
    pub fn with_max_header_list_size(mut self, size: u32) -> Self {
        self.max_header_list_size = size;
        self
    }

    /// Treats the peer's stream limit as global.
    #[inline]
    #[must_use]
    pub fn with_strict_max_concurrent_streams(mut self) -> Self {
        self.strict_max_concurrent_streams = true;
        self
    }

    /// Enables the PING health check.
    #[inline]
    #[must_use]
    pub fn with_read_idle_timeout(mut self, timeout: Duration) -> Self {
        self.read_idle_timeout = Some(timeout);
        self
    }

    /// Sets the PING deadline.
    #[inline]
    #[must_use]
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = Some(timeout);
        self
    }

    /// Enables write-stall detection.
    #[inline]
    #[must_use]
    pub fn with_write_byte_timeout(mut self, timeout: Duration) -> Self {
        self.write_byte_timeout = Some(timeout);
        self
    }

    /// Disables connection reuse.
    #[inline]
    #[must_use]
    pub fn with_disable_keep_alives(mut self) -> Self {
        self.disable_keep_alives = true;
        self
    }

    /// Caps connections per destination.
    #[inline]
    #[must_use]
    pub fn with_max_conns_per_host(mut self, max: usize) -> Self {
        self.max_conns_per_host = max;
        self
    }

    /// Closes idle connections after `timeout`.
    #[inline]
    #[must_use]
    pub fn with_idle_conn_timeout(mut self, timeout: Duration) -> Self {
        self.idle_conn_timeout = Some(timeout);
        self
    }

    /// Bounds the wait for response headers.
    #[inline]
    #[must_use]
    pub fn with_response_header_timeout(mut self, timeout: Duration) -> Self {
        self.response_header_timeout = Some(timeout);
        self
    }

    /// Sets the `Expect: 100-continue` wait.
    #[inline]
    #[must_use]
    pub fn with_expect_continue_timeout(mut self, timeout: Duration) -> Self {
        self.expect_continue_timeout = Some(timeout);
        self
    }

    /// Sets the dial timeout. `None` waits indefinitely.
    #[inline]
    #[must_use]
    pub fn with_dial_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.dial_timeout = timeout;
        self
    }
}

// ============================================================================
// Conversion Methods
// ============================================================================

impl TransportOptions {
    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a configured timeout is zero.
    pub fn validate(&self) -> Result<()> {
        let timers = [
            ("read_idle_timeout", self.read_idle_timeout),
            ("ping_timeout", self.ping_timeout),
            ("write_byte_timeout", self.write_byte_timeout),
            ("idle_conn_timeout", self.idle_conn_timeout),
            ("response_header_timeout", self.response_header_timeout),
            ("dial_timeout", self.dial_timeout),
        ];

        if let Some((name, _)) = timers
            .iter()
            .find(|(_, value)| value.is_some_and(|d| d.is_zero()))
        {
            return Err(Error::config(format!(
                "{name} must be greater than zero; omit it to disable"
            )));
        }

        Ok(())
    }

    /// Engine settings derived from these options.
    #[must_use]
    pub fn to_engine_settings(&self, count_error: Option<CountErrorFn>) -> EngineSettings {
        EngineSettings {
            disable_compression: self.disable_compression,
            max_header_list_size: self.max_header_list_size,
            strict_max_concurrent_streams: self.strict_max_concurrent_streams,
            read_idle_timeout: self.read_idle_timeout,
            ping_timeout: self.ping_timeout,
            write_byte_timeout: self.write_byte_timeout,
            idle_conn_timeout: self.idle_conn_timeout,
            response_header_timeout: self.response_header_timeout,
            expect_continue_timeout: self.expect_continue_timeout,
            count_error,
        }
    }

    /// Pool policy derived from these options.
    #[must_use]
    pub fn to_pool_config(&self, count_error: Option<CountErrorFn>) -> PoolConfig {
        PoolConfig {
            max_conns_per_host: self.max_conns_per_host,
            disable_keep_alives: self.disable_keep_alives,
            count_error,
        }
    }
}

// ============================================================================
// Millisecond Durations
// ============================================================================

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub(super) fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .serialize(serializer)
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

// ============================================================================
// Tests
// ============================================================================
