//! h2-pool - HTTP/2 client transport that scales across connections.
//!
//! Standard HTTP/2 clients keep one connection per host and queue requests
//! once the peer's `SETTINGS_MAX_CONCURRENT_STREAMS` is reached. This crate
//! treats that limit as a per-connection capacity signal instead and opens
//! more connections to the same host, up to a configurable cap.
//!
//! # Architecture
//!
//! - **Transport**: configuration and lazy wiring, one `round_trip` entry point
//! - **Pool**: registry of per-destination groups, retirement of dead connections
//! - **Group**: round-robin selection, single-flight background growth
//! - **Factory**: TCP + TLS dial (or custom dialer), ALPN check, engine handshake
//! - **Engine**: `h2` sessions with health checks and stall detection
//!
//! Key design principles:
//!
//! - The engine's capacity answer is the only source of truth for load
//! - A request blocks on a dial only when its destination has no connection
//! - At most one growth dial per destination is in flight
//! - Group lock before pool lock, on every path
//!
//! # Quick Start
//!
//! ```no_run
//! use bytes::Bytes;
//! use h2_pool::{Result, Transport, TransportOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let transport = Transport::builder()
//!         .options(TransportOptions::new().with_max_conns_per_host(4))
//!         .build()?;
//!
//!     let request = http::Request::get("https://example.com/").body(Bytes::new())?;
//!     let response = transport.round_trip(request).await?;
//!     println!("status: {}", response.status());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`Transport`], builder and options |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | [`ConnectionId`] and [`Destination`] |
//! | [`protocol`] | Engine traits and the `h2` engine |
//! | [`transport`] | Factory, groups and pool |

// ============================================================================
// Modules
// ============================================================================

/// Client-facing transport.
///
/// Use [`Transport::builder()`] to create a configured transport.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Connection identities and destinations.
pub mod identifiers;

/// Protocol engine traits and the HTTP/2 engine.
pub mod protocol;

/// Connection dialing and pooling.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{Transport, TransportBuilder, TransportOptions};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ConnectionId, Destination};

// Protocol types
pub use protocol::{BoxedIo, CountErrorFn, EngineSettings, Http2Engine, ProtocolEngine, Session};

// Transport types
pub use transport::{Connection, ConnectionFactory, ConnectionPool, DialFn, PoolConfig, TlsConfig};
