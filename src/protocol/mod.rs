//! Multiplexed protocol engine.
//!
//! The pool never speaks HTTP/2 itself. It only needs three things from the
//! protocol layer: build a session over a raw byte stream, ask whether a
//! session can take one more request, and learn when a session died.
//!
//! # Protocol Overview
//!
//! | Operation | Direction | Purpose |
//! |-----------|-----------|---------|
//! | `new_session` | Pool → Engine | Upgrade a dialed stream to a session |
//! | `can_take_new_request` | Pool → Session | Per-connection capacity check |
//! | `send_request` | Transport → Session | Perform one request |
//! | `closed` | Session → Pool | Retirement signal |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `engine` | Engine and session traits |
//! | `http2` | `h2`-backed engine |
//! | `compression` | Transparent gzip support |
//! | `stall` | Write-stall detection for raw streams |

// ============================================================================
// Submodules
// ============================================================================

/// Engine and session traits.
pub mod engine;

/// HTTP/2 engine on top of the `h2` crate.
pub mod http2;

/// Transparent response decompression.
pub(crate) mod compression;

/// Write-stall detection wrapper.
pub(crate) mod stall;

// ============================================================================
// Re-exports
// ============================================================================

pub use engine::{AsyncIo, BoxedIo, ProtocolEngine, Session};
pub use http2::{CountErrorFn, EngineSettings, Http2Engine, NEXT_PROTO_TLS};
