//! Connection management.
//!
//! Dialing, per-destination grouping and the pool registry.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐   get_connection   ┌──────────────────┐
//! │   Transport    │───────────────────►│  ConnectionPool  │
//! └────────────────┘                    │  dest → group    │
//!                                       └────────┬─────────┘
//!                                                │
//!                                       ┌────────▼─────────┐  dial   ┌───────────────────┐
//!                                       │ ConnectionGroup  │────────►│ ConnectionFactory │
//!                                       │ round-robin,     │         │ TLS + ALPN,       │
//!                                       │ background grow  │         │ engine handshake  │
//!                                       └──────────────────┘         └───────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `ConnectionFactory::dial` - TCP + TLS (or custom dialer), engine handshake
//! 2. Group registers it and the pool records its owner
//! 3. Requests select it round-robin while it can take streams
//! 4. Session closes (GOAWAY, I/O error, idle, failed PING)
//! 5. `ConnectionPool::mark_dead` - removed from group and owner map
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Pooled connection handle |
//! | `factory` | Dialing and session setup |
//! | `group` | Per-destination selection and growth |
//! | `pool` | Destination registry and retirement |
//! | `tls` | TLS configuration resolution |

// ============================================================================
// Submodules
// ============================================================================

/// Pooled connection handle.
pub mod connection;

/// Dialing and session setup.
pub mod factory;

/// Per-destination connection group.
mod group;

/// Destination registry and retirement.
pub mod pool;

/// TLS configuration.
pub mod tls;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::Connection;
pub use factory::{ConnectionFactory, DialFn};
pub use pool::{ConnectionPool, PoolConfig};
pub use tls::TlsConfig;
