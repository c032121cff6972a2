//! Client-facing transport.
//!
//! This module provides the main entry point for sending requests.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Transport`] | Request entry point owning the pool |
//! | [`TransportBuilder`] | Fluent configuration builder |
//! | [`TransportOptions`] | Serializable tuning knobs |
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use h2_pool::{Result, Transport, TransportOptions};
//!
//! # async fn example() -> Result<()> {
//! let transport = Transport::builder()
//!     .options(TransportOptions::new().with_max_conns_per_host(4))
//!     .build()?;
//!
//! let request = http::Request::get("https://example.com/").body(Bytes::new())?;
//! let response = transport.round_trip(request).await?;
//! println!("{}", response.status());
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for transport configuration.
pub mod builder;

/// Core transport implementation.
pub mod core;

/// Serializable transport options.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::TransportBuilder;
pub use core::Transport;
pub use options::TransportOptions;
