//! Engine and session traits consumed by the pool.
//!
//! Implementations own all framing, flow control and settings negotiation.
//! The pool treats a [`Session`] as an opaque handle plus a capacity query.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

// ============================================================================
// Types
// ============================================================================

/// Byte stream a session can run over.
///
/// Blanket-implemented for every `AsyncRead + AsyncWrite` stream, so TLS
/// streams, TCP streams and in-memory pipes all qualify.
pub trait AsyncIo: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> AsyncIo for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased raw connection handed from the dialer to the engine.
pub type BoxedIo = Box<dyn AsyncIo>;

// ============================================================================
// ProtocolEngine
// ============================================================================

/// Builds multiplexed sessions over raw connections.
#[async_trait]
pub trait ProtocolEngine: Send + Sync + 'static {
    /// Performs the protocol handshake over `io`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Session`] (or an I/O error) if the peer does
    /// not complete the handshake.
    async fn new_session(&self, io: BoxedIo) -> Result<Arc<dyn Session>>;
}

// ============================================================================
// Session
// ============================================================================

/// A live multiplexed session.
#[async_trait]
pub trait Session: Send + Sync + 'static {
    /// Returns `true` if one more concurrent request fits right now.
    ///
    /// This is the source of truth for capacity; the pool never tracks
    /// streams itself.
    fn can_take_new_request(&self) -> bool;

    /// Performs a request and buffers the full response body.
    async fn send_request(&self, request: Request<Bytes>) -> Result<Response<Bytes>>;

    /// Resolves once the session can no longer carry requests.
    async fn closed(&self);

    /// Starts shutting the session down. Idempotent.
    fn close(&self);
}
