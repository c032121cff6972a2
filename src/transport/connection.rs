//! Pooled connection handle.
//!
//! A [`Connection`] pairs a protocol session with its identity and the
//! destination it was dialed for. Clones share the same session; equality
//! and hashing use the [`ConnectionId`] only, so a handle can key maps
//! without touching the session.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use bytes::Bytes;
use http::{Request, Response};

use crate::error::Result;
use crate::identifiers::{ConnectionId, Destination};
use crate::protocol::Session;

// ============================================================================
// Connection
// ============================================================================

/// Handle to a live multiplexed session.
///
/// Owned by its connection group while live and borrowed by in-flight
/// requests.
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    destination: Destination,
    session: Arc<dyn Session>,
}

impl Connection {
    /// Wraps a freshly established session.
    #[must_use]
    pub fn new(destination: Destination, session: Arc<dyn Session>) -> Self {
        Self {
            id: ConnectionId::next(),
            destination,
            session,
        }
    }

    /// Returns the connection identity.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the destination this connection serves.
    #[inline]
    #[must_use]
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Returns the underlying session.
    #[inline]
    #[must_use]
    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    /// Returns `true` if the session can take one more concurrent request.
    #[inline]
    #[must_use]
    pub fn can_take_new_request(&self) -> bool {
        self.session.can_take_new_request()
    }

    /// Performs a request on this connection.
    ///
    /// # Errors
    ///
    /// Whatever the session reports; see [`crate::Error::is_connection_error`]
    /// to tell a broken connection from a failed stream.
    pub async fn send_request(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
        self.session.send_request(request).await
    }

    /// Resolves once the session is unusable.
    pub async fn closed(&self) {
        self.session.closed().await;
    }

    /// Starts closing the session.
    #[inline]
    pub fn close(&self) {
        self.session.close();
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Connection {}

impl Hash for Connection {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}
