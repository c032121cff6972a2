//! Per-destination connection group.
//!
//! A group owns every live connection to one destination. It picks a
//! connection for each request round-robin and grows itself in the
//! background while it is below the per-host cap.
//!
//! # Locking
//!
//! Group state sits behind an async mutex, so the first dial to a fresh
//! destination can hold it and make concurrent callers wait for that one
//! connection. Whenever the pool registry must be updated too, the group
//! lock is taken first.
//!
//! # Retirement
//!
//! A group that loses its last connection is flagged `retired` and dropped
//! from the registry. Callers still holding an `Arc` to it see the flag and
//! look the destination up again.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rustc_hash::FxHashMap;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{ConnectionId, Destination};

use super::connection::Connection;
use super::pool::PoolShared;

// ============================================================================
// Checkout
// ============================================================================

/// Outcome of asking a group for a connection.
#[derive(Debug)]
pub(crate) enum Checkout {
    /// A connection that can take the request.
    Ready(Connection),
    /// The group was retired; look the destination up again.
    Retired,
}

// ============================================================================
// GroupState
// ============================================================================

/// Mutable part of a group, guarded by the group lock.
#[derive(Debug, Default)]
pub(crate) struct GroupState {
    connections: Vec<Connection>,
    index: FxHashMap<ConnectionId, usize>,
    cursor: usize,
    retired: bool,
}

impl GroupState {
    /// Number of live connections.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.connections.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    #[inline]
    pub(crate) fn is_retired(&self) -> bool {
        self.retired
    }

    pub(crate) fn add_connection(&mut self, connection: Connection) {
        self.index.insert(connection.id(), self.connections.len());
        self.connections.push(connection);
    }

    /// Removes a connection in O(1) by swapping it with the last one.
    pub(crate) fn remove_connection(&mut self, id: ConnectionId) -> Option<Connection> {
        let position = self.index.remove(&id)?;
        let removed = self.connections.swap_remove(position);

        if let Some(moved) = self.connections.get(position) {
            self.index.insert(moved.id(), position);
        }

        Some(removed)
    }

    /// Empties the group and marks it retired, returning what it held.
    pub(crate) fn retire(&mut self) -> Vec<Connection> {
        self.retired = true;
        self.index.clear();
        self.cursor = 0;
        std::mem::take(&mut self.connections)
    }

    /// Picks the next connection that can take a request.
    ///
    /// Scans at most `len` candidates starting after the last one used.
    fn select(&mut self) -> Option<Connection> {
        let len = self.connections.len();

        for _ in 0..len {
            self.cursor = self.cursor.wrapping_add(1);
            let candidate = &self.connections[self.cursor % len];
            if candidate.can_take_new_request() {
                return Some(candidate.clone());
            }
        }

        None
    }

    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        self.index.len() == self.connections.len()
            && self
                .connections
                .iter()
                .enumerate()
                .all(|(i, c)| self.index.get(&c.id()) == Some(&i))
    }
}

// ============================================================================
// ConnectionGroup
// ============================================================================

/// All live connections to one destination.
#[derive(Debug)]
pub(crate) struct ConnectionGroup {
    destination: Destination,
    state: Mutex<GroupState>,
    dialing: AtomicBool,
}

impl ConnectionGroup {
    pub(crate) fn new(destination: Destination) -> Self {
        Self {
            destination,
            state: Mutex::new(GroupState::default()),
            dialing: AtomicBool::new(false),
        }
    }

    #[inline]
    pub(crate) fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Group lock.
    #[inline]
    pub(crate) fn state(&self) -> &Mutex<GroupState> {
        &self.state
    }

    /// Returns `true` while a background dial is running.
    #[inline]
    pub(crate) fn is_dialing(&self) -> bool {
        self.dialing.load(Ordering::Acquire)
    }

    /// Returns a connection for one request.
    ///
    /// Dials synchronously when the group is empty. Otherwise kicks off a
    /// background dial if below the cap and selects round-robin.
    ///
    /// # Errors
    ///
    /// - dial errors from the synchronous first dial
    /// - [`Error::NoAvailableConnection`] if every connection is saturated
    pub(crate) async fn get_connection(self: &Arc<Self>, pool: &Arc<PoolShared>) -> Result<Checkout> {
        let mut state = self.state.lock().await;

        if state.is_retired() {
            return Ok(Checkout::Retired);
        }

        if state.is_empty() {
            return match pool.factory().dial(&self.destination).await {
                Ok(connection) => {
                    pool.register(&mut state, connection.clone());
                    Ok(Checkout::Ready(connection))
                }
                Err(e) => {
                    debug!(destination = %self.destination, error = %e, "First dial failed");
                    pool.retire_group(&mut state, self);
                    Err(e)
                }
            };
        }

        let cap = pool.max_conns_per_host();
        if cap == 0 || state.len() < cap {
            self.spawn_dial(pool);
        }

        match state.select() {
            Some(connection) => {
                trace!(
                    destination = %self.destination,
                    connection_id = %connection.id(),
                    "Selected connection"
                );
                Ok(Checkout::Ready(connection))
            }
            None => Err(Error::no_available_connection(self.destination.clone())),
        }
    }

    /// Starts a background dial unless one is already running.
    fn spawn_dial(self: &Arc<Self>, pool: &Arc<PoolShared>) {
        if self
            .dialing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let group = Arc::clone(self);
        let pool = Arc::clone(pool);

        tokio::spawn(async move {
            let _guard = DialingGuard(&group.dialing);
            group.dial_in_background(&pool).await;
        });
    }

    async fn dial_in_background(&self, pool: &Arc<PoolShared>) {
        let cap = pool.max_conns_per_host();
        let has_room = |state: &GroupState| !state.is_retired() && (cap == 0 || state.len() < cap);

        if !has_room(&*self.state.lock().await) {
            return;
        }

        let connection = match pool.factory().dial(&self.destination).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!(destination = %self.destination, error = %e, "Background dial failed");
                pool.count_error(e.kind());
                return;
            }
        };

        let mut state = self.state.lock().await;
        if !has_room(&state) {
            debug!(
                destination = %self.destination,
                connection_id = %connection.id(),
                "Discarding background connection, group full or retired"
            );
            drop(state);
            connection.close();
            return;
        }

        pool.register(&mut state, connection);
    }
}

// ============================================================================
// DialingGuard
// ============================================================================

/// Clears the single-flight flag when the background dial ends.
struct DialingGuard<'a>(&'a AtomicBool);

impl Drop for DialingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ============================================================================
// Tests
// ============================================================================
