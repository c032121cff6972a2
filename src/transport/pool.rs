//! Connection pool for multiplexed HTTP/2 sessions.
//!
//! Keeps one [`ConnectionGroup`] per destination and is the single entry
//! point the transport calls to obtain a connection.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               ConnectionPool                 │
//! │  groups:                                     │
//! │    a.example:443 → [conn-1, conn-4]          │
//! │    b.example:443 → [conn-2]                  │
//! │  owners:                                     │
//! │    conn-1 → a.example:443                    │
//! │    conn-2 → b.example:443                    │
//! │    conn-4 → a.example:443                    │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! A connection is in `owners` exactly when it is in some group. Both maps
//! live under one `parking_lot` mutex that is never held across an await.
//!
//! # Retirement
//!
//! Every registered connection gets a watcher task that waits for the
//! session to close and then calls [`ConnectionPool::mark_dead`]. Callers
//! that see a connection-level error can call it directly as well; repeated
//! calls are no-ops.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::error::Result;
use crate::identifiers::{ConnectionId, Destination};
use crate::protocol::CountErrorFn;

use super::connection::Connection;
use super::factory::ConnectionFactory;
use super::group::{Checkout, ConnectionGroup, GroupState};

// ============================================================================
// PoolConfig
// ============================================================================

/// Pool policy.
#[derive(Clone, Default)]
pub struct PoolConfig {
    /// Upper bound on connections per destination. Zero means unlimited.
    pub max_conns_per_host: usize,

    /// Dial a fresh, unpooled connection for every request.
    pub disable_keep_alives: bool,

    /// Receives error classes from swallowed background dial failures.
    pub count_error: Option<CountErrorFn>,
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("max_conns_per_host", &self.max_conns_per_host)
            .field("disable_keep_alives", &self.disable_keep_alives)
            .field("count_error", &self.count_error.is_some())
            .finish()
    }
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Default)]
struct Registry {
    groups: FxHashMap<Destination, Arc<ConnectionGroup>>,
    owners: FxHashMap<ConnectionId, Connection>,
}

impl Registry {
    /// Drops `group` from the registry if it is still the one registered.
    fn remove_group(&mut self, group: &Arc<ConnectionGroup>) -> bool {
        let current = self.groups.get(group.destination());
        if current.is_some_and(|g| Arc::ptr_eq(g, group)) {
            self.groups.remove(group.destination());
            true
        } else {
            false
        }
    }
}

// ============================================================================
// PoolShared
// ============================================================================

/// State shared by pool handles, groups and watcher tasks.
pub(crate) struct PoolShared {
    config: PoolConfig,
    factory: ConnectionFactory,
    registry: Mutex<Registry>,
}

impl PoolShared {
    #[inline]
    pub(crate) fn factory(&self) -> &ConnectionFactory {
        &self.factory
    }

    #[inline]
    pub(crate) fn max_conns_per_host(&self) -> usize {
        self.config.max_conns_per_host
    }

    pub(crate) fn count_error(&self, kind: &'static str) {
        if let Some(count) = &self.config.count_error {
            count(kind);
        }
    }

    /// Returns the group for `destination`, creating it if needed.
    fn group_for(&self, destination: &Destination) -> Arc<ConnectionGroup> {
        let mut registry = self.registry.lock();
        let group = registry
            .groups
            .entry(destination.clone())
            .or_insert_with(|| {
                debug!(destination = %destination, "Created connection group");
                Arc::new(ConnectionGroup::new(destination.clone()))
            });
        Arc::clone(group)
    }

    /// Adds a connection to a group and the owner map.
    ///
    /// Caller holds the group lock.
    pub(crate) fn register(self: &Arc<Self>, state: &mut GroupState, connection: Connection) {
        state.add_connection(connection.clone());
        self.registry
            .lock()
            .owners
            .insert(connection.id(), connection.clone());

        debug!(
            destination = %connection.destination(),
            connection_id = %connection.id(),
            group_size = state.len(),
            "Registered connection"
        );

        self.watch(connection);
    }

    /// Retires an empty group after its first dial failed.
    ///
    /// Caller holds the group lock.
    pub(crate) fn retire_group(&self, state: &mut GroupState, group: &Arc<ConnectionGroup>) {
        if !state.is_empty() {
            return;
        }
        state.retire();
        if self.registry.lock().remove_group(group) {
            debug!(destination = %group.destination(), "Removed connection group");
        }
    }

    /// Spawns the task that retires `connection` once its session closes.
    fn watch(self: &Arc<Self>, connection: Connection) {
        let pool: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            connection.closed().await;
            if let Some(pool) = pool.upgrade() {
                pool.mark_dead(&connection).await;
            }
        });
    }

    fn owning_group(&self, connection: &Connection) -> Option<Arc<ConnectionGroup>> {
        let registry = self.registry.lock();
        let owner = registry.owners.get(&connection.id())?;
        registry.groups.get(owner.destination()).cloned()
    }

    async fn mark_dead(&self, connection: &Connection) {
        let Some(group) = self.owning_group(connection) else {
            return;
        };

        let mut state = group.state().lock().await;
        let removed_group = {
            let mut registry = self.registry.lock();

            // Lost a race with another retirement.
            if registry.owners.remove(&connection.id()).is_none() {
                return;
            }
            state.remove_connection(connection.id());

            if state.is_empty() {
                state.retire();
                registry.remove_group(&group)
            } else {
                false
            }
        };
        drop(state);

        connection.close();

        debug!(
            destination = %group.destination(),
            connection_id = %connection.id(),
            "Retired connection"
        );
        if removed_group {
            debug!(destination = %group.destination(), "Removed connection group");
        }
    }

    async fn close_all(&self) {
        let groups: Vec<_> = self.registry.lock().groups.values().cloned().collect();

        for group in groups {
            let mut state = group.state().lock().await;
            let drained = {
                let mut registry = self.registry.lock();
                let drained = state.retire();
                for connection in &drained {
                    registry.owners.remove(&connection.id());
                }
                registry.remove_group(&group);
                drained
            };
            drop(state);

            for connection in drained {
                connection.close();
            }
        }
    }
}

impl Drop for PoolShared {
    fn drop(&mut self) {
        let registry = self.registry.get_mut();
        for connection in registry.owners.values() {
            connection.close();
        }
        registry.owners.clear();
        registry.groups.clear();
    }
}

// ============================================================================
// ConnectionPool
// ============================================================================

/// Registry of per-destination connection groups.
///
/// Cheap to clone; clones share the same registry. Sessions are closed when
/// the last handle (and the last background task) goes away.
///
/// # Example
///
/// ```ignore
/// let pool = ConnectionPool::new(factory, PoolConfig::default());
/// let destination: Destination = "example.com:443".parse()?;
///
/// let connection = pool.get_connection(&destination).await?;
/// let response = connection.send_request(request).await?;
/// ```
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.shared.config)
            .field("groups", &self.group_count())
            .field("connections", &self.total_connections())
            .finish()
    }
}

// ============================================================================
// ConnectionPool - Constructor
// ============================================================================

impl ConnectionPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new(factory: ConnectionFactory, config: PoolConfig) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                config,
                factory,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Returns the pool policy.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }
}

// ============================================================================
// ConnectionPool - Checkout
// ============================================================================

impl ConnectionPool {
    /// Returns a connection for one request to `destination`.
    ///
    /// With keep-alives disabled every call dials a fresh connection that is
    /// never registered; the caller closes it after use.
    ///
    /// # Errors
    ///
    /// - dial errors when a synchronous dial is needed and fails
    /// - [`crate::Error::NoAvailableConnection`] when every connection is saturated
    pub async fn get_connection(&self, destination: &Destination) -> Result<Connection> {
        if self.shared.config.disable_keep_alives {
            return self.shared.factory.dial(destination).await;
        }

        loop {
            let group = self.shared.group_for(destination);
            match group.get_connection(&self.shared).await? {
                Checkout::Ready(connection) => return Ok(connection),
                Checkout::Retired => continue,
            }
        }
    }

    /// Retires a connection that can no longer carry requests.
    ///
    /// Removes it from its group and drops the group once empty. Unknown or
    /// already retired connections are ignored.
    pub async fn mark_dead(&self, connection: &Connection) {
        self.shared.mark_dead(connection).await;
    }

    /// Retires every group and closes every pooled session.
    pub async fn close_all(&self) {
        let count = self.total_connections();
        self.shared.close_all().await;
        info!(connections = count, "Connection pool closed");
    }
}

// ============================================================================
// ConnectionPool - Introspection
// ============================================================================

impl ConnectionPool {
    /// Number of destinations with a live group.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.shared.registry.lock().groups.len()
    }

    /// Number of pooled connections to `destination`.
    #[must_use]
    pub fn connection_count(&self, destination: &Destination) -> usize {
        self.shared
            .registry
            .lock()
            .owners
            .values()
            .filter(|c| c.destination() == destination)
            .count()
    }

    /// Number of pooled connections across all destinations.
    #[must_use]
    pub fn total_connections(&self) -> usize {
        self.shared.registry.lock().owners.len()
    }

    /// Returns `true` if `connection` is currently pooled.
    #[must_use]
    pub fn contains(&self, connection: &Connection) -> bool {
        self.shared
            .registry
            .lock()
            .owners
            .contains_key(&connection.id())
    }

    /// Returns `true` while a background dial to `destination` is running.
    #[must_use]
    pub fn is_dialing(&self, destination: &Destination) -> bool {
        self.shared
            .registry
            .lock()
            .groups
            .get(destination)
            .is_some_and(|g| g.is_dialing())
    }
}

// ============================================================================
// Tests
// ============================================================================
