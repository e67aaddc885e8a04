//! Connection pooling for cluster nodes.
//!
//! One bounded [`NodePool`] exists per node address. Pools are created lazily
//! the first time a node is needed and retired when the node disappears from a
//! refreshed topology. Each pool has its own lock and semaphore, so borrowing
//! from one node never waits on another.

use std::collections::{HashMap, HashSet};
use std::io;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::seq::IteratorRandom;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::debug;

use crate::core::connection::{ConnectionConfig, NodeConnection};
use crate::{Error, Result};

/// Configuration for per-node connection pools.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfig {
    /// Maximum number of connections per node, borrowed or idle.
    pub max_connections_per_node: usize,
    /// How long a borrow waits for a free connection before failing.
    pub wait_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections_per_node: 8,
            wait_timeout: Duration::from_millis(2000),
        }
    }
}

/// A bounded pool of connections to a single node.
#[derive(Debug)]
pub struct NodePool {
    address: String,
    connection: ConnectionConfig,
    wait_timeout: Duration,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<NodeConnection>>,
    closed: AtomicBool,
}

impl NodePool {
    /// Creates an empty pool for `address`. No connection is opened until the first borrow.
    pub fn new(address: impl Into<String>, connection: ConnectionConfig, config: &PoolConfig) -> Self {
        Self {
            address: address.into(),
            connection,
            wait_timeout: config.wait_timeout,
            permits: Arc::new(Semaphore::new(config.max_connections_per_node.max(1))),
            idle: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Node address served by this pool.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Borrows a connection, reusing an idle one or opening a new one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] if no capacity frees up within the wait
    /// timeout, an IO error if the pool has been retired, and any connect or
    /// handshake failure of a fresh connection.
    pub async fn borrow(self: &Arc<Self>) -> Result<PooledConnection> {
        if self.is_closed() {
            return Err(retired(&self.address));
        }

        let permit = match timeout(self.wait_timeout, Arc::clone(&self.permits).acquire_owned()).await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(retired(&self.address)),
            Err(_) => {
                return Err(Error::PoolExhausted {
                    address: self.address.clone(),
                    waited: self.wait_timeout,
                })
            }
        };

        let reused = {
            let mut idle = self.idle.lock();
            std::iter::from_fn(|| idle.pop()).find(|conn| !conn.is_broken())
        };

        let conn = match reused {
            Some(conn) => conn,
            None => {
                debug!(node = %self.address, "opening pooled connection");
                NodeConnection::connect(&self.address, &self.connection).await?
            }
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(self),
            discard: false,
            _permit: permit,
        })
    }

    /// Drops every idle connection. Borrowed connections are unaffected.
    pub fn invalidate(&self) {
        let dropped = std::mem::take(&mut *self.idle.lock());
        if !dropped.is_empty() {
            debug!(node = %self.address, count = dropped.len(), "invalidated idle connections");
        }
    }

    /// Retires the pool: idle connections are dropped and further borrows fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.permits.close();
        self.idle.lock().clear();
    }

    /// Returns true once the pool has been retired.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of idle connections ready for reuse.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    fn release(&self, conn: NodeConnection) {
        if conn.is_broken() || self.is_closed() {
            return;
        }
        self.idle.lock().push(conn);
    }
}

fn retired(address: &str) -> Error {
    Error::Io {
        source: io::Error::new(
            io::ErrorKind::NotConnected,
            format!("pool for {} has been retired", address),
        ),
    }
}

/// A connection borrowed from a [`NodePool`].
///
/// Dropping the guard hands the connection back to the pool unless it broke or
/// was explicitly discarded. The pool slot is released in either case.
#[derive(Debug)]
pub struct PooledConnection {
    conn: Option<NodeConnection>,
    pool: Arc<NodePool>,
    discard: bool,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// Closes the connection instead of returning it to the pool.
    pub fn discard(mut self) {
        self.discard = true;
    }
}

impl Deref for PooledConnection {
    type Target = NodeConnection;

    fn deref(&self) -> &NodeConnection {
        self.conn.as_ref().unwrap_or_else(|| unreachable!("connection taken before drop"))
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut NodeConnection {
        self.conn.as_mut().unwrap_or_else(|| unreachable!("connection taken before drop"))
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if !self.discard {
                self.pool.release(conn);
            }
        }
    }
}

/// Registry of node pools keyed by address.
#[derive(Debug)]
pub struct PoolRegistry {
    pools: RwLock<HashMap<String, Arc<NodePool>>>,
    connection: ConnectionConfig,
    config: PoolConfig,
}

impl PoolRegistry {
    /// Creates an empty registry; pools share the given settings.
    pub fn new(connection: ConnectionConfig, config: PoolConfig) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            connection,
            config,
        }
    }

    /// Returns the pool for `address`, creating it on first use.
    pub fn get_or_create(&self, address: &str) -> Arc<NodePool> {
        if let Some(pool) = self.pools.read().get(address) {
            return Arc::clone(pool);
        }

        let mut pools = self.pools.write();
        let pool = pools.entry(address.to_string()).or_insert_with(|| {
            debug!(node = %address, "registering node pool");
            Arc::new(NodePool::new(address, self.connection.clone(), &self.config))
        });
        Arc::clone(pool)
    }

    /// Settings used for every connection opened by this registry.
    pub fn connection_config(&self) -> &ConnectionConfig {
        &self.connection
    }

    /// Returns the pool for `address` if one is registered.
    pub fn get(&self, address: &str) -> Option<Arc<NodePool>> {
        self.pools.read().get(address).cloned()
    }

    /// Retires and removes every pool whose address is not in `live`.
    ///
    /// Returns the retired addresses.
    pub fn retain(&self, live: &HashSet<String>) -> Vec<String> {
        let mut pools = self.pools.write();
        let stale: Vec<String> = pools
            .keys()
            .filter(|address| !live.contains(*address))
            .cloned()
            .collect();

        for address in &stale {
            if let Some(pool) = pools.remove(address) {
                pool.close();
            }
        }
        stale
    }

    /// Picks a registered pool at random.
    pub fn random(&self) -> Option<Arc<NodePool>> {
        self.pools
            .read()
            .values()
            .choose(&mut rand::thread_rng())
            .cloned()
    }

    /// Addresses of every registered node, sorted.
    pub fn nodes(&self) -> Vec<String> {
        let mut nodes: Vec<String> = self.pools.read().keys().cloned().collect();
        nodes.sort();
        nodes
    }

    /// Number of registered pools.
    pub fn len(&self) -> usize {
        self.pools.read().len()
    }

    /// Returns true if no pool is registered.
    pub fn is_empty(&self) -> bool {
        self.pools.read().is_empty()
    }

    /// Retires every pool.
    pub fn close_all(&self) {
        for (_, pool) in self.pools.write().drain() {
            pool.close();
        }
    }
}
