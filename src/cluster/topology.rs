//! Cluster topology: the slot → node-pool map.
//!
//! The map lives behind an [`Arc`] snapshot. A refresh builds a complete new
//! [`SlotTable`] and swaps the pointer, so dispatches already holding the old
//! snapshot finish against it undisturbed. A MOVED reply rewrites a single
//! entry in place; every entry has its own lock.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use super::commands::cluster_slots;
use super::pool::{NodePool, PoolRegistry};
use super::slot::SLOT_COUNT;
use crate::core::connection::NodeConnection;
use crate::proto::frame::Frame;
use crate::{Error, Result};

/// A range of hash slots and the nodes serving it, as reported by CLUSTER SLOTS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRange {
    /// Start of the slot range (inclusive)
    pub start: u16,
    /// End of the slot range (inclusive)
    pub end: u16,
    /// Address of the master serving this range
    pub master: String,
    /// Addresses of its replicas
    pub replicas: Vec<String>,
}

impl SlotRange {
    /// Returns true if the given slot is within this range.
    pub fn contains(&self, slot: u16) -> bool {
        slot >= self.start && slot <= self.end
    }

    /// Returns the number of slots in this range.
    pub fn len(&self) -> usize {
        (self.end - self.start + 1) as usize
    }

    /// Returns true if this range is empty (invalid).
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

/// Parses a CLUSTER SLOTS reply.
///
/// `queried_host` replaces an empty host field, which nodes send when they
/// only know the endpoint the client used to reach them.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the reply is not an array of ranges, a range
/// lies outside `0..16384`, or a master entry is malformed. Malformed replica
/// entries are skipped.
pub fn parse_cluster_slots(frame: Frame, queried_host: &str) -> Result<Vec<SlotRange>> {
    let Frame::Array(entries) = frame else {
        return Err(protocol("CLUSTER SLOTS response must be an array"));
    };

    let mut ranges = Vec::with_capacity(entries.len());
    for entry in entries {
        let Frame::Array(parts) = entry else {
            return Err(protocol("slot range must be an array"));
        };
        if parts.len() < 3 {
            return Err(protocol("slot range must have at least 3 elements"));
        }

        let start = parse_slot(&parts[0])?;
        let end = parse_slot(&parts[1])?;
        if end < start {
            return Err(protocol("slot range end precedes start"));
        }

        let master = parse_node(&parts[2], queried_host)?;
        let replicas = parts[3..]
            .iter()
            .filter_map(|node| parse_node(node, queried_host).ok())
            .collect();

        ranges.push(SlotRange {
            start,
            end,
            master,
            replicas,
        });
    }
    Ok(ranges)
}

fn parse_slot(frame: &Frame) -> Result<u16> {
    match frame {
        Frame::Integer(n) if (0..SLOT_COUNT as i64).contains(n) => Ok(*n as u16),
        _ => Err(protocol("slot bound must be an integer in 0..16384")),
    }
}

fn parse_node(frame: &Frame, queried_host: &str) -> Result<String> {
    let parts = frame
        .as_array()
        .ok_or_else(|| protocol("node info must be an array"))?;
    if parts.len() < 2 {
        return Err(protocol("node info must have host and port"));
    }

    let host = parts[0]
        .as_bytes()
        .map(|h| String::from_utf8_lossy(h).into_owned())
        .ok_or_else(|| protocol("node host must be a string"))?;
    let host = if host.is_empty() || host == "?" {
        queried_host.to_string()
    } else {
        host
    };

    let port = match &parts[1] {
        Frame::Integer(p) if (1..=u16::MAX as i64).contains(p) => *p,
        _ => return Err(protocol("node port must be an integer in 1..65536")),
    };

    Ok(join_host_port(&host, port))
}

/// Formats `host:port`, bracketing IPv6 literals.
pub(crate) fn join_host_port(host: &str, port: i64) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Host part of a `host:port` address.
pub(crate) fn host_of(address: &str) -> &str {
    let host = address.rsplit_once(':').map_or(address, |(host, _)| host);
    host.trim_start_matches('[').trim_end_matches(']')
}

fn protocol(message: &str) -> Error {
    Error::Protocol {
        message: message.to_string(),
    }
}

/// One immutable-shape slot map: 16384 independently locked entries.
pub struct SlotTable {
    slots: Box<[RwLock<Option<Arc<NodePool>>>]>,
}

impl SlotTable {
    /// Creates a table with every slot unassigned.
    pub fn empty() -> Self {
        Self {
            slots: (0..SLOT_COUNT).map(|_| RwLock::new(None)).collect(),
        }
    }

    /// Builds a table from parsed ranges, creating master pools through `registry`.
    pub fn from_ranges(ranges: &[SlotRange], registry: &PoolRegistry) -> Self {
        let table = Self::empty();
        for range in ranges {
            let pool = registry.get_or_create(&range.master);
            for slot in range.start..=range.end {
                table.set(slot, Arc::clone(&pool));
            }
        }
        table
    }

    /// Pool currently owning `slot`.
    pub fn get(&self, slot: u16) -> Option<Arc<NodePool>> {
        self.slots.get(slot as usize)?.read().clone()
    }

    /// Points `slot` at `pool`.
    pub fn set(&self, slot: u16, pool: Arc<NodePool>) {
        if let Some(entry) = self.slots.get(slot as usize) {
            *entry.write() = Some(pool);
        }
    }

    /// Number of assigned slots.
    pub fn covered(&self) -> usize {
        self.slots.iter().filter(|entry| entry.read().is_some()).count()
    }
}

impl std::fmt::Debug for SlotTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotTable")
            .field("covered", &self.covered())
            .finish()
    }
}

/// Live cluster view shared by every dispatch of a client.
#[derive(Debug)]
pub struct Topology {
    registry: PoolRegistry,
    table: RwLock<Arc<SlotTable>>,
    seeds: Vec<String>,
    refresh_lock: tokio::sync::Mutex<()>,
    generation: AtomicU64,
    closed: AtomicBool,
}

impl Topology {
    /// Creates an empty topology that bootstraps from `seeds`.
    pub fn new(seeds: Vec<String>, registry: PoolRegistry) -> Self {
        Self {
            registry,
            table: RwLock::new(Arc::new(SlotTable::empty())),
            seeds,
            refresh_lock: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Current slot table. Holders keep a consistent view across a concurrent refresh.
    pub fn snapshot(&self) -> Arc<SlotTable> {
        self.table.read().clone()
    }

    /// Pool owning `slot` in the current snapshot.
    pub fn pool_for_slot(&self, slot: u16) -> Option<Arc<NodePool>> {
        self.snapshot().get(slot)
    }

    /// Address of the node owning `slot`.
    pub fn slot_owner(&self, slot: u16) -> Option<String> {
        self.pool_for_slot(slot).map(|pool| pool.address().to_string())
    }

    /// Returns true if every slot has an owner.
    pub fn is_fully_covered(&self) -> bool {
        self.snapshot().covered() == SLOT_COUNT as usize
    }

    /// Connection pools keyed by node address.
    pub fn registry(&self) -> &PoolRegistry {
        &self.registry
    }

    /// Number of completed refreshes.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Returns true once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Records a MOVED redirect: `slot` now belongs to `address`.
    ///
    /// Only that slot's entry changes; the pool is created if the node is new.
    /// Returns `None` once the topology is closed.
    pub fn apply_moved(&self, slot: u16, address: &str) -> Option<Arc<NodePool>> {
        if self.is_closed() {
            return None;
        }
        let pool = self.registry.get_or_create(address);
        self.snapshot().set(slot, Arc::clone(&pool));
        debug!(slot, node = %address, "slot moved");
        Some(pool)
    }

    /// Installs a freshly discovered slot layout and retires pools of vanished nodes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClientClosed`] if the topology was closed; nothing is installed.
    pub fn install(&self, ranges: &[SlotRange]) -> Result<()> {
        let covered = {
            // The write lock orders this against `close`.
            let mut current = self.table.write();
            if self.is_closed() {
                return Err(Error::ClientClosed);
            }
            let table = Arc::new(SlotTable::from_ranges(ranges, &self.registry));
            let covered = table.covered();
            *current = table;
            covered
        };

        let live: HashSet<String> = ranges.iter().map(|r| r.master.clone()).collect();
        for address in self.registry.retain(&live) {
            info!(node = %address, "retired pool for node no longer in topology");
        }
        info!(ranges = ranges.len(), covered, nodes = live.len(), "installed cluster topology");
        Ok(())
    }

    /// Rediscovers the slot layout with CLUSTER SLOTS.
    ///
    /// Concurrent callers coalesce: a caller that had to wait while another
    /// refresh completed returns without issuing its own. Known nodes are tried
    /// in random order, then the seeds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoReachableNode`] if no candidate answered with a valid
    /// layout and [`Error::ClientClosed`] once the topology is closed.
    pub async fn refresh(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ClientClosed);
        }
        let observed = self.generation();
        let _guard = self.refresh_lock.lock().await;
        if self.is_closed() {
            return Err(Error::ClientClosed);
        }
        if self.generation() != observed {
            debug!("topology refreshed concurrently, reusing result");
            return Ok(());
        }

        let ranges = self.discover().await?;
        self.install(&ranges)?;
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn discover(&self) -> Result<Vec<SlotRange>> {
        let mut known = self.registry.nodes();
        known.shuffle(&mut rand::thread_rng());

        for address in &known {
            let Some(pool) = self.registry.get(address) else {
                continue;
            };
            let attempt = async {
                let mut conn = pool.borrow().await?;
                let reply = conn.send_command(cluster_slots()).await?;
                parse_cluster_slots(reply, host_of(address))
            };
            match attempt.await {
                Ok(ranges) => return Ok(ranges),
                Err(e) => warn!(node = %address, error = %e, "CLUSTER SLOTS failed"),
            }
        }

        for seed in self.seeds.iter().filter(|seed| !known.contains(seed)) {
            let attempt = async {
                let mut conn =
                    NodeConnection::connect(seed, self.registry.connection_config()).await?;
                let reply = conn.send_command(cluster_slots()).await?;
                parse_cluster_slots(reply, host_of(seed))
            };
            match attempt.await {
                Ok(ranges) => return Ok(ranges),
                Err(e) => warn!(node = %seed, error = %e, "CLUSTER SLOTS failed on seed"),
            }
        }

        Err(Error::NoReachableNode)
    }

    /// Retires every pool and clears the slot map. Later refreshes fail.
    pub fn close(&self) {
        {
            let mut current = self.table.write();
            self.closed.store(true, Ordering::Release);
            *current = Arc::new(SlotTable::empty());
        }
        self.registry.close_all();
    }
}
