//! Cluster client: slot-routed command execution over per-node pools.

use std::sync::Arc;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use tokio::time::Instant;
use tracing::{debug, info};

use super::config::{parse_seed, parse_seeds, ClusterConfig};
use super::dispatch::{run_on_any, run_on_slot, RetryPolicy};
use super::pool::PoolRegistry;
use super::slot::{merge_keys, pattern_slot, validate_single_slot};
use super::topology::Topology;
use crate::core::builder::ClusterClientBuilder;
use crate::core::command::{self, BitOp, Cmd};
use crate::core::connection::NodeConnection;
use crate::proto::frame::Frame;
use crate::{Error, Result};

/// Client for a sharded cluster.
///
/// Every command is routed to the node owning its key's hash slot. Stale
/// routing is repaired transparently: `MOVED` and `ASK` redirects are followed
/// and connection failures are retried, all within a per-command attempt and
/// time budget. Cloning is cheap and clones share pools and topology.
///
/// # Example
///
/// ```no_run
/// use shardline::ClusterClient;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = ClusterClient::connect("127.0.0.1:7000,127.0.0.1:7001").await?;
/// client.set("foo", "bar").await?;
/// assert_eq!(client.get("foo").await?.as_deref(), Some(&b"bar"[..]));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ClusterClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: ClusterConfig,
    policy: RetryPolicy,
    topology: Topology,
}

impl ClusterClient {
    /// Connects using a comma-separated seed list and default settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for malformed seeds and
    /// [`Error::NoReachableNode`] if no seed answers `CLUSTER SLOTS`.
    pub async fn connect(seeds: &str) -> Result<Self> {
        let config = ClusterConfig {
            seeds: parse_seeds(seeds)?,
            ..ClusterConfig::default()
        };
        Self::with_config(config).await
    }

    /// Connects with explicit settings and discovers the slot layout.
    pub async fn with_config(config: ClusterConfig) -> Result<Self> {
        let client = Self::unconnected(config)?;
        client.refresh_topology().await?;
        info!(
            nodes = client.node_count(),
            covered = client.is_fully_covered(),
            "connected to cluster"
        );
        Ok(client)
    }

    /// Returns a builder for configuring a client.
    pub fn builder() -> ClusterClientBuilder {
        ClusterClientBuilder::new()
    }

    fn unconnected(mut config: ClusterConfig) -> Result<Self> {
        config.seeds = config
            .seeds
            .iter()
            .map(|seed| parse_seed(seed))
            .collect::<Result<_>>()?;
        config.validate()?;
        let registry = PoolRegistry::new(config.connection.clone(), config.pool.clone());
        let topology = Topology::new(config.seeds.clone(), registry);
        let policy = RetryPolicy::from_config(&config);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                policy,
                topology,
            }),
        })
    }

    /// Settings this client was built with.
    pub fn config(&self) -> &ClusterConfig {
        &self.inner.config
    }

    /// Rediscovers the slot layout. Concurrent calls share one refresh.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClientClosed`] after [`close`](Self::close) and
    /// [`Error::NoReachableNode`] if no known node or seed answers.
    pub async fn refresh_topology(&self) -> Result<()> {
        self.inner.topology.refresh().await
    }

    /// Addresses of every node with a connection pool, sorted.
    pub fn nodes(&self) -> Vec<String> {
        self.inner.topology.registry().nodes()
    }

    /// Number of nodes with a connection pool.
    pub fn node_count(&self) -> usize {
        self.inner.topology.registry().len()
    }

    /// Address of the node currently owning `slot`.
    pub fn slot_owner(&self, slot: u16) -> Option<String> {
        self.inner.topology.slot_owner(slot)
    }

    /// Returns true if every slot has an owner.
    pub fn is_fully_covered(&self) -> bool {
        self.inner.topology.is_fully_covered()
    }

    /// Retires every pool and clears the slot map. Closing is permanent: every
    /// later command and refresh on this client or its clones fails with
    /// [`Error::ClientClosed`].
    pub fn close(&self) {
        debug!("closing cluster client");
        self.inner.topology.close();
    }

    /// Runs `body` on the node owning `key`.
    pub async fn run_with_key<T, F>(&self, key: impl AsRef<[u8]>, body: F) -> Result<T>
    where
        F: for<'c> Fn(&'c mut NodeConnection) -> BoxFuture<'c, Result<T>>,
    {
        self.run_with_keys(&[key], body).await
    }

    /// Runs `body` on the node owning `keys`, which must all share one slot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CrossSlot`] without touching the network if the keys
    /// span several slots.
    pub async fn run_with_keys<T, F, K>(&self, keys: &[K], body: F) -> Result<T>
    where
        F: for<'c> Fn(&'c mut NodeConnection) -> BoxFuture<'c, Result<T>>,
        K: AsRef<[u8]>,
    {
        let slot = validate_single_slot(keys)?;
        run_on_slot(&self.inner.topology, &self.inner.policy, slot, None, body).await
    }

    /// Like [`run_with_keys`](Self::run_with_keys), but gives up at `deadline`
    /// if that comes before the configured retry duration.
    pub async fn run_with_keys_until<T, F, K>(
        &self,
        keys: &[K],
        deadline: Instant,
        body: F,
    ) -> Result<T>
    where
        F: for<'c> Fn(&'c mut NodeConnection) -> BoxFuture<'c, Result<T>>,
        K: AsRef<[u8]>,
    {
        let slot = validate_single_slot(keys)?;
        run_on_slot(
            &self.inner.topology,
            &self.inner.policy,
            slot,
            Some(deadline),
            body,
        )
        .await
    }

    /// Runs `body` on an arbitrary node. Redirects are not followed: they end the
    /// command as [`Error::CommandFailed`].
    pub async fn run_on_any_node<T, F>(&self, body: F) -> Result<T>
    where
        F: for<'c> Fn(&'c mut NodeConnection) -> BoxFuture<'c, Result<T>>,
    {
        run_on_any(&self.inner.topology, &self.inner.policy, None, body).await
    }

    /// Sends `cmd` to the node owning `keys` and converts the reply with `parse`.
    pub async fn send_keyed<T, K>(
        &self,
        keys: &[K],
        cmd: Cmd,
        parse: fn(Frame) -> Result<T>,
    ) -> Result<T>
    where
        T: Send + 'static,
        K: AsRef<[u8]>,
    {
        self.run_with_keys(keys, send_body(cmd, parse)).await
    }

    /// Sends `cmd` to an arbitrary node.
    pub async fn send_any<T>(&self, cmd: Cmd, parse: fn(Frame) -> Result<T>) -> Result<T>
    where
        T: Send + 'static,
    {
        self.run_on_any_node(send_body(cmd, parse)).await
    }

    async fn send_to_slot<T>(&self, slot: u16, cmd: Cmd, parse: fn(Frame) -> Result<T>) -> Result<T>
    where
        T: Send + 'static,
    {
        run_on_slot(
            &self.inner.topology,
            &self.inner.policy,
            slot,
            None,
            send_body(cmd, parse),
        )
        .await
    }

    /// Gets the value of a key.
    pub async fn get(&self, key: impl Into<Bytes>) -> Result<Option<Bytes>> {
        let key = key.into();
        self.send_keyed(&[&key], command::get(key.clone()), command::frame_to_bytes)
            .await
    }

    /// Sets the string value of a key.
    pub async fn set(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<()> {
        let key = key.into();
        self.send_keyed(&[&key], command::set(key.clone(), value), command::frame_to_unit)
            .await
    }

    /// Deletes keys sharing one slot. Returns the number removed.
    pub async fn del<K: Into<Bytes>>(&self, keys: impl IntoIterator<Item = K>) -> Result<i64> {
        let keys = collect(keys);
        self.send_keyed(&keys, command::del(keys.clone()), command::frame_to_int)
            .await
    }

    /// Counts how many of the given keys (sharing one slot) exist.
    pub async fn exists<K: Into<Bytes>>(&self, keys: impl IntoIterator<Item = K>) -> Result<i64> {
        let keys = collect(keys);
        self.send_keyed(&keys, command::exists(keys.clone()), command::frame_to_int)
            .await
    }

    /// Increments the integer value of a key.
    pub async fn incr(&self, key: impl Into<Bytes>) -> Result<i64> {
        let key = key.into();
        self.send_keyed(&[&key], command::incr(key.clone()), command::frame_to_int)
            .await
    }

    /// Adds members to a set. Returns the number newly added.
    pub async fn sadd<M: Into<Bytes>>(
        &self,
        key: impl Into<Bytes>,
        members: impl IntoIterator<Item = M>,
    ) -> Result<i64> {
        let key = key.into();
        let cmd = command::sadd(key.clone(), collect(members));
        self.send_keyed(&[&key], cmd, command::frame_to_int).await
    }

    /// Returns every member of a set.
    pub async fn smembers(&self, key: impl Into<Bytes>) -> Result<Vec<Bytes>> {
        let key = key.into();
        self.send_keyed(&[&key], command::smembers(key.clone()), command::frame_to_members)
            .await
    }

    /// SDIFFSTORE: `dst` and every source key must share one slot.
    pub async fn sdiffstore<K: Into<Bytes>>(
        &self,
        dst: impl Into<Bytes>,
        keys: impl IntoIterator<Item = K>,
    ) -> Result<i64> {
        self.set_store("SDIFFSTORE", dst.into(), collect(keys)).await
    }

    /// SINTERSTORE: `dst` and every source key must share one slot.
    pub async fn sinterstore<K: Into<Bytes>>(
        &self,
        dst: impl Into<Bytes>,
        keys: impl IntoIterator<Item = K>,
    ) -> Result<i64> {
        self.set_store("SINTERSTORE", dst.into(), collect(keys)).await
    }

    /// SUNIONSTORE: `dst` and every source key must share one slot.
    pub async fn sunionstore<K: Into<Bytes>>(
        &self,
        dst: impl Into<Bytes>,
        keys: impl IntoIterator<Item = K>,
    ) -> Result<i64> {
        self.set_store("SUNIONSTORE", dst.into(), collect(keys)).await
    }

    async fn set_store(&self, name: &'static str, dst: Bytes, keys: Vec<Bytes>) -> Result<i64> {
        let all = merge_keys(dst.clone(), &keys);
        self.send_keyed(&all, command::set_store(name, dst, keys), command::frame_to_int)
            .await
    }

    /// ZUNIONSTORE with unit weights: `dst` and every source key must share one slot.
    pub async fn zunionstore<K: Into<Bytes>>(
        &self,
        dst: impl Into<Bytes>,
        keys: impl IntoIterator<Item = K>,
    ) -> Result<i64> {
        let (dst, keys) = (dst.into(), collect(keys));
        let all = merge_keys(dst.clone(), &keys);
        self.send_keyed(&all, command::zunionstore(dst, keys), command::frame_to_int)
            .await
    }

    /// Gets the values of keys sharing one slot.
    pub async fn mget<K: Into<Bytes>>(
        &self,
        keys: impl IntoIterator<Item = K>,
    ) -> Result<Vec<Option<Bytes>>> {
        let keys = collect(keys);
        self.send_keyed(&keys, command::mget(keys.clone()), command::frame_to_vec_bytes)
            .await
    }

    /// Sets several keys sharing one slot.
    pub async fn mset<K: Into<Bytes>, V: Into<Bytes>>(
        &self,
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Result<()> {
        let pairs: Vec<(Bytes, Bytes)> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let keys: Vec<Bytes> = pairs.iter().map(|(k, _)| k.clone()).collect();
        self.send_keyed(&keys, command::mset(pairs), command::frame_to_unit)
            .await
    }

    /// Renames a key; both names must share one slot.
    pub async fn rename(&self, key: impl Into<Bytes>, newkey: impl Into<Bytes>) -> Result<()> {
        let (key, newkey) = (key.into(), newkey.into());
        self.send_keyed(
            &[&key, &newkey],
            command::rename(key.clone(), newkey.clone()),
            command::frame_to_unit,
        )
        .await
    }

    /// BITOP: `dst` and every source key must share one slot.
    pub async fn bitop<K: Into<Bytes>>(
        &self,
        op: BitOp,
        dst: impl Into<Bytes>,
        keys: impl IntoIterator<Item = K>,
    ) -> Result<i64> {
        let (dst, keys) = (dst.into(), collect(keys));
        let all = merge_keys(dst.clone(), &keys);
        self.send_keyed(&all, command::bitop(op, dst, keys), command::frame_to_int)
            .await
    }

    /// PFMERGE: `dst` and every source key must share one slot.
    pub async fn pfmerge<K: Into<Bytes>>(
        &self,
        dst: impl Into<Bytes>,
        keys: impl IntoIterator<Item = K>,
    ) -> Result<()> {
        let (dst, keys) = (dst.into(), collect(keys));
        let all = merge_keys(dst.clone(), &keys);
        self.send_keyed(&all, command::pfmerge(dst, keys), command::frame_to_unit)
            .await
    }

    /// Approximate cardinality of the union of HyperLogLogs sharing one slot.
    pub async fn pfcount<K: Into<Bytes>>(&self, keys: impl IntoIterator<Item = K>) -> Result<i64> {
        let keys = collect(keys);
        self.send_keyed(&keys, command::pfcount(keys.clone()), command::frame_to_int)
            .await
    }

    /// KEYS for a pattern anchored to a hash tag, such as `{user42}:*`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RoutingUnsupported`] before any network call if the
    /// pattern could match keys on more than one node.
    pub async fn keys(&self, pattern: impl Into<Bytes>) -> Result<Vec<Bytes>> {
        let pattern = pattern.into();
        let slot = pattern_slot(&pattern)?;
        self.send_to_slot(slot, command::keys(pattern), command::frame_to_members)
            .await
    }

    /// One SCAN step with `MATCH pattern`, routed like [`keys`](Self::keys).
    ///
    /// Returns the next cursor (0 when done) and the keys of this step.
    pub async fn scan(
        &self,
        cursor: u64,
        pattern: impl Into<Bytes>,
        count: Option<u64>,
    ) -> Result<(u64, Vec<Bytes>)> {
        let pattern = pattern.into();
        let slot = pattern_slot(&pattern)?;
        self.send_to_slot(
            slot,
            command::scan_match(cursor, pattern, count),
            command::frame_to_scan_response,
        )
        .await
    }

    /// Echoes `msg` from an arbitrary node.
    pub async fn echo(&self, msg: impl Into<Bytes>) -> Result<Bytes> {
        let reply = self
            .send_any(command::echo(msg), command::frame_to_bytes)
            .await?;
        Ok(reply.unwrap_or_default())
    }

    /// Pings an arbitrary node.
    pub async fn ping(&self) -> Result<()> {
        self.send_any(command::ping(), command::frame_to_unit).await
    }

    /// Publishes a message. Returns the number of receivers on the node reached.
    pub async fn publish(
        &self,
        channel: impl Into<Bytes>,
        message: impl Into<Bytes>,
    ) -> Result<i64> {
        self.send_any(command::publish(channel, message), command::frame_to_int)
            .await
    }

    /// Runs a script. `keys` must share one slot; with no keys any node runs it.
    pub async fn eval<K: Into<Bytes>, A: Into<Bytes>>(
        &self,
        script: impl Into<Bytes>,
        keys: impl IntoIterator<Item = K>,
        args: impl IntoIterator<Item = A>,
    ) -> Result<Frame> {
        let keys = collect(keys);
        let cmd = command::eval(script, keys.clone(), collect(args));
        if keys.is_empty() {
            self.send_any(cmd, command::frame_identity).await
        } else {
            self.send_keyed(&keys, cmd, command::frame_identity).await
        }
    }

    /// Runs a keyless script on the node owning `sample_key`.
    pub async fn eval_on<A: Into<Bytes>>(
        &self,
        sample_key: impl AsRef<[u8]>,
        script: impl Into<Bytes>,
        args: impl IntoIterator<Item = A>,
    ) -> Result<Frame> {
        let cmd = command::eval(script, Vec::new(), collect(args));
        self.send_keyed(&[sample_key], cmd, command::frame_identity)
            .await
    }

    /// WAIT on the node owning `sample_key`. Returns the number of acknowledging replicas.
    pub async fn wait(
        &self,
        sample_key: impl AsRef<[u8]>,
        replicas: u32,
        timeout_ms: u64,
    ) -> Result<i64> {
        self.send_keyed(
            &[sample_key],
            command::wait(replicas, timeout_ms),
            command::frame_to_int,
        )
        .await
    }

    /// Always fails: optimistic locking cannot span a sharded keyspace.
    pub async fn watch<K: Into<Bytes>>(&self, _keys: impl IntoIterator<Item = K>) -> Result<()> {
        Err(Error::UnsupportedOperation { command: "WATCH" })
    }

    /// Always fails: optimistic locking cannot span a sharded keyspace.
    pub async fn unwatch(&self) -> Result<()> {
        Err(Error::UnsupportedOperation { command: "UNWATCH" })
    }
}

/// Body that sends a clone of `cmd` on every attempt.
fn send_body<T>(
    cmd: Cmd,
    parse: fn(Frame) -> Result<T>,
) -> impl for<'c> Fn(&'c mut NodeConnection) -> BoxFuture<'c, Result<T>>
where
    T: Send + 'static,
{
    move |conn: &mut NodeConnection| {
        let cmd = cmd.clone();
        async move { conn.execute(cmd, parse).await }.boxed()
    }
}

fn collect<K: Into<Bytes>>(keys: impl IntoIterator<Item = K>) -> Vec<Bytes> {
    keys.into_iter().map(Into::into).collect()
}
