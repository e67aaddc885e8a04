//! # Cluster routing
//!
//! Slot-based command dispatch for a sharded cluster.
//!
//! ## Features
//!
//! - **Slot-based routing**: Commands go to the node owning their key's hash slot
//! - **Pre-dispatch validation**: Multi-key commands spanning slots fail before any I/O
//! - **Redirect handling**: MOVED and ASK are followed transparently
//! - **Bounded retries**: Every command has an attempt budget and a deadline
//! - **Connection pooling**: One bounded pool per node, retired when the node leaves
//! - **Hash tags**: `{...}` co-locates related keys
//!
//! ## Example
//!
//! ```no_run
//! # async fn example() -> shardline::Result<()> {
//! use shardline::ClusterClient;
//!
//! // Connect to the cluster (comma-separated seed nodes)
//! let client = ClusterClient::connect("127.0.0.1:7000,127.0.0.1:7001").await?;
//!
//! // Same hash tag, same slot: accepted
//! client.sadd("{user1}:a", ["x", "y"]).await?;
//! client.sdiffstore("{user1}:dst", ["{user1}:a", "{user1}:b"]).await?;
//!
//! // Different slots: rejected without touching the network
//! assert!(client.sdiffstore("dst", ["a", "b"]).await.is_err());
//! # Ok(())
//! # }
//! ```

mod client;
pub mod commands;
pub mod config;
pub mod dispatch;
pub(crate) mod errors;
pub mod pool;
pub mod slot;
pub mod topology;

pub use client::ClusterClient;
pub use config::{parse_seed, parse_seeds, ClusterConfig};
pub use dispatch::{RetryBudget, RetryPolicy};
pub use pool::PoolConfig;
pub use slot::{
    is_anchored_pattern, key_slot, merge_keys, pattern_slot, validate_single_slot, SLOT_COUNT,
};
