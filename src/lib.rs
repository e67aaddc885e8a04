//! # Shardline
//!
//! Client-side command routing for sharded, replicated key-value clusters
//! speaking the RESP protocol.
//!
//! Every key maps to one of 16384 hash slots. Shardline keeps a map of which
//! node owns each slot, sends each command to that owner over a pooled
//! connection, and repairs stale routing on the fly:
//!
//! - `MOVED` updates the slot's owner and retries there,
//! - `ASK` retries once on the migration target,
//! - connection failures are retried and eventually trigger a topology refresh.
//!
//! Each command is bounded by an attempt budget and a deadline. Multi-key
//! commands whose keys span several slots are rejected before any network call.
//!
//! ## Example
//!
//! ```no_run
//! use shardline::ClusterClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ClusterClient::connect("127.0.0.1:7000").await?;
//!     client.set("foo", "bar").await?;
//!     client.ping().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `serde` - `Deserialize` for the configuration types

#![warn(missing_docs)]

pub mod cluster;
pub mod core;
pub mod proto;

pub use crate::cluster::{key_slot, ClusterClient, ClusterConfig};
pub use crate::core::builder::ClusterClientBuilder;
pub use crate::core::command::BitOp;
pub use crate::core::{Error, Result};
