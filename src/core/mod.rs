//! Node-level plumbing: command construction, connections, and the client builder.
//!
//! ## Modules
//!
//! - [`connection`] - Framed node connections with handshake and timeouts
//! - [`command`] - Command builders and reply converters
//! - [`builder`] - Cluster client builder
//!

pub use crate::proto::error::{Error, Result};

/// Client builder configuration.
pub mod builder;
/// Command construction helpers.
pub mod command;
/// Low-level connection management.
pub mod connection;
