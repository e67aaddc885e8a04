//! Client configuration and seed-node parsing.

use std::time::Duration;

use super::pool::PoolConfig;
use super::topology::join_host_port;
use crate::core::connection::ConnectionConfig;
use crate::{Error, Result};

/// Default number of attempts per command, redirects included.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default number of consecutive connection failures that force a topology refresh.
pub const DEFAULT_REFRESH_AFTER_FAILURES: u32 = 2;

const DEFAULT_PORT: u16 = 6379;

/// Settings for a [`ClusterClient`](crate::ClusterClient).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ClusterConfig {
    /// Nodes used to bootstrap and, as a last resort, to rediscover the topology.
    pub seeds: Vec<String>,
    /// Attempts allowed per command invocation.
    pub max_attempts: u32,
    /// Wall-clock budget per invocation. `None` means the socket timeout.
    pub max_total_retries_duration: Option<Duration>,
    /// Consecutive connection failures after which the topology is refreshed.
    pub refresh_after_connection_failures: u32,
    /// Settings for node connections.
    pub connection: ConnectionConfig,
    /// Settings for per-node pools.
    pub pool: PoolConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_total_retries_duration: None,
            refresh_after_connection_failures: DEFAULT_REFRESH_AFTER_FAILURES,
            connection: ConnectionConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

impl ClusterConfig {
    /// Per-invocation retry budget, falling back to the socket timeout.
    pub fn effective_retry_duration(&self) -> Duration {
        self.max_total_retries_duration
            .unwrap_or(self.connection.socket_timeout)
    }

    /// Checks the settings before any connection is attempted.
    pub fn validate(&self) -> Result<()> {
        if self.seeds.is_empty() {
            return Err(invalid("at least one seed node is required"));
        }
        if self.max_attempts == 0 {
            return Err(invalid("max_attempts must be at least 1"));
        }
        if self.refresh_after_connection_failures == 0 {
            return Err(invalid("refresh_after_connection_failures must be at least 1"));
        }
        if self.pool.max_connections_per_node == 0 {
            return Err(invalid("max_connections_per_node must be at least 1"));
        }
        Ok(())
    }
}

/// Parses one seed into a `host:port` address.
///
/// Accepts `host:port`, `host` (default port 6379), `redis://host:port` and
/// bracketed IPv6 literals such as `[::1]:7000`. `rediss://` is rejected:
/// connections are plain TCP and never negotiate TLS.
///
/// # Examples
///
/// ```
/// use shardline::cluster::parse_seed;
///
/// assert_eq!(parse_seed("127.0.0.1:7000").unwrap(), "127.0.0.1:7000");
/// assert_eq!(parse_seed("redis://localhost:7001").unwrap(), "localhost:7001");
/// assert_eq!(parse_seed("[::1]:7002").unwrap(), "[::1]:7002");
/// ```
pub fn parse_seed(seed: &str) -> Result<String> {
    let seed = seed.trim();
    if seed.is_empty() {
        return Err(invalid("empty seed address"));
    }

    let with_scheme = if seed.contains("://") {
        seed.to_string()
    } else {
        format!("redis://{}", seed)
    };

    let url = url::Url::parse(&with_scheme)
        .map_err(|e| invalid(&format!("invalid seed address '{}': {}", seed, e)))?;

    match url.scheme() {
        "redis" => {}
        "rediss" => {
            return Err(invalid(&format!(
                "TLS seed '{}' is not supported, connections are plain TCP",
                seed
            )))
        }
        other => {
            return Err(invalid(&format!(
                "invalid scheme '{}', expected redis://",
                other
            )))
        }
    }

    let host = match url.host() {
        Some(url::Host::Ipv6(addr)) => addr.to_string(),
        Some(host) => host.to_string(),
        None => return Err(invalid(&format!("missing host in seed '{}'", seed))),
    };
    let port = url.port().unwrap_or(DEFAULT_PORT);

    Ok(join_host_port(&host, port as i64))
}

/// Parses a comma-separated seed list.
pub fn parse_seeds(seeds: &str) -> Result<Vec<String>> {
    seeds
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(parse_seed)
        .collect()
}

fn invalid(message: &str) -> Error {
    Error::InvalidArgument {
        message: message.to_string(),
    }
}
