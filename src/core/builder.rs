use std::time::Duration;

use crate::cluster::{parse_seed, ClusterClient, ClusterConfig};
use crate::{Error, Result};

/// Builder for configuring and creating a [`ClusterClient`].
///
/// # Example
///
/// ```no_run
/// use shardline::ClusterClientBuilder;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = ClusterClientBuilder::new()
///     .seed("127.0.0.1:7000")
///     .seed("redis://127.0.0.1:7001")
///     .max_attempts(5)
///     .socket_timeout(Duration::from_millis(500))
///     .password("secret")
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ClusterClientBuilder {
    seeds: Vec<String>,
    config: ClusterConfig,
}

impl ClusterClientBuilder {
    /// Creates a new [`ClusterClientBuilder`] instance.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a seed node.
    ///
    /// # Arguments
    ///
    /// * `address` - `host:port` or `redis://host:port`
    #[inline]
    pub fn seed(mut self, address: impl Into<String>) -> Self {
        self.seeds.push(address.into());
        self
    }

    /// Adds several seed nodes.
    #[inline]
    pub fn seeds<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.seeds.extend(addresses.into_iter().map(Into::into));
        self
    }

    /// Sets the number of attempts per command, redirects included (default: 5).
    #[inline]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    /// Sets the wall-clock budget per command (default: the socket timeout).
    #[inline]
    pub fn max_total_retries_duration(mut self, duration: Duration) -> Self {
        self.config.max_total_retries_duration = Some(duration);
        self
    }

    /// Sets how many consecutive connection failures force a topology refresh (default: 2).
    #[inline]
    pub fn refresh_after_connection_failures(mut self, failures: u32) -> Self {
        self.config.refresh_after_connection_failures = failures;
        self
    }

    /// Sets the connection timeout.
    #[inline]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection.connect_timeout = timeout;
        self
    }

    /// Sets the per-command socket timeout.
    #[inline]
    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection.socket_timeout = timeout;
        self
    }

    /// Sets the username for ACL authentication.
    #[inline]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.connection.username = Some(username.into());
        self
    }

    /// Sets the password for authentication.
    #[inline]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.connection.password = Some(password.into());
        self
    }

    /// Sets the client connection name.
    ///
    /// # Arguments
    ///
    /// * `name` - Client name displayed in `CLIENT LIST`
    #[inline]
    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.config.connection.client_name = Some(name.into());
        self
    }

    /// Sets the maximum number of connections per node.
    #[inline]
    pub fn max_connections_per_node(mut self, max: usize) -> Self {
        self.config.pool.max_connections_per_node = max;
        self
    }

    /// Sets how long a command waits for a pooled connection.
    #[inline]
    pub fn pool_wait_timeout(mut self, timeout: Duration) -> Self {
        self.config.pool.wait_timeout = timeout;
        self
    }

    /// Parses the seeds and returns the resulting configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if no seed was given, a seed is
    /// malformed, or a limit is zero.
    pub fn into_config(self) -> Result<ClusterConfig> {
        if self.seeds.is_empty() {
            return Err(Error::InvalidArgument {
                message: "at least one seed node is required".to_string(),
            });
        }

        let mut config = self.config;
        config.seeds = self
            .seeds
            .iter()
            .map(|seed| parse_seed(seed))
            .collect::<Result<_>>()?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the [`ClusterClient`], discovering the cluster topology.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for invalid settings and
    /// [`Error::NoReachableNode`] if no seed answers.
    #[inline]
    pub async fn build(self) -> Result<ClusterClient> {
        ClusterClient::with_config(self.into_config()?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_new() {
        let builder = ClusterClientBuilder::new();
        assert!(builder.seeds.is_empty());
        assert_eq!(builder.config, ClusterConfig::default());
    }

    #[test]
    fn test_builder_chaining() {
        let config = ClusterClientBuilder::new()
            .seed("127.0.0.1:7000")
            .seeds(["redis://127.0.0.1:7001", "[::1]:7002"])
            .max_attempts(3)
            .max_total_retries_duration(Duration::from_secs(5))
            .refresh_after_connection_failures(4)
            .connect_timeout(Duration::from_millis(300))
            .socket_timeout(Duration::from_millis(400))
            .username("app")
            .password("secret")
            .client_name("test")
            .max_connections_per_node(2)
            .pool_wait_timeout(Duration::from_millis(100))
            .into_config()
            .unwrap();

        assert_eq!(
            config.seeds,
            vec![
                "127.0.0.1:7000".to_string(),
                "127.0.0.1:7001".to_string(),
                "[::1]:7002".to_string()
            ]
        );
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.effective_retry_duration(), Duration::from_secs(5));
        assert_eq!(config.refresh_after_connection_failures, 4);
        assert_eq!(config.connection.connect_timeout, Duration::from_millis(300));
        assert_eq!(config.connection.socket_timeout, Duration::from_millis(400));
        assert_eq!(config.connection.username.as_deref(), Some("app"));
        assert_eq!(config.connection.password.as_deref(), Some("secret"));
        assert_eq!(config.connection.client_name.as_deref(), Some("test"));
        assert_eq!(config.pool.max_connections_per_node, 2);
        assert_eq!(config.pool.wait_timeout, Duration::from_millis(100));
    }

    #[test]
    fn test_builder_rejects_bad_seed() {
        let result = ClusterClientBuilder::new().seed("http://x:1").into_config();
        assert!(matches!(result, Err(Error::InvalidArgument { .. })));
    }

    #[tokio::test]
    async fn test_builder_build_without_seeds() {
        let result = ClusterClientBuilder::new().build().await;
        match result {
            Err(Error::InvalidArgument { message }) => {
                assert_eq!(message, "at least one seed node is required");
            }
            other => panic!("Expected InvalidArgument error, got {:?}", other.map(|_| ())),
        }
    }
}
