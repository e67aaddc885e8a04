//! Command dispatch and the retry/redirect state machine.
//!
//! Each invocation owns a [`RetryBudget`]: an attempt counter and a deadline,
//! both checked before every attempt. An attempt borrows a connection from the
//! pool owning the slot and runs the caller's body on it. The outcome decides
//! what happens next:
//!
//! - a value ends the invocation,
//! - a connection failure discards the connection, drops the pool's idle
//!   connections and retries; enough consecutive failures trigger a backoff and
//!   a full topology refresh,
//! - `MOVED` rewrites the slot's entry and retries against the new owner,
//! - `ASK` makes exactly one attempt on the indicated node, preceded by `ASKING`,
//!   and returns whatever that attempt produces,
//! - anything else (`CLUSTERDOWN`, server errors) ends the invocation, wrapped
//!   in [`Error::CommandFailed`] with the slot and node it came from.
//!
//! A closed client fails every invocation with [`Error::ClientClosed`].

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, instrument, warn};

use super::config::ClusterConfig;
use super::pool::NodePool;
use super::topology::Topology;
use crate::core::connection::NodeConnection;
use crate::{Error, Result};

/// Retry limits shared by every invocation of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed per invocation.
    pub max_attempts: u32,
    /// Wall-clock budget per invocation.
    pub retry_duration: Duration,
    /// Consecutive connection failures that force a topology refresh.
    pub refresh_after_failures: u32,
}

impl RetryPolicy {
    /// Extracts the retry limits from a client configuration.
    pub fn from_config(config: &ClusterConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            retry_duration: config.effective_retry_duration(),
            refresh_after_failures: config.refresh_after_connection_failures.max(1),
        }
    }

    /// Starts a budget now, capped by an optional caller deadline.
    pub fn budget(&self, caller_deadline: Option<Instant>) -> RetryBudget {
        let deadline = Instant::now() + self.retry_duration;
        let deadline = caller_deadline.map_or(deadline, |caller| caller.min(deadline));
        RetryBudget::new(self.max_attempts, deadline)
    }
}

/// Which limit ended an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exhausted {
    /// Every attempt was used.
    Attempts,
    /// The deadline passed.
    Deadline,
}

/// Per-invocation attempt counter and deadline. Redirects reset neither.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    max_attempts: u32,
    attempts_left: u32,
    deadline: Instant,
}

impl RetryBudget {
    /// Creates a budget of `max_attempts` attempts ending at `deadline`.
    pub fn new(max_attempts: u32, deadline: Instant) -> Self {
        Self {
            max_attempts,
            attempts_left: max_attempts,
            deadline,
        }
    }

    /// Instant after which no attempt starts.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Attempts consumed so far.
    pub fn attempts_made(&self) -> u32 {
        self.max_attempts - self.attempts_left
    }

    /// Attempts still available.
    pub fn attempts_left(&self) -> u32 {
        self.attempts_left
    }

    /// Time until the deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Returns the limit that forbids another attempt, if any.
    pub fn check(&self) -> Option<Exhausted> {
        if self.attempts_left == 0 {
            Some(Exhausted::Attempts)
        } else if Instant::now() >= self.deadline {
            Some(Exhausted::Deadline)
        } else {
            None
        }
    }

    /// Records the start of an attempt.
    pub fn consume(&mut self) {
        self.attempts_left = self.attempts_left.saturating_sub(1);
    }

    /// Pause before a forced refresh: the remaining time spread so that later
    /// attempts get progressively more of it.
    pub fn backoff(&self) -> Duration {
        let left = self.attempts_left;
        if left == 0 {
            return Duration::ZERO;
        }
        self.remaining() / left.saturating_mul(left + 1)
    }
}

/// State carried across the attempts of one invocation.
struct Invocation<'a> {
    topology: &'a Topology,
    policy: &'a RetryPolicy,
    budget: RetryBudget,
    slot: Option<u16>,
    last_node: Option<String>,
    last_error: Option<Error>,
    consecutive_failures: u32,
}

impl<'a> Invocation<'a> {
    fn new(
        topology: &'a Topology,
        policy: &'a RetryPolicy,
        slot: Option<u16>,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            topology,
            policy,
            budget: policy.budget(deadline),
            slot,
            last_node: None,
            last_error: None,
            consecutive_failures: 0,
        }
    }

    /// Returns the terminal error if neither bound allows another attempt.
    fn ensure_budget(&mut self) -> Result<()> {
        let Some(bound) = self.budget.check() else {
            return Ok(());
        };

        let attempts = self.budget.attempts_made();
        let slot = self.slot;
        let node = self.last_node.take();
        let last = self.last_error.take();
        warn!(?bound, attempts, ?slot, ?node, "giving up on command");

        Err(match bound {
            Exhausted::Attempts => Error::RetriesExhausted {
                attempts,
                slot,
                node,
                source: Box::new(last.unwrap_or(Error::NoReachableNode)),
            },
            Exhausted::Deadline => Error::DeadlineExceeded {
                attempts,
                slot,
                node,
                source: last.map(Box::new),
            },
        })
    }

    /// Wraps an error that ends the invocation early with its routing context.
    fn fail(&mut self, error: Error) -> Error {
        if matches!(error, Error::ClientClosed) {
            return error;
        }
        Error::CommandFailed {
            attempts: self.budget.attempts_made(),
            slot: self.slot,
            node: self.last_node.take(),
            source: Box::new(error),
        }
    }

    fn begin_attempt(&mut self, pool: &NodePool) -> u32 {
        self.budget.consume();
        self.last_node = Some(pool.address().to_string());
        self.budget.attempts_made()
    }

    /// Handles a transient failure: the pool loses its idle connections and,
    /// once failures pile up, the client backs off and rediscovers the topology.
    async fn on_connection_failure(&mut self, pool: Option<&NodePool>, error: Error) {
        if let Some(pool) = pool {
            pool.invalidate();
        }
        self.consecutive_failures += 1;
        warn!(
            slot = ?self.slot,
            node = ?self.last_node,
            attempt = self.budget.attempts_made(),
            failures = self.consecutive_failures,
            error = %error,
            "connection failure"
        );
        self.last_error = Some(error);

        if self.consecutive_failures < self.policy.refresh_after_failures
            || self.budget.attempts_left() == 0
        {
            return;
        }
        self.consecutive_failures = 0;

        let deadline = self.budget.deadline();
        let wake = (Instant::now() + self.budget.backoff()).min(deadline);
        sleep_until(wake).await;

        debug!(slot = ?self.slot, "forcing topology refresh after connection failures");
        match timeout_at(deadline, self.topology.refresh()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "topology refresh failed"),
            Err(_) => debug!("topology refresh cut short by deadline"),
        }
    }

    /// Pool owning the slot, refreshing once if the slot is unassigned.
    async fn resolve(&self, slot: u16) -> Result<Arc<NodePool>> {
        if let Some(pool) = self.topology.pool_for_slot(slot) {
            return Ok(pool);
        }

        debug!(slot, "slot unassigned, refreshing topology");
        timeout_at(self.budget.deadline(), self.topology.refresh())
            .await
            .map_err(|_| Error::Timeout {
                operation: "refreshing topology",
            })??;

        self.topology
            .pool_for_slot(slot)
            .ok_or_else(|| Error::ClusterDown {
                message: format!("slot {} is not served by any node", slot),
            })
    }

    /// Any registered pool, refreshing once if none is known.
    async fn resolve_any(&self) -> Result<Arc<NodePool>> {
        if let Some(pool) = self.topology.registry().random() {
            return Ok(pool);
        }

        timeout_at(self.budget.deadline(), self.topology.refresh())
            .await
            .map_err(|_| Error::Timeout {
                operation: "refreshing topology",
            })??;

        self.topology
            .registry()
            .random()
            .ok_or(Error::NoReachableNode)
    }

    /// Runs one attempt on `pool` within the invocation deadline.
    async fn attempt<T, F>(&self, pool: &Arc<NodePool>, asking: bool, body: &F) -> Result<T>
    where
        F: for<'c> Fn(&'c mut NodeConnection) -> BoxFuture<'c, Result<T>>,
    {
        let run = async {
            let mut conn = pool.borrow().await?;
            if asking {
                conn.asking().await?;
            }
            let result = body(&mut *conn).await;
            if matches!(&result, Err(e) if e.is_connection_error()) {
                conn.discard();
            }
            result
        };

        timeout_at(self.budget.deadline(), run)
            .await
            .unwrap_or(Err(Error::Timeout {
                operation: "executing command",
            }))
    }
}

/// Runs `body` against the node owning `slot`, following redirects.
///
/// The body may run several times; each run gets a fresh connection.
/// `deadline` tightens the configured retry duration for this invocation only.
#[instrument(level = "debug", skip(topology, policy, body))]
pub async fn run_on_slot<T, F>(
    topology: &Topology,
    policy: &RetryPolicy,
    slot: u16,
    deadline: Option<Instant>,
    body: F,
) -> Result<T>
where
    F: for<'c> Fn(&'c mut NodeConnection) -> BoxFuture<'c, Result<T>>,
{
    let mut inv = Invocation::new(topology, policy, Some(slot), deadline);
    let mut ask_target: Option<String> = None;

    loop {
        if topology.is_closed() {
            return Err(Error::ClientClosed);
        }
        inv.ensure_budget()?;

        let asking = ask_target.is_some();
        let pool = match ask_target.take() {
            Some(address) => topology.registry().get_or_create(&address),
            None => match inv.resolve(slot).await {
                Ok(pool) => pool,
                Err(
                    e @ (Error::ClusterDown { .. } | Error::NoReachableNode | Error::ClientClosed),
                ) => return Err(inv.fail(e)),
                Err(e) => {
                    inv.budget.consume();
                    inv.on_connection_failure(None, e).await;
                    continue;
                }
            },
        };

        let attempt = inv.begin_attempt(&pool);
        debug!(slot, node = %pool.address(), attempt, asking, "dispatching");

        match inv.attempt(&pool, asking, &body).await {
            Ok(value) => return Ok(value),
            Err(e) if asking => {
                debug!(slot, node = %pool.address(), error = %e, "ASK attempt finished with error");
                return Err(inv.fail(e));
            }
            Err(Error::Moved {
                slot: moved,
                address,
            }) => {
                inv.consecutive_failures = 0;
                topology.apply_moved(moved, &address);
                inv.last_error = Some(Error::Moved {
                    slot: moved,
                    address,
                });
            }
            Err(Error::Ask {
                slot: asked,
                address,
            }) => {
                debug!(slot = asked, node = %address, "ASK redirect");
                inv.consecutive_failures = 0;
                ask_target = Some(address.clone());
                inv.last_error = Some(Error::Ask {
                    slot: asked,
                    address,
                });
            }
            Err(e) if e.is_connection_error() => inv.on_connection_failure(Some(&*pool), e).await,
            Err(e) => return Err(inv.fail(e)),
        }
    }
}

/// Runs `body` on an arbitrary node, retrying connection failures only.
#[instrument(level = "debug", skip(topology, policy, body))]
pub async fn run_on_any<T, F>(
    topology: &Topology,
    policy: &RetryPolicy,
    deadline: Option<Instant>,
    body: F,
) -> Result<T>
where
    F: for<'c> Fn(&'c mut NodeConnection) -> BoxFuture<'c, Result<T>>,
{
    let mut inv = Invocation::new(topology, policy, None, deadline);

    loop {
        if topology.is_closed() {
            return Err(Error::ClientClosed);
        }
        inv.ensure_budget()?;

        let pool = match inv.resolve_any().await {
            Ok(pool) => pool,
            Err(e) if e.is_connection_error() => {
                inv.budget.consume();
                inv.on_connection_failure(None, e).await;
                continue;
            }
            Err(e) => return Err(inv.fail(e)),
        };

        let attempt = inv.begin_attempt(&pool);
        debug!(node = %pool.address(), attempt, "dispatching to any node");

        match inv.attempt(&pool, false, &body).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_connection_error() => inv.on_connection_failure(Some(&*pool), e).await,
            Err(e) => return Err(inv.fail(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_from_config() {
        let config = ClusterConfig {
            max_attempts: 3,
            max_total_retries_duration: Some(Duration::from_secs(1)),
            refresh_after_connection_failures: 4,
            ..ClusterConfig::default()
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.retry_duration, Duration::from_secs(1));
        assert_eq!(policy.refresh_after_failures, 4);
    }

    #[tokio::test]
    async fn test_budget_counts_attempts() {
        let mut budget = RetryBudget::new(2, Instant::now() + Duration::from_secs(60));
        assert_eq!(budget.check(), None);
        budget.consume();
        assert_eq!(budget.attempts_made(), 1);
        assert_eq!(budget.check(), None);
        budget.consume();
        assert_eq!(budget.check(), Some(Exhausted::Attempts));
        budget.consume();
        assert_eq!(budget.attempts_made(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_deadline() {
        let budget = RetryBudget::new(5, Instant::now() + Duration::from_millis(100));
        assert_eq!(budget.check(), None);
        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(budget.check(), Some(Exhausted::Deadline));
        assert_eq!(budget.remaining(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_deadline_caps_budget() {
        let policy = RetryPolicy {
            max_attempts: 5,
            retry_duration: Duration::from_secs(10),
            refresh_after_failures: 2,
        };
        let caller = Instant::now() + Duration::from_secs(1);
        assert_eq!(policy.budget(Some(caller)).deadline(), caller);

        let later = Instant::now() + Duration::from_secs(60);
        assert_eq!(
            policy.budget(Some(later)).deadline(),
            Instant::now() + Duration::from_secs(10)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_spreads_remaining_time() {
        let mut budget = RetryBudget::new(5, Instant::now() + Duration::from_millis(3000));
        budget.consume();
        budget.consume();
        // 3 attempts left: 3000ms / (3 * 4)
        assert_eq!(budget.backoff(), Duration::from_millis(250));
        budget.consume();
        // 2 attempts left: 3000ms / (2 * 3)
        assert_eq!(budget.backoff(), Duration::from_millis(500));
        budget.consume();
        budget.consume();
        assert_eq!(budget.backoff(), Duration::ZERO);
    }
}
