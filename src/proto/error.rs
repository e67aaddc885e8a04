use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for shardline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while routing and executing commands against a cluster.
///
/// Variants fall into four groups:
///
/// - validation failures raised before any network call ([`Error::CrossSlot`],
///   [`Error::RoutingUnsupported`], [`Error::UnsupportedOperation`],
///   [`Error::InvalidArgument`]),
/// - node-level failures absorbed by the retry loop ([`Error::Io`],
///   [`Error::Timeout`], [`Error::PoolExhausted`], [`Error::Moved`], [`Error::Ask`]),
/// - fatal cluster state ([`Error::ClusterDown`], [`Error::ClientClosed`]),
/// - terminal wrappers carrying the attempt count, slot and last node: the
///   budget ran out ([`Error::RetriesExhausted`], [`Error::DeadlineExceeded`])
///   or an error ended the command early ([`Error::CommandFailed`]).
///
/// [`Error::cause`] looks through the wrappers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An IO error occurred on a node connection.
    #[error("IO error: {source}")]
    Io {
        /// The underlying IO error.
        #[from]
        source: io::Error,
    },

    /// A reply could not be decoded or had an unexpected shape.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the error.
        message: String,
    },

    /// The server returned an error that carries no routing meaning.
    #[error("server error: {message}")]
    Server {
        /// Error message from server.
        message: String,
    },

    /// Authentication failed during the connection handshake.
    #[error("authentication failed")]
    Auth,

    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of invalid argument.
        message: String,
    },

    /// A connect, read, or write did not finish in time.
    #[error("timed out while {operation}")]
    Timeout {
        /// What was being waited on.
        operation: &'static str,
    },

    /// No connection became available in a node's pool within the wait time.
    #[error("connection pool for {address} exhausted after waiting {waited:?}")]
    PoolExhausted {
        /// Node whose pool was exhausted.
        address: String,
        /// How long the borrower waited.
        waited: Duration,
    },

    /// Slot ownership moved permanently to another node.
    #[error("MOVED to slot {slot} at {address}")]
    Moved {
        /// The slot number (0-16383).
        slot: u16,
        /// The address of the node now owning this slot (e.g., "127.0.0.1:7001").
        address: String,
    },

    /// Slot is migrating; the command should be tried once on another node.
    #[error("ASK to slot {slot} at {address}")]
    Ask {
        /// The slot number (0-16383).
        slot: u16,
        /// The address of the node temporarily handling this slot.
        address: String,
    },

    /// No node currently owns the requested slot, or the cluster reports itself down.
    #[error("CLUSTERDOWN {message}")]
    ClusterDown {
        /// Server message, or a local description of the unassigned slot.
        message: String,
    },

    /// Keys of a multi-key command hash to different slots.
    #[error("CROSSSLOT keys in request don't hash to the same slot ({first} != {other})")]
    CrossSlot {
        /// Slot of the first key.
        first: u16,
        /// First differing slot found.
        other: u16,
    },

    /// The command cannot be routed to a single node.
    #[error("routing unsupported: {message}")]
    RoutingUnsupported {
        /// Why the command was rejected.
        message: String,
    },

    /// The operation has no meaning against a sharded keyspace.
    #[error("{command} is not supported in cluster mode")]
    UnsupportedOperation {
        /// Command name.
        command: &'static str,
    },

    /// No node is known to the client, even after a topology refresh.
    #[error("no reachable cluster node")]
    NoReachableNode,

    /// The attempt budget ran out before the command succeeded.
    #[error("retries exhausted after {attempts} attempts (slot {slot:?}, node {node:?}): {source}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Target slot, if the command was slot-routed.
        slot: Option<u16>,
        /// Last node contacted.
        node: Option<String>,
        /// Most recent underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// The wall-clock retry budget elapsed before the command succeeded.
    #[error("deadline exceeded after {attempts} attempts (slot {slot:?}, node {node:?})")]
    DeadlineExceeded {
        /// Attempts made.
        attempts: u32,
        /// Target slot, if the command was slot-routed.
        slot: Option<u16>,
        /// Last node contacted.
        node: Option<String>,
        /// Most recent underlying failure, if any attempt ran.
        #[source]
        source: Option<Box<Error>>,
    },

    /// A non-retryable error ended a dispatched command.
    #[error("command failed after {attempts} attempts (slot {slot:?}, node {node:?}): {source}")]
    CommandFailed {
        /// Attempts made.
        attempts: u32,
        /// Target slot, if the command was slot-routed.
        slot: Option<u16>,
        /// Node that produced the error, if one was contacted.
        node: Option<String>,
        /// The error that ended the command.
        #[source]
        source: Box<Error>,
    },

    /// The client was closed.
    #[error("cluster client is closed")]
    ClientClosed,
}

impl Error {
    /// Returns true for transient node-level failures that the dispatcher retries.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Io { .. } | Error::Timeout { .. } | Error::PoolExhausted { .. }
        )
    }

    /// Returns true for MOVED and ASK replies.
    pub fn is_redirect(&self) -> bool {
        matches!(self, Error::Moved { .. } | Error::Ask { .. })
    }

    /// The error underneath the terminal wrappers, or `self` for any other variant.
    ///
    /// A [`Error::DeadlineExceeded`] with no recorded failure is its own cause.
    pub fn cause(&self) -> &Error {
        match self {
            Error::RetriesExhausted { source, .. } | Error::CommandFailed { source, .. } => &**source,
            Error::DeadlineExceeded {
                source: Some(source),
                ..
            } => &**source,
            other => other,
        }
    }

    pub(crate) fn closed() -> Self {
        Error::Io {
            source: io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed"),
        }
    }
}
