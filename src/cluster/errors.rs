//! Parsing utilities for cluster error replies.
//!
//! Nodes signal routing problems with special error replies:
//! - `MOVED <slot> <host>:<port>` - Permanent redirect
//! - `ASK <slot> <host>:<port>` - Temporary redirect during migration
//! - `CLUSTERDOWN ...` - Cluster is unavailable

use super::topology::{host_of, join_host_port};
use crate::Error;

/// Converts an error reply received from `origin` into a typed error.
///
/// Returns [`Error::Moved`], [`Error::Ask`] or [`Error::ClusterDown`] for the
/// cluster replies above. Anything else, including a server-side `CROSSSLOT`
/// (which the local validator normally prevents), is an [`Error::Server`].
///
/// A redirect target without a host (`MOVED 3999 :7001`) refers to a node
/// reachable on the host of `origin`.
pub fn parse_redis_error(error_msg: &[u8], origin: &str) -> Error {
    let msg = String::from_utf8_lossy(error_msg);
    let msg = msg.trim();

    if let Some(stripped) = msg.strip_prefix("MOVED ") {
        if let Some((slot, address)) = parse_redirect(stripped, origin) {
            return Error::Moved { slot, address };
        }
    }

    if let Some(stripped) = msg.strip_prefix("ASK ") {
        if let Some((slot, address)) = parse_redirect(stripped, origin) {
            return Error::Ask { slot, address };
        }
    }

    if let Some(rest) = msg.strip_prefix("CLUSTERDOWN") {
        return Error::ClusterDown {
            message: rest.trim().to_string(),
        };
    }

    Error::Server {
        message: msg.to_string(),
    }
}

/// Parses redirect arguments: `"<slot> <host>:<port>"`.
fn parse_redirect(args: &str, origin: &str) -> Option<(u16, String)> {
    let mut parts = args.split_whitespace();
    let (Some(slot), Some(address), None) = (parts.next(), parts.next(), parts.next()) else {
        return None;
    };

    let slot: u16 = slot.parse().ok()?;
    if slot >= crate::cluster::SLOT_COUNT {
        return None;
    }

    let (host, port) = address.rsplit_once(':')?;
    if host.is_empty() || host == "?" {
        let port: i64 = port.parse().ok()?;
        return Some((slot, join_host_port(host_of(origin), port)));
    }

    Some((slot, address.to_string()))
}
