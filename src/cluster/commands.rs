//! Cluster management command builders used for topology discovery and redirects.

use crate::core::command::Cmd;

/// Creates a CLUSTER SLOTS command.
///
/// The reply lists slot ranges with their master and replica nodes:
/// `[[start, end, [host, port, id], [host, port, id]...]...]`.
pub fn cluster_slots() -> Cmd {
    Cmd::new("CLUSTER").arg("SLOTS")
}

/// Creates an ASKING command.
///
/// Sent before retrying a command that received an ASK redirect. The flag
/// only affects the immediately following command on the same connection.
pub fn asking() -> Cmd {
    Cmd::new("ASKING")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::frame::Frame;
    use bytes::Bytes;

    #[test]
    fn test_cluster_slots_cmd() {
        let frame = cluster_slots().into_frame();

        if let Frame::Array(arr) = frame {
            assert_eq!(arr.len(), 2);
            assert_eq!(arr[0], Frame::BulkString(Some(Bytes::from("CLUSTER"))));
            assert_eq!(arr[1], Frame::BulkString(Some(Bytes::from("SLOTS"))));
        } else {
            panic!("Expected Array frame");
        }
    }

    #[test]
    fn test_asking_cmd() {
        let frame = asking().into_frame();

        if let Frame::Array(arr) = frame {
            assert_eq!(arr.len(), 1);
            assert_eq!(arr[0], Frame::BulkString(Some(Bytes::from("ASKING"))));
        } else {
            panic!("Expected Array frame");
        }
    }
}
