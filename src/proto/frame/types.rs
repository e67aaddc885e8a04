use bytes::Bytes;

/// A RESP2 frame.
///
/// - SimpleString: status replies like "OK"
/// - Error: error replies, including cluster redirects
/// - Integer: numeric replies
/// - BulkString: binary-safe string data
/// - Array: command arguments and multi-bulk replies
/// - Null: the null array (`*-1`)
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Simple string (+OK).
    SimpleString(Vec<u8>),
    /// Error (-ERR).
    Error(Vec<u8>),
    /// Integer (:1000).
    Integer(i64),
    /// Bulk string ($6\r\nfoobar).
    BulkString(Option<Bytes>),
    /// Array (*2\r\n...).
    Array(Vec<Frame>),
    /// Null (*-1).
    Null,
}

impl Frame {
    /// Builds a simple-string frame.
    pub fn simple(s: &str) -> Self {
        Frame::SimpleString(s.as_bytes().to_vec())
    }

    /// Builds an error frame.
    pub fn error(msg: impl Into<String>) -> Self {
        Frame::Error(msg.into().into_bytes())
    }

    /// Builds a bulk-string frame.
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Frame::BulkString(Some(data.into()))
    }

    /// Returns the bytes of a bulk or simple string, if this is one.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Frame::BulkString(Some(b)) => Some(b),
            Frame::SimpleString(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the elements of an array frame.
    pub fn as_array(&self) -> Option<&[Frame]> {
        match self {
            Frame::Array(items) => Some(items),
            _ => None,
        }
    }
}
