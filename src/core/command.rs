use crate::proto::frame::Frame;
use crate::{Error, Result};
use bytes::Bytes;

/// A command ready to be sent to a node.
///
/// Commands are cheap to clone (arguments are [`Bytes`]), which lets the
/// dispatcher rebuild the same request on every retry.
///
/// # Example
///
/// ```
/// use shardline::core::command::{get, Cmd};
///
/// let cmd = Cmd::new("SET").arg("key").arg("value");
/// assert_eq!(cmd.name(), b"SET");
/// let get_cmd = get("key");
/// assert_eq!(get_cmd.args().len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Cmd {
    args: Vec<Bytes>,
}

impl Cmd {
    /// Creates a new command with the given name.
    #[inline]
    pub fn new(name: impl Into<Bytes>) -> Self {
        Self {
            args: vec![name.into()],
        }
    }

    /// Appends an argument to the command.
    #[inline]
    pub fn arg<T: Into<Bytes>>(mut self, arg: T) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends every argument from an iterator.
    #[inline]
    pub fn args_from<I, T>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Returns the command name.
    pub fn name(&self) -> &[u8] {
        &self.args[0]
    }

    /// Returns all arguments, including the name.
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// Converts the command to a RESP Array frame.
    #[inline]
    pub fn into_frame(self) -> Frame {
        Frame::Array(
            self.args
                .into_iter()
                .map(|b| Frame::BulkString(Some(b)))
                .collect(),
        )
    }
}

/// Creates a PING command.
#[inline]
pub fn ping() -> Cmd {
    Cmd::new("PING")
}

/// Creates an ECHO command.
#[inline]
pub fn echo(msg: impl Into<Bytes>) -> Cmd {
    Cmd::new("ECHO").arg(msg)
}

/// Creates a GET command.
#[inline]
pub fn get(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("GET").arg(key)
}

/// Creates a SET command.
#[inline]
pub fn set(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Cmd {
    Cmd::new("SET").arg(key).arg(value)
}

/// Creates a DEL command.
#[inline]
pub fn del(keys: Vec<Bytes>) -> Cmd {
    Cmd::new("DEL").args_from(keys)
}

/// Creates an EXISTS command.
#[inline]
pub fn exists(keys: Vec<Bytes>) -> Cmd {
    Cmd::new("EXISTS").args_from(keys)
}

/// Creates an INCR command.
#[inline]
pub fn incr(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("INCR").arg(key)
}

/// Creates a MGET command.
#[inline]
pub fn mget(keys: Vec<Bytes>) -> Cmd {
    Cmd::new("MGET").args_from(keys)
}

/// Creates a MSET command.
#[inline]
pub fn mset(pairs: Vec<(Bytes, Bytes)>) -> Cmd {
    let mut cmd = Cmd::new("MSET");
    for (key, value) in pairs {
        cmd = cmd.arg(key).arg(value);
    }
    cmd
}

/// Creates a RENAME command.
#[inline]
pub fn rename(key: impl Into<Bytes>, newkey: impl Into<Bytes>) -> Cmd {
    Cmd::new("RENAME").arg(key).arg(newkey)
}

/// Creates a SADD command.
#[inline]
pub fn sadd(key: impl Into<Bytes>, members: Vec<Bytes>) -> Cmd {
    Cmd::new("SADD").arg(key).args_from(members)
}

/// Creates a SMEMBERS command.
#[inline]
pub fn smembers(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("SMEMBERS").arg(key)
}

/// Creates a set-algebra STORE command (`SDIFFSTORE`, `SINTERSTORE`, `SUNIONSTORE`).
#[inline]
pub fn set_store(name: &'static str, dst: impl Into<Bytes>, keys: Vec<Bytes>) -> Cmd {
    Cmd::new(name).arg(dst).args_from(keys)
}

/// Creates a ZUNIONSTORE command.
#[inline]
pub fn zunionstore(dst: impl Into<Bytes>, keys: Vec<Bytes>) -> Cmd {
    Cmd::new("ZUNIONSTORE")
        .arg(dst)
        .arg(keys.len().to_string())
        .args_from(keys)
}

/// Bitwise operation performed by BITOP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOp {
    /// Bitwise AND.
    And,
    /// Bitwise OR.
    Or,
    /// Bitwise XOR.
    Xor,
    /// Bitwise NOT (single source key).
    Not,
}

impl BitOp {
    /// Wire name of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            BitOp::And => "AND",
            BitOp::Or => "OR",
            BitOp::Xor => "XOR",
            BitOp::Not => "NOT",
        }
    }
}

/// Creates a BITOP command.
#[inline]
pub fn bitop(op: BitOp, dst: impl Into<Bytes>, keys: Vec<Bytes>) -> Cmd {
    Cmd::new("BITOP").arg(op.as_str()).arg(dst).args_from(keys)
}

/// Creates a PFMERGE command.
#[inline]
pub fn pfmerge(dst: impl Into<Bytes>, keys: Vec<Bytes>) -> Cmd {
    Cmd::new("PFMERGE").arg(dst).args_from(keys)
}

/// Creates a PFCOUNT command.
#[inline]
pub fn pfcount(keys: Vec<Bytes>) -> Cmd {
    Cmd::new("PFCOUNT").args_from(keys)
}

/// Creates a KEYS command.
#[inline]
pub fn keys(pattern: impl Into<Bytes>) -> Cmd {
    Cmd::new("KEYS").arg(pattern)
}

/// Creates a SCAN command with a MATCH pattern and optional COUNT hint.
#[inline]
pub fn scan_match(cursor: u64, pattern: impl Into<Bytes>, count: Option<u64>) -> Cmd {
    let cmd = Cmd::new("SCAN")
        .arg(cursor.to_string())
        .arg("MATCH")
        .arg(pattern);
    match count {
        Some(count) => cmd.arg("COUNT").arg(count.to_string()),
        None => cmd,
    }
}

/// Creates a PUBLISH command.
#[inline]
pub fn publish(channel: impl Into<Bytes>, message: impl Into<Bytes>) -> Cmd {
    Cmd::new("PUBLISH").arg(channel).arg(message)
}

/// Creates an EVAL command with explicit keys and arguments.
#[inline]
pub fn eval(script: impl Into<Bytes>, keys: Vec<Bytes>, args: Vec<Bytes>) -> Cmd {
    Cmd::new("EVAL")
        .arg(script)
        .arg(keys.len().to_string())
        .args_from(keys)
        .args_from(args)
}

/// Creates a WAIT command.
#[inline]
pub fn wait(replicas: u32, timeout_ms: u64) -> Cmd {
    Cmd::new("WAIT")
        .arg(replicas.to_string())
        .arg(timeout_ms.to_string())
}

/// Creates an AUTH command with password only.
#[inline]
pub fn auth(password: impl Into<Bytes>) -> Cmd {
    Cmd::new("AUTH").arg(password)
}

/// Creates an AUTH command with username and password (ACL style).
#[inline]
pub fn auth_with_username(username: impl Into<Bytes>, password: impl Into<Bytes>) -> Cmd {
    Cmd::new("AUTH").arg(username).arg(password)
}

/// Creates a CLIENT SETNAME command.
#[inline]
pub fn client_setname(name: impl Into<Bytes>) -> Cmd {
    Cmd::new("CLIENT").arg("SETNAME").arg(name)
}

/// Accepts any non-error reply (status replies such as `+OK`).
#[inline]
pub fn frame_to_unit(frame: Frame) -> Result<()> {
    match frame {
        Frame::Error(e) => Err(server_error(&e)),
        _ => Ok(()),
    }
}

/// Converts a frame to raw bytes (`GET`-style replies).
#[inline]
pub fn frame_to_bytes(frame: Frame) -> Result<Option<Bytes>> {
    match frame {
        Frame::BulkString(b) => Ok(b),
        Frame::SimpleString(s) => Ok(Some(Bytes::from(s))),
        Frame::Null => Ok(None),
        Frame::Error(e) => Err(server_error(&e)),
        _ => Err(unexpected("bulk string")),
    }
}

/// Converts a frame to an integer.
#[inline]
pub fn frame_to_int(frame: Frame) -> Result<i64> {
    match frame {
        Frame::Integer(i) => Ok(i),
        Frame::BulkString(Some(b)) => std::str::from_utf8(&b)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| Error::Protocol {
                message: "invalid integer".to_string(),
            }),
        Frame::Error(e) => Err(server_error(&e)),
        _ => Err(unexpected("integer")),
    }
}

/// Converts a frame array to a vector of optional bytes (`MGET` replies).
#[inline]
pub fn frame_to_vec_bytes(frame: Frame) -> Result<Vec<Option<Bytes>>> {
    match frame {
        Frame::Array(arr) => arr.into_iter().map(frame_to_bytes).collect(),
        Frame::Error(e) => Err(server_error(&e)),
        _ => Err(unexpected("array")),
    }
}

/// Converts a frame array to a vector of bytes, rejecting nil elements.
#[inline]
pub fn frame_to_members(frame: Frame) -> Result<Vec<Bytes>> {
    frame_to_vec_bytes(frame)?
        .into_iter()
        .map(|item| item.ok_or_else(|| unexpected("non-nil member")))
        .collect()
}

/// Converts a SCAN reply to `(cursor, keys)`.
#[inline]
pub fn frame_to_scan_response(frame: Frame) -> Result<(u64, Vec<Bytes>)> {
    let Frame::Array(arr) = frame else {
        return match frame {
            Frame::Error(e) => Err(server_error(&e)),
            _ => Err(unexpected("array for SCAN")),
        };
    };
    let mut parts = arr.into_iter();
    let (Some(cursor), Some(keys), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(Error::Protocol {
            message: "SCAN response must have 2 elements".to_string(),
        });
    };

    let cursor = frame_to_bytes(cursor)?
        .and_then(|b| std::str::from_utf8(&b).ok()?.parse::<u64>().ok())
        .ok_or_else(|| Error::Protocol {
            message: "invalid cursor value".to_string(),
        })?;

    Ok((cursor, frame_to_members(keys)?))
}

/// Returns any reply frame unchanged (scripting replies).
#[inline]
pub fn frame_identity(frame: Frame) -> Result<Frame> {
    match frame {
        Frame::Error(e) => Err(server_error(&e)),
        other => Ok(other),
    }
}

fn server_error(e: &[u8]) -> Error {
    Error::Server {
        message: String::from_utf8_lossy(e).into_owned(),
    }
}

fn unexpected(expected: &str) -> Error {
    Error::Protocol {
        message: format!("unexpected frame type, expected {}", expected),
    }
}
