use bytes::{Buf, Bytes, BytesMut};

use crate::proto::error::{Error, Result};
use crate::proto::frame::Frame;

const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024; // 512 MB default

/// Deepest array nesting accepted. Cluster replies nest three levels at most.
const MAX_NESTING_DEPTH: usize = 32;

/// A streaming RESP decoder.
///
/// Bytes are appended as they arrive from the socket; [`decode`](Decoder::decode)
/// returns `Ok(None)` until a complete frame is buffered. Incomplete input is
/// never consumed, so a frame split across several reads decodes correctly.
///
/// # Example
///
/// ```
/// use shardline::proto::codec::Decoder;
/// use shardline::proto::frame::Frame;
///
/// let mut decoder = Decoder::new();
/// decoder.append(b"+OK\r\n");
/// let frame = decoder.decode().unwrap().unwrap();
/// assert_eq!(frame, Frame::SimpleString(b"OK".to_vec()));
/// ```
#[derive(Debug)]
pub struct Decoder {
    buf: BytesMut,
    max_frame_size: usize,
}

impl Decoder {
    /// Creates a new decoder with an empty buffer.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Creates a new decoder with a custom maximum frame size.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_size,
        }
    }

    /// Appends raw bytes read from the network.
    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Returns true if no undecoded bytes are buffered.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Attempts to decode one frame from the buffer.
    ///
    /// Returns `Ok(None)` if more data is needed, and a protocol error if the
    /// buffered data is malformed or exceeds the configured frame size.
    pub fn decode(&mut self) -> Result<Option<Frame>> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        if self.buf.len() > self.max_frame_size {
            return Err(protocol("buffer size exceeded maximum frame size"));
        }

        // A partial frame is parsed again from its first byte on the next call.
        // Replies on this path are small, so no resumable parser state is kept.
        let mut cursor = Cursor {
            data: &self.buf,
            pos: 0,
            depth: 0,
            max_frame_size: self.max_frame_size,
        };

        match cursor.parse()? {
            Some(frame) => {
                let consumed = cursor.pos;
                self.buf.advance(consumed);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Read position over the buffered bytes; only committed once a whole frame parses.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    depth: usize,
    max_frame_size: usize,
}

impl<'a> Cursor<'a> {
    fn parse(&mut self) -> Result<Option<Frame>> {
        let Some(&tag) = self.data.get(self.pos) else {
            return Ok(None);
        };
        self.pos += 1;

        let Some(line) = self.line() else {
            return Ok(None);
        };

        match tag {
            b'+' => Ok(Some(Frame::SimpleString(line.to_vec()))),
            b'-' => Ok(Some(Frame::Error(line.to_vec()))),
            b':' => Ok(Some(Frame::Integer(parse_int(line)?))),
            b'$' => {
                let len = parse_int(line)?;
                if len < 0 {
                    return Ok(Some(Frame::BulkString(None)));
                }
                let len = len as usize;
                if len > self.max_frame_size {
                    return Err(protocol("bulk string length exceeds maximum frame size"));
                }
                if self.data.len() < self.pos + len + 2 {
                    return Ok(None);
                }
                let payload = Bytes::copy_from_slice(&self.data[self.pos..self.pos + len]);
                if &self.data[self.pos + len..self.pos + len + 2] != b"\r\n" {
                    return Err(protocol("bulk string missing terminator"));
                }
                self.pos += len + 2;
                Ok(Some(Frame::BulkString(Some(payload))))
            }
            b'*' => {
                let len = parse_int(line)?;
                if len < 0 {
                    return Ok(Some(Frame::Null));
                }
                let len = len as usize;
                // Assume minimum 4 bytes per element
                if len > self.max_frame_size / 4 {
                    return Err(protocol("array length exceeds reasonable maximum"));
                }
                if self.depth >= MAX_NESTING_DEPTH {
                    return Err(protocol("array nesting exceeds maximum depth"));
                }
                self.depth += 1;
                let mut items = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    match self.parse()? {
                        Some(item) => items.push(item),
                        None => return Ok(None),
                    }
                }
                self.depth -= 1;
                Ok(Some(Frame::Array(items)))
            }
            other => Err(protocol(format!("unknown frame type: {}", other as char))),
        }
    }

    /// Returns the bytes up to the next CRLF and moves past it.
    fn line(&mut self) -> Option<&'a [u8]> {
        let data = self.data;
        let rest = &data[self.pos..];
        let end = rest.windows(2).position(|w| w == b"\r\n")?;
        let line = &data[self.pos..self.pos + end];
        self.pos += end + 2;
        Some(line)
    }
}

fn parse_int(line: &[u8]) -> Result<i64> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| protocol(format!("invalid integer: {}", String::from_utf8_lossy(line))))
}

fn protocol(message: impl Into<String>) -> Error {
    Error::Protocol {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_simple_string() {
        let mut decoder = Decoder::new();
        decoder.append(b"+OK\r\n");
        let frame = decoder.decode().unwrap().unwrap();
        assert_eq!(frame, Frame::SimpleString(b"OK".to_vec()));
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_decode_redirect_error() {
        let mut decoder = Decoder::new();
        decoder.append(b"-MOVED 12182 127.0.0.1:7001\r\n");
        let frame = decoder.decode().unwrap().unwrap();
        assert_eq!(frame, Frame::Error(b"MOVED 12182 127.0.0.1:7001".to_vec()));
    }

    #[test]
    fn test_decode_integer() {
        let mut decoder = Decoder::new();
        decoder.append(b":-42\r\n");
        assert_eq!(decoder.decode().unwrap().unwrap(), Frame::Integer(-42));
    }

    #[test]
    fn test_decode_bulk_string_and_null() {
        let mut decoder = Decoder::new();
        decoder.append(b"$5\r\nhello\r\n$-1\r\n");
        assert_eq!(decoder.decode().unwrap().unwrap(), Frame::bulk("hello"));
        assert_eq!(decoder.decode().unwrap().unwrap(), Frame::BulkString(None));
        assert!(decoder.decode().unwrap().is_none());
    }

    #[test]
    fn test_decode_nested_array() {
        let mut decoder = Decoder::new();
        decoder.append(b"*2\r\n*2\r\n:0\r\n:5460\r\n$3\r\nbar\r\n*-1\r\n");
        assert_eq!(
            decoder.decode().unwrap().unwrap(),
            Frame::Array(vec![
                Frame::Array(vec![Frame::Integer(0), Frame::Integer(5460)]),
                Frame::bulk("bar"),
            ])
        );
        assert_eq!(decoder.decode().unwrap().unwrap(), Frame::Null);
    }

    #[test]
    fn test_decode_partial_bulk_is_not_consumed() {
        let mut decoder = Decoder::new();
        decoder.append(b"*2\r\n$3\r\nfoo\r\n$3\r\nba");
        assert!(decoder.decode().unwrap().is_none());
        decoder.append(b"r\r\n");
        assert_eq!(
            decoder.decode().unwrap().unwrap(),
            Frame::Array(vec![Frame::bulk("foo"), Frame::bulk("bar")])
        );
    }

    #[test]
    fn test_decode_partial_line() {
        let mut decoder = Decoder::new();
        decoder.append(b"+OK\r");
        assert!(decoder.decode().unwrap().is_none());
        decoder.append(b"\n");
        assert_eq!(decoder.decode().unwrap().unwrap(), Frame::simple("OK"));
    }

    #[test]
    fn test_decode_unknown_type() {
        let mut decoder = Decoder::new();
        decoder.append(b"?what\r\n");
        assert!(matches!(decoder.decode(), Err(Error::Protocol { .. })));
    }

    #[test]
    fn test_decode_bulk_string_exceeds_max_size() {
        let mut decoder = Decoder::with_max_frame_size(10);
        decoder.append(b"$100\r\n");
        match decoder.decode() {
            Err(Error::Protocol { message }) => {
                assert!(message.contains("bulk string length exceeds maximum"))
            }
            other => panic!("expected protocol error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_deep_nesting() {
        let mut decoder = Decoder::new();
        decoder.append(&b"*1\r\n".repeat(MAX_NESTING_DEPTH + 1));
        decoder.append(b":1\r\n");
        match decoder.decode() {
            Err(Error::Protocol { message }) => assert!(message.contains("nesting")),
            other => panic!("expected protocol error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_accepts_nesting_at_limit() {
        let mut decoder = Decoder::new();
        decoder.append(&b"*1\r\n".repeat(MAX_NESTING_DEPTH));
        decoder.append(b":1\r\n");
        assert!(decoder.decode().unwrap().is_some());
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_decode_buffer_exceeds_max() {
        let mut decoder = Decoder::with_max_frame_size(10);
        decoder.append(b"+");
        decoder.append(&[b'x'; 20]);
        decoder.append(b"\r\n");
        assert!(decoder.decode().is_err());
    }
}
