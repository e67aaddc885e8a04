use bytes::{BufMut, BytesMut};

use crate::proto::frame::Frame;

/// A RESP encoder that accumulates encoded frames in an internal buffer.
///
/// # Example
///
/// ```
/// use shardline::proto::codec::Encoder;
/// use shardline::proto::frame::Frame;
///
/// let mut encoder = Encoder::new();
/// encoder.encode(&Frame::SimpleString(b"OK".to_vec()));
/// assert_eq!(&encoder.take()[..], b"+OK\r\n");
/// ```
#[derive(Debug, Default)]
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    /// Creates a new encoder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the RESP encoding of `frame` to the buffer.
    pub fn encode(&mut self, frame: &Frame) {
        write_frame(&mut self.buf, frame);
    }

    /// Takes the encoded bytes, leaving the encoder ready for reuse.
    pub fn take(&mut self) -> BytesMut {
        self.buf.split()
    }
}

fn write_frame(buf: &mut BytesMut, frame: &Frame) {
    match frame {
        Frame::SimpleString(s) => write_line(buf, b'+', s),
        Frame::Error(e) => write_line(buf, b'-', e),
        Frame::Integer(n) => write_line(buf, b':', n.to_string().as_bytes()),
        Frame::BulkString(Some(data)) => {
            write_line(buf, b'$', data.len().to_string().as_bytes());
            buf.extend_from_slice(data);
            buf.extend_from_slice(b"\r\n");
        }
        Frame::BulkString(None) => buf.extend_from_slice(b"$-1\r\n"),
        Frame::Array(items) => {
            write_line(buf, b'*', items.len().to_string().as_bytes());
            for item in items {
                write_frame(buf, item);
            }
        }
        Frame::Null => buf.extend_from_slice(b"*-1\r\n"),
    }
}

fn write_line(buf: &mut BytesMut, tag: u8, body: &[u8]) {
    buf.put_u8(tag);
    buf.extend_from_slice(body);
    buf.extend_from_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::codec::Decoder;

    fn encoded(frame: &Frame) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.encode(frame);
        encoder.take().to_vec()
    }

    #[test]
    fn test_encode_scalars() {
        assert_eq!(encoded(&Frame::simple("OK")), b"+OK\r\n");
        assert_eq!(encoded(&Frame::error("ASK 1 a:1")), b"-ASK 1 a:1\r\n");
        assert_eq!(encoded(&Frame::Integer(42)), b":42\r\n");
        assert_eq!(encoded(&Frame::BulkString(None)), b"$-1\r\n");
        assert_eq!(encoded(&Frame::Null), b"*-1\r\n");
    }

    #[test]
    fn test_encode_command_array() {
        let frame = Frame::Array(vec![Frame::bulk("GET"), Frame::bulk("foo")]);
        assert_eq!(encoded(&frame), b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n");
    }

    #[test]
    fn test_take_resets_buffer() {
        let mut encoder = Encoder::new();
        encoder.encode(&Frame::simple("OK"));
        assert!(!encoder.take().is_empty());
        assert!(encoder.take().is_empty());
    }

    #[test]
    fn test_encoded_slots_reply_decodes() {
        let reply = Frame::Array(vec![Frame::Array(vec![
            Frame::Integer(0),
            Frame::Integer(16383),
            Frame::Array(vec![
                Frame::bulk("127.0.0.1"),
                Frame::Integer(7000),
                Frame::bulk("node-a"),
            ]),
        ])]);
        let mut decoder = Decoder::new();
        decoder.append(&encoded(&reply));
        assert_eq!(decoder.decode().unwrap(), Some(reply));
    }
}
