use std::fmt;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::cluster::errors::parse_redis_error;
use crate::core::command::{self, Cmd};
use crate::proto::codec::{Decoder, Encoder};
use crate::proto::frame::Frame;
use crate::{Error, Result};

/// Default connect and socket timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Per-connection settings shared by every node connection of a client.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ConnectionConfig {
    /// Maximum time to establish a TCP connection.
    pub connect_timeout: Duration,
    /// Maximum time to write a command and read its reply.
    pub socket_timeout: Duration,
    /// ACL username sent with `AUTH`.
    pub username: Option<String>,
    /// Password sent with `AUTH`.
    pub password: Option<String>,
    /// Name registered with `CLIENT SETNAME`.
    pub client_name: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_TIMEOUT,
            socket_timeout: DEFAULT_TIMEOUT,
            username: None,
            password: None,
            client_name: None,
        }
    }
}

/// A RESP frame stream over any async transport.
///
/// # Example
///
/// ```no_run
/// use shardline::core::connection::Connection;
/// use shardline::proto::frame::Frame;
/// use tokio::net::TcpStream;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let stream = TcpStream::connect("127.0.0.1:7000").await?;
/// let mut conn = Connection::new(stream);
/// conn.write_frame(&Frame::Array(vec![Frame::bulk("PING")])).await?;
/// let reply = conn.read_frame().await?;
/// # Ok(())
/// # }
/// ```
pub struct Connection<S> {
    stream: S,
    decoder: Decoder,
    encoder: Encoder,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new connection over the given stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            decoder: Decoder::new(),
            encoder: Encoder::new(),
        }
    }

    /// Encodes and writes a frame.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.encoder.encode(frame);
        let data = self.encoder.take();
        self.stream.write_all(&data).await?;
        Ok(())
    }

    /// Reads until one complete frame is decoded.
    ///
    /// Returns an IO error if the peer closes the stream first.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(frame) = self.decoder.decode()? {
                return Ok(frame);
            }
            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                return Err(Error::closed());
            }
            self.decoder.append(&buf[..n]);
        }
    }
}

impl<S> fmt::Debug for Connection<S>
where
    S: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("stream", &self.stream)
            .finish()
    }
}

/// An authenticated connection to one cluster node.
///
/// Every request is a single write followed by a single read, bounded by the
/// socket timeout. Once an exchange fails at the transport or framing level the
/// connection is marked broken and must not be reused.
#[derive(Debug)]
pub struct NodeConnection {
    address: String,
    inner: Connection<TcpStream>,
    socket_timeout: Duration,
    broken: bool,
}

impl NodeConnection {
    /// Connects to `address` (`host:port`) and runs the `AUTH` / `CLIENT SETNAME` handshake.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if the connect timeout elapses,
    /// [`Error::Io`] if the TCP connect fails and [`Error::Auth`] if the node
    /// rejects the credentials.
    pub async fn connect(address: &str, config: &ConnectionConfig) -> Result<Self> {
        let stream = timeout(config.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| Error::Timeout {
                operation: "connecting",
            })??;
        stream.set_nodelay(true)?;

        let mut conn = Self {
            address: address.to_string(),
            inner: Connection::new(stream),
            socket_timeout: config.socket_timeout,
            broken: false,
        };

        if let Some(password) = &config.password {
            let cmd = match &config.username {
                Some(username) => command::auth_with_username(username.clone(), password.clone()),
                None => command::auth(password.clone()),
            };
            match conn.send_command(cmd).await {
                Ok(_) => {}
                Err(Error::Server { message }) => {
                    debug!(node = %address, %message, "authentication rejected");
                    return Err(Error::Auth);
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(name) = &config.client_name {
            let frame = conn.send_command(command::client_setname(name.clone())).await?;
            command::frame_to_unit(frame)?;
        }

        debug!(node = %address, "connected");
        Ok(conn)
    }

    /// Address this connection was opened to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns true once a transport or framing failure has poisoned the connection.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Sends a command and returns its reply.
    ///
    /// Error replies are converted with [`parse_redis_error`], so redirects
    /// surface as [`Error::Moved`] / [`Error::Ask`].
    pub async fn send_command(&mut self, cmd: Cmd) -> Result<Frame> {
        if self.broken {
            return Err(Error::closed());
        }

        // Stays set if this future is dropped mid-exchange, so a connection
        // with an unread reply is never handed back to a pool.
        self.broken = true;

        let frame = cmd.into_frame();
        let exchange = async {
            self.inner.write_frame(&frame).await?;
            self.inner.read_frame().await
        };

        let reply = match timeout(self.socket_timeout, exchange).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(Error::Timeout {
                    operation: "waiting for reply",
                })
            }
        };
        self.broken = false;

        match reply {
            Frame::Error(msg) => Err(parse_redis_error(&msg, &self.address)),
            other => Ok(other),
        }
    }

    /// Sends a command and converts the reply with `parse`.
    pub async fn execute<T>(&mut self, cmd: Cmd, parse: fn(Frame) -> Result<T>) -> Result<T> {
        let frame = self.send_command(cmd).await?;
        parse(frame)
    }

    /// Sends `ASKING`, allowing the next command to target a migrating slot.
    pub async fn asking(&mut self) -> Result<()> {
        let frame = self.send_command(crate::cluster::commands::asking()).await?;
        command::frame_to_unit(frame)
    }
}
