//! In-process mock cluster nodes for dispatch tests.
//!
//! Each [`MockNode`] listens on an ephemeral port, answers `CLUSTER SLOTS`,
//! `ASKING` and `PING` itself, and hands every other command to a scripted
//! handler. All received commands are logged so tests can count round trips.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use shardline::core::connection::Connection;
use shardline::proto::frame::Frame;
use shardline::ClusterClientBuilder;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// What a node does with a command.
pub enum Reply {
    /// Send this frame.
    Frame(Frame),
    /// Drop the connection without answering.
    Close,
    /// Wait before answering with the frame.
    Delay(Duration, Frame),
}

pub fn ok() -> Reply {
    Reply::Frame(Frame::simple("OK"))
}

pub fn bulk(value: &str) -> Reply {
    Reply::Frame(Frame::bulk(value.to_string()))
}

pub fn int(n: i64) -> Reply {
    Reply::Frame(Frame::Integer(n))
}

pub fn err(message: &str) -> Reply {
    Reply::Frame(Frame::error(message))
}

type Handler = Box<dyn Fn(&[String]) -> Reply + Send + Sync>;

struct State {
    slots: Frame,
    slots_delay: Duration,
    handler: Handler,
    log: Vec<Vec<String>>,
    tasks: Vec<JoinHandle<()>>,
}

/// A scripted cluster node.
#[derive(Clone)]
pub struct MockNode {
    pub addr: String,
    state: Arc<Mutex<State>>,
}

impl MockNode {
    /// Starts a node that answers every scripted command with `+OK`.
    pub async fn start() -> MockNode {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let state = Arc::new(Mutex::new(State {
            slots: Frame::Array(Vec::new()),
            slots_delay: Duration::ZERO,
            handler: Box::new(|_: &[String]| ok()),
            log: Vec::new(),
            tasks: Vec::new(),
        }));

        let accept_state = Arc::clone(&state);
        let accept = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let conn_state = Arc::clone(&accept_state);
                let task = tokio::spawn(serve(Connection::new(stream), conn_state));
                accept_state.lock().tasks.push(task);
            }
        });
        state.lock().tasks.push(accept);

        MockNode { addr, state }
    }

    /// Sets the CLUSTER SLOTS reply.
    pub fn set_slots(&self, slots: Frame) {
        self.state.lock().slots = slots;
    }

    /// Delays every CLUSTER SLOTS reply by `delay`.
    pub fn set_slots_delay(&self, delay: Duration) {
        self.state.lock().slots_delay = delay;
    }

    /// Replaces the handler for non-cluster commands.
    pub fn on_command<F>(&self, handler: F)
    where
        F: Fn(&[String]) -> Reply + Send + Sync + 'static,
    {
        self.state.lock().handler = Box::new(handler);
    }

    /// Every command received so far, as uppercase name followed by arguments.
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.state.lock().log.clone()
    }

    /// Number of received commands named `name`.
    pub fn count(&self, name: &str) -> usize {
        self.state
            .lock()
            .log
            .iter()
            .filter(|cmd| cmd[0] == name)
            .count()
    }

    /// Stops accepting and drops every open connection.
    pub fn kill(&self) {
        for task in self.state.lock().tasks.drain(..) {
            task.abort();
        }
    }
}

async fn serve(mut conn: Connection<tokio::net::TcpStream>, state: Arc<Mutex<State>>) {
    while let Ok(frame) = conn.read_frame().await {
        let args = to_args(frame);
        if args.is_empty() {
            return;
        }

        let reply = {
            let mut state = state.lock();
            state.log.push(args.clone());
            match args[0].as_str() {
                "CLUSTER" if state.slots_delay.is_zero() => Reply::Frame(state.slots.clone()),
                "CLUSTER" => Reply::Delay(state.slots_delay, state.slots.clone()),
                "ASKING" => ok(),
                "PING" => Reply::Frame(Frame::simple("PONG")),
                _ => (state.handler)(&args),
            }
        };

        let frame = match reply {
            Reply::Frame(frame) => frame,
            Reply::Close => return,
            Reply::Delay(delay, frame) => {
                tokio::time::sleep(delay).await;
                frame
            }
        };
        if conn.write_frame(&frame).await.is_err() {
            return;
        }
    }
}

fn to_args(frame: Frame) -> Vec<String> {
    let Frame::Array(items) = frame else {
        return Vec::new();
    };
    let mut args: Vec<String> = items
        .iter()
        .filter_map(|item| item.as_bytes())
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .collect();
    if let Some(name) = args.first_mut() {
        *name = name.to_ascii_uppercase();
    }
    args
}

/// Builds a CLUSTER SLOTS reply from `(start, end, node)` ranges.
pub fn slots(ranges: &[(u16, u16, &MockNode)]) -> Frame {
    Frame::Array(
        ranges
            .iter()
            .map(|(start, end, node)| {
                let (host, port) = node.addr.rsplit_once(':').unwrap();
                Frame::Array(vec![
                    Frame::Integer(*start as i64),
                    Frame::Integer(*end as i64),
                    Frame::Array(vec![
                        Frame::bulk(host.to_string()),
                        Frame::Integer(port.parse().unwrap()),
                        Frame::bulk(format!("id-{}", port)),
                    ]),
                ])
            })
            .collect(),
    )
}

/// Gives every node the same slot layout.
pub fn publish_layout(nodes: &[&MockNode], layout: Frame) {
    for node in nodes {
        node.set_slots(layout.clone());
    }
}

/// A builder with short timeouts suitable for tests.
pub fn test_builder(seeds: &[&MockNode]) -> ClusterClientBuilder {
    ClusterClientBuilder::new()
        .seeds(seeds.iter().map(|node| node.addr.clone()))
        .connect_timeout(Duration::from_millis(500))
        .socket_timeout(Duration::from_millis(500))
        .max_total_retries_duration(Duration::from_secs(5))
        .pool_wait_timeout(Duration::from_millis(500))
}
