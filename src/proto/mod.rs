//! RESP (Redis Serialization Protocol) framing used on node connections.
//!
//! - [`codec`] - Encoder and decoder for RESP frames
//! - [`error`] - Crate-wide error type
//! - [`frame`] - Frame types representing RESP data structures

pub mod codec;
/// Error types.
pub mod error;
pub mod frame;
