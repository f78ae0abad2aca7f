//! Message to frame conversion over a [`ByteChannel`](crate::io::ByteChannel).
//!
//! Outgoing messages are split into chunk-sized frames, masked when asked
//! to. Incoming frames are read one after another until the final bit and
//! concatenated. Control-frame side effects (pong replies, the close
//! handshake) belong to the connection, not to this layer.

mod reader;
mod writer;

pub use reader::{RawMessage, read_message};
pub use writer::{WriteOptions, encode_frames, write_message};
