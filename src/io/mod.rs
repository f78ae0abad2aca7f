//! Reliable byte-level I/O on top of a [`Transport`](crate::transport::Transport).

mod channel;

pub use channel::{ByteChannel, ReadLen};
