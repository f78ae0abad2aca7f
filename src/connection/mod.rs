//! WebSocket connection management and state machine.
//!
//! [`Connection`] wraps one transport for its whole life, on either end of
//! the wire. The opening handshake is driven by a [`SchedulingStrategy`]; once
//! open, messages go through the frame codec and the close handshake ends in
//! [`ConnectionState::Terminated`].
//!
//! ## Connection Lifecycle
//!
//! 1. **Handshaking** - Upgrade request/response not yet exchanged
//! 2. **Open** - Messages flow both ways
//! 3. **Closing** - Close frame sent or received
//! 4. **Terminated** - Stream released, callbacks run

#[allow(clippy::module_inception)]
mod connection;
mod driver;
mod id;
mod role;
mod state;

pub use connection::Connection;
pub use driver::SchedulingStrategy;
pub use id::ConnectionId;
pub use role::Role;
pub use state::ConnectionState;
