//! # wsduplex - RFC 6455 WebSocket engine for single-threaded programs
//!
//! `wsduplex` speaks the WebSocket protocol over any non-blocking duplex byte
//! stream, as a client or as the server side of an accepted connection. It
//! never spawns threads: every wait is a short bounded sleep on the calling
//! thread, and the opening handshake can be handed to a cooperative task
//! runner or event loop so several connections make progress on one thread.
//!
//! ## Features
//!
//! - **Frame codec** with fragmentation, masking and control-frame handling
//! - **One connection type** for both roles, with a graceful close handshake
//! - **Pluggable handshake scheduling** (blocking, task runner, event loop)
//! - **Server registry** with admission checks and broadcast
//! - **TLS** via rustls behind the `tls-rustls` feature
//! - **Resource limits** on frame, message, fragment and handshake sizes
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use wsduplex::{Config, ConnectionRegistry, TcpSource};
//!
//! let source = TcpSource::bind("127.0.0.1:9001")?;
//! let mut server = ConnectionRegistry::new(source, Config::server());
//!
//! loop {
//!     server.poll_new_connections(Duration::from_millis(100))?;
//!     for conn in server.connections() {
//!         for message in conn.get_messages(Duration::ZERO)? {
//!             if message.is_data() {
//!                 conn.send(message)?;
//!             }
//!         }
//!     }
//! }
//! # Ok::<(), wsduplex::Error>(())
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod io;
pub mod message;
pub mod protocol;
pub mod schedule;
pub mod server;
pub mod transport;

pub use config::{Config, ConnectParams, Limits, Scheme, Timeouts};
pub use connection::{Connection, ConnectionId, ConnectionState, Role, SchedulingStrategy};
pub use error::{Error, Result};
pub use io::{ByteChannel, ReadLen};
pub use message::{CloseCode, CloseFrame, Message};
pub use protocol::{Frame, OpCode, WS_GUID, compute_accept_key};
pub use schedule::{
    EventHandle, EventLoop, LocalEventLoop, LocalTaskRunner, TaskHandle, TaskRunner,
};
pub use server::ConnectionRegistry;
pub use transport::{ConnectionSource, TcpConnector, TcpSource, Transport, TransportFactory};

#[cfg(feature = "tls-rustls")]
pub use transport::{RustlsConnector, RustlsSource, TlsStream};

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn test_public_types_are_send() {
        assert_send::<Error>();
        assert_send::<Config>();
        assert_send::<Limits>();
        assert_send::<ConnectParams>();
        assert_send::<Message>();
        assert_send::<CloseCode>();
        assert_send::<CloseFrame>();
        assert_send::<ConnectionState>();
        assert_send::<ConnectionId>();
        assert_send::<Role>();
        assert_send::<Frame>();
    }

    #[test]
    fn test_public_types_are_sync() {
        assert_sync::<Error>();
        assert_sync::<Config>();
        assert_sync::<Limits>();
        assert_sync::<ConnectParams>();
        assert_sync::<Message>();
        assert_sync::<CloseCode>();
        assert_sync::<CloseFrame>();
        assert_sync::<ConnectionState>();
        assert_sync::<ConnectionId>();
        assert_sync::<Role>();
        assert_sync::<Frame>();
    }
}
