//! Error types for the WebSocket engine.
//!
//! Byte-level and frame-level failures propagate to the caller of the
//! message-level operation that triggered them. Timeouts and protocol errors
//! raised in the middle of a frame leave the stream desynchronized, see
//! [`Error::is_fatal_for_stream`].

use std::time::Duration;

use thiserror::Error;

use crate::connection::ConnectionState;

/// Result type alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during WebSocket operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A deadline elapsed while waiting for bytes or for a write to complete.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Malformed frame header or unexpected reserved bits.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The opening handshake failed (key mismatch, missing header, bad status).
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// The transport could not be established.
    #[error("Connect failed: {0}")]
    Connect(String),

    /// Sending a message failed; carries the underlying cause.
    #[error("Write error: {source}")]
    Write {
        /// What made the write fail.
        source: Box<Error>,
    },

    /// The transport accepted fewer bytes than requested in one attempt.
    #[error("Partial write: {written} bytes of {expected}")]
    PartialWrite {
        /// Bytes the transport accepted.
        written: usize,
        /// Bytes that were offered.
        expected: usize,
    },

    /// The connection has been terminated and owns no stream anymore.
    #[error("Connection terminated")]
    Terminated,

    /// The peer reached end of stream.
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// Operation requires an open connection.
    #[error("Connection not open (state: {0})")]
    NotOpen(ConnectionState),

    /// Invalid UTF-8 in a text message.
    #[error("Invalid UTF-8 in text message")]
    InvalidUtf8,

    /// Frame size exceeds configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Announced frame size.
        size: u64,
        /// Maximum allowed size.
        max: usize,
    },

    /// Message size exceeds configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Reassembled size so far.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Too many fragments in a single message.
    #[error("Too many fragments: {count} (max: {max})")]
    TooManyFragments {
        /// Fragments seen so far.
        count: usize,
        /// Maximum allowed fragments.
        max: usize,
    },

    /// Handshake headers exceed the configured maximum.
    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Bytes received so far.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Rejected configuration or connection parameter.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Wrap `self` as the cause of a failed message send.
    #[must_use]
    pub fn into_write_error(self) -> Self {
        match self {
            err @ Error::Write { .. } => err,
            other => Error::Write {
                source: Box::new(other),
            },
        }
    }

    /// Returns `true` for a deadline expiry, including one wrapped in a write error.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout(_) => true,
            Error::Write { source } => source.is_timeout(),
            _ => false,
        }
    }

    /// Returns `true` for a partial write, including one wrapped in a write error.
    #[must_use]
    pub fn is_partial_write(&self) -> bool {
        match self {
            Error::PartialWrite { .. } => true,
            Error::Write { source } => source.is_partial_write(),
            _ => false,
        }
    }

    /// Returns `true` if the stream can no longer be trusted to be on a frame boundary.
    ///
    /// A connection that returned such an error must be terminated.
    #[must_use]
    pub fn is_fatal_for_stream(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_)
                | Error::Protocol(_)
                | Error::FrameTooLarge { .. }
                | Error::MessageTooLarge { .. }
                | Error::TooManyFragments { .. }
                | Error::ConnectionClosed
                | Error::Io(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
