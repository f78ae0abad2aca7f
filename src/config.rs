//! Configuration and limits for WebSocket connections.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration limits for WebSocket connections.
///
/// These limits prevent resource exhaustion attacks and ensure
/// bounded memory usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum size of a single frame in bytes.
    ///
    /// Default: 16 MB (16 * 1024 * 1024)
    pub max_frame_size: usize,

    /// Maximum size of a complete message in bytes.
    ///
    /// This applies to the total size after reassembling all fragments.
    ///
    /// Default: 64 MB (64 * 1024 * 1024)
    pub max_message_size: usize,

    /// Maximum number of fragments in a single message.
    ///
    /// Default: 4096
    pub max_fragment_count: usize,

    /// Maximum size of handshake data in bytes.
    ///
    /// Default: 8 KB (8192)
    pub max_handshake_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,   // 16 MB
            max_message_size: 64 * 1024 * 1024, // 64 MB
            max_fragment_count: 4096,
            max_handshake_size: 8192,
        }
    }
}

impl Limits {
    /// Create new limits with custom values.
    #[must_use]
    pub const fn new(
        max_frame_size: usize,
        max_message_size: usize,
        max_fragment_count: usize,
        max_handshake_size: usize,
    ) -> Self {
        Self {
            max_frame_size,
            max_message_size,
            max_fragment_count,
            max_handshake_size,
        }
    }

    /// Create limits suitable for small embedded systems.
    ///
    /// - Max frame: 64 KB
    /// - Max message: 256 KB
    /// - Max fragments: 64
    /// - Max handshake: 4 KB
    #[must_use]
    pub const fn embedded() -> Self {
        Self {
            max_frame_size: 64 * 1024,
            max_message_size: 256 * 1024,
            max_fragment_count: 64,
            max_handshake_size: 4096,
        }
    }

    /// Validate that message size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`](crate::Error::MessageTooLarge) if `size` exceeds the configured maximum.
    pub const fn check_message_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_message_size {
            Err(crate::Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that an announced frame length is within limits.
    ///
    /// Takes the raw 64-bit wire length so oversized announcements are
    /// rejected before anything is allocated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameTooLarge`](crate::Error::FrameTooLarge) if `size` exceeds the configured maximum.
    pub const fn check_frame_size(&self, size: u64) -> Result<(), crate::Error> {
        if size > self.max_frame_size as u64 {
            Err(crate::Error::FrameTooLarge {
                size,
                max: self.max_frame_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that fragment count is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooManyFragments`](crate::Error::TooManyFragments) if `count` exceeds the configured maximum.
    pub const fn check_fragment_count(&self, count: usize) -> Result<(), crate::Error> {
        if count > self.max_fragment_count {
            Err(crate::Error::TooManyFragments {
                count,
                max: self.max_fragment_count,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that handshake size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeTooLarge`](crate::Error::HandshakeTooLarge) if `size` exceeds the configured maximum.
    pub const fn check_handshake_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_handshake_size {
            Err(crate::Error::HandshakeTooLarge {
                size,
                max: self.max_handshake_size,
            })
        } else {
            Ok(())
        }
    }
}

/// Deadlines applied to blocking-style operations.
///
/// Every deadline is wall-clock and measured from the start of the call it
/// applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// Maximum time to complete the opening handshake.
    ///
    /// Default: 30 seconds for clients, 5 seconds for accepted connections.
    pub handshake: Duration,

    /// Maximum time to read one complete message once its first byte is available.
    ///
    /// Default: 30 seconds
    pub read: Duration,

    /// Maximum time to hand one frame to the transport.
    ///
    /// Default: 30 seconds
    pub write: Duration,

    /// How long a locally initiated close waits for the peer's acknowledgment.
    ///
    /// Default: 1 second
    pub close: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(30),
            read: Duration::from_secs(30),
            write: Duration::from_secs(30),
            close: Duration::from_secs(1),
        }
    }
}

impl Timeouts {
    /// Create new timeouts with custom values.
    #[must_use]
    pub const fn new(handshake: Duration, read: Duration, write: Duration, close: Duration) -> Self {
        Self {
            handshake,
            read,
            write,
            close,
        }
    }
}

/// WebSocket connection configuration.
///
/// A connection captures its configuration when it is created; only the
/// chunk size can be changed afterwards (see
/// [`Connection::set_chunk_size`](crate::Connection::set_chunk_size)).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Resource limits.
    pub limits: Limits,

    /// Deadlines.
    pub timeouts: Timeouts,

    /// Maximum payload bytes per outgoing frame.
    ///
    /// Messages larger than this are split into continuation frames.
    ///
    /// Default: 4 KB (4096)
    pub chunk_size: usize,

    /// Mask outgoing frames. `None` follows the role: clients mask and
    /// server-accepted connections do not, as RFC 6455 requires.
    ///
    /// Default: None
    pub mask_frames: Option<bool>,

    /// Minimum delay between two consecutive frame writes.
    ///
    /// Default: zero
    pub min_write_delay: Duration,

    /// Sleep between attempts when the transport has nothing to offer.
    ///
    /// Default: 10 ms
    pub poll_interval: Duration,

    /// Delay an event loop waits before re-running a pending handshake step.
    ///
    /// Default: 5 ms (client), zero (server)
    pub handshake_backoff: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            timeouts: Timeouts::default(),
            chunk_size: 4096,
            mask_frames: None,
            min_write_delay: Duration::ZERO,
            poll_interval: Duration::from_millis(10),
            handshake_backoff: Duration::from_millis(5),
        }
    }
}

impl Config {
    /// Create a new configuration with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set custom limits.
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set custom timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the handshake deadline.
    #[must_use]
    pub const fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.handshake = timeout;
        self
    }

    /// Set the per-message read deadline.
    #[must_use]
    pub const fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.read = timeout;
        self
    }

    /// Set the per-frame write deadline.
    #[must_use]
    pub const fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.write = timeout;
        self
    }

    /// Set how long a local close waits for the peer's acknowledgment.
    #[must_use]
    pub const fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.close = timeout;
        self
    }

    /// Set the outgoing chunk size.
    #[must_use]
    pub const fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Force masking of outgoing frames on or off, whatever the role.
    #[must_use]
    pub const fn with_masking(mut self, mask: bool) -> Self {
        self.mask_frames = Some(mask);
        self
    }

    /// Set the minimum delay between frame writes.
    #[must_use]
    pub const fn with_min_write_delay(mut self, delay: Duration) -> Self {
        self.min_write_delay = delay;
        self
    }

    /// Set the retry sleep used while waiting on the transport.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the event loop re-run delay for pending handshakes.
    #[must_use]
    pub const fn with_handshake_backoff(mut self, backoff: Duration) -> Self {
        self.handshake_backoff = backoff;
        self
    }

    /// Configure for accepted server connections (no masking, short handshake).
    #[must_use]
    pub fn server() -> Self {
        Self {
            timeouts: Timeouts {
                handshake: Duration::from_secs(5),
                ..Timeouts::default()
            },
            handshake_backoff: Duration::ZERO,
            ..Default::default()
        }
    }

    /// Configure for client role.
    #[must_use]
    pub fn client() -> Self {
        Self::default()
    }
}

/// Transport flavour requested by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Plain TCP (`ws://`).
    Tcp,
    /// TCP wrapped in TLS (`wss://`).
    Tls,
}

impl Scheme {
    /// Port used when a URL does not name one.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Scheme::Tcp => 80,
            Scheme::Tls => 443,
        }
    }
}

/// Where and how a client connects.
///
/// Every setter validates its input, so a constructed value is always usable
/// by a [`TransportFactory`](crate::transport::TransportFactory).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    scheme: Scheme,
    host: String,
    port: u16,
    path: String,
    timeout: Duration,
    headers: Vec<(String, String)>,
    ca_chain: Option<PathBuf>,
    verify_peer: bool,
    verify_peer_name: bool,
    allow_self_signed: bool,
}

impl ConnectParams {
    /// Shortest accepted connect timeout.
    pub const MIN_TIMEOUT: Duration = Duration::from_secs(1);
    /// Longest accepted connect timeout.
    pub const MAX_TIMEOUT: Duration = Duration::from_secs(600);

    /// Create parameters for `host:port` with path `/` and a 30 second timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`](crate::Error::InvalidConfig) for an
    /// empty host or port 0.
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16) -> Result<Self, crate::Error> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(crate::Error::InvalidConfig("Host must not be empty".into()));
        }
        if port == 0 {
            return Err(crate::Error::InvalidConfig(
                "Port must be between 1 and 65535".into(),
            ));
        }
        Ok(Self {
            scheme,
            host,
            port,
            path: "/".to_string(),
            timeout: Duration::from_secs(30),
            headers: Vec::new(),
            ca_chain: None,
            verify_peer: true,
            verify_peer_name: true,
            allow_self_signed: false,
        })
    }

    /// Parse a `ws://` or `wss://` URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`](crate::Error::InvalidConfig) for an
    /// unknown scheme, a missing host or an invalid port.
    pub fn from_url(url: &str) -> Result<Self, crate::Error> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| crate::Error::InvalidConfig(format!("Invalid URL: {url}")))?;
        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "ws" | "tcp" => Scheme::Tcp,
            "wss" | "tls" | "ssl" => Scheme::Tls,
            other => {
                return Err(crate::Error::InvalidConfig(format!(
                    "Invalid Protocol: {other}"
                )));
            }
        };

        let (authority, path) = match rest.find('/') {
            Some(pos) => (&rest[..pos], &rest[pos..]),
            None => (rest, "/"),
        };

        let parse_port = |port: &str| {
            port.parse::<u16>()
                .map_err(|_| crate::Error::InvalidConfig(format!("Invalid port: {port}")))
        };

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| crate::Error::InvalidConfig(format!("Invalid URL: {url}")))?;
            match tail.strip_prefix(':') {
                Some(port) => (host, parse_port(port)?),
                None => (host, scheme.default_port()),
            }
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, parse_port(port)?),
                None => (authority, scheme.default_port()),
            }
        };

        Ok(Self::new(scheme, host, port)?.with_path(path))
    }

    /// Set the request path. A leading `/` is added when missing.
    #[must_use]
    pub fn with_path(mut self, path: &str) -> Self {
        self.path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        self
    }

    /// Set the connect timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`](crate::Error::InvalidConfig) outside
    /// 1 to 600 seconds.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, crate::Error> {
        if timeout < Self::MIN_TIMEOUT || timeout > Self::MAX_TIMEOUT {
            return Err(crate::Error::InvalidConfig(format!(
                "Connect timeout must be between 1 and 600 seconds, got {timeout:?}"
            )));
        }
        self.timeout = timeout;
        Ok(self)
    }

    /// Add a request header sent during the handshake.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Trust the PEM certificate chain at `path` in addition to the built-in roots.
    #[must_use]
    pub fn with_ca_chain(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_chain = Some(path.into());
        self
    }

    /// Peer verification flags for TLS connections.
    #[must_use]
    pub const fn with_verification(
        mut self,
        verify_peer: bool,
        verify_peer_name: bool,
        allow_self_signed: bool,
    ) -> Self {
        self.verify_peer = verify_peer;
        self.verify_peer_name = verify_peer_name;
        self.allow_self_signed = allow_self_signed;
        self
    }

    /// Requested transport.
    #[must_use]
    pub const fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Host name or address.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port number.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Request path, always starting with `/`.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Connect timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Extra handshake headers.
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// PEM file with additional trusted certificates.
    #[must_use]
    pub fn ca_chain(&self) -> Option<&Path> {
        self.ca_chain.as_deref()
    }

    /// Verify the peer's certificate chain.
    #[must_use]
    pub const fn verify_peer(&self) -> bool {
        self.verify_peer
    }

    /// Verify that the certificate matches the host name.
    #[must_use]
    pub const fn verify_peer_name(&self) -> bool {
        self.verify_peer_name
    }

    /// Accept a self-signed certificate.
    #[must_use]
    pub const fn allow_self_signed(&self) -> bool {
        self.allow_self_signed
    }
}
