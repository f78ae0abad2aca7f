//! Duplex byte streams and the collaborators that produce them.
//!
//! A [`Transport`] is a non-blocking byte pipe. [`TransportFactory`] opens
//! one towards a server and [`ConnectionSource`] yields accepted ones on the
//! server side. Plain TCP implementations are always available; TLS ones
//! live behind the `tls-rustls` feature.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::config::{ConnectParams, Scheme};
use crate::error::{Error, Result};

#[cfg(feature = "tls-rustls")]
mod tls;

#[cfg(feature = "tls-rustls")]
pub use tls::{
    RustlsConnector, RustlsSource, TlsStream, load_certs_from_file, load_private_key_from_file,
};

#[cfg(test)]
pub(crate) mod mock;

/// Default sleep between accept attempts.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A non-blocking duplex byte stream.
pub trait Transport {
    /// Read whatever is available without blocking.
    ///
    /// `Err(WouldBlock)` means nothing is available right now and `Ok(0)`
    /// means the peer closed its side.
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Hand bytes to the transport without blocking. `Ok(0)` and
    /// `Err(WouldBlock)` both signal backpressure.
    fn write_available(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Push buffered bytes towards the peer.
    fn flush(&mut self) -> io::Result<()>;

    /// Returns `true` once the peer has closed the stream and nothing is left to read.
    fn is_eof(&mut self) -> bool;

    /// Close both directions. Errors are ignored.
    fn shutdown(&mut self);

    /// Address of the remote end, when known.
    fn peer_addr(&self) -> Option<SocketAddr>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_available(buf)
    }

    fn write_available(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write_available(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }

    fn is_eof(&mut self) -> bool {
        (**self).is_eof()
    }

    fn shutdown(&mut self) {
        (**self).shutdown();
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        (**self).peer_addr()
    }
}

/// Peek one byte off a non-blocking socket to tell "idle" from "closed".
pub(crate) fn tcp_is_eof(stream: &TcpStream) -> bool {
    let mut probe = [0u8; 1];
    match stream.peek(&mut probe) {
        Ok(0) => true,
        Ok(_) => false,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => false,
        Err(e) if e.kind() == io::ErrorKind::Interrupted => false,
        Err(_) => true,
    }
}

impl Transport for TcpStream {
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }

    fn write_available(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Write::flush(self)
    }

    fn is_eof(&mut self) -> bool {
        tcp_is_eof(self)
    }

    fn shutdown(&mut self) {
        let _ = TcpStream::shutdown(self, Shutdown::Both);
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        TcpStream::peer_addr(self).ok()
    }
}

/// Opens client transports.
pub trait TransportFactory {
    /// Transport produced by this factory.
    type Stream: Transport;

    /// Open a stream to the endpoint described by `params`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] if the stream cannot be established.
    fn connect(&self, params: &ConnectParams) -> Result<Self::Stream>;
}

/// Yields accepted server-side transports.
pub trait ConnectionSource {
    /// Transport yielded by this source.
    type Stream: Transport;

    /// Wait up to `wait` for a pending connection.
    ///
    /// `Duration::ZERO` checks once without waiting. `Ok(None)` means nothing
    /// was pending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the listener itself failed.
    fn accept(&mut self, wait: Duration) -> Result<Option<Self::Stream>>;
}

/// Resolve `params` and open a connected, non-blocking TCP stream.
pub(crate) fn connect_tcp(params: &ConnectParams) -> Result<TcpStream> {
    let addrs = (params.host(), params.port())
        .to_socket_addrs()
        .map_err(|e| Error::Connect(format!("{}:{}: {e}", params.host(), params.port())))?;

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, params.timeout()) {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                tracing::debug!(peer = %addr, "tcp connected");
                return Ok(stream);
            }
            Err(e) => last_error = Some(e),
        }
    }

    Err(Error::Connect(match last_error {
        Some(e) => format!("{}:{}: {e}", params.host(), params.port()),
        None => format!("{}: no addresses resolved", params.host()),
    }))
}

/// Plain TCP client transport factory.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl TcpConnector {
    /// Create a connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Whether a TCP connection to `host:port` can be opened within `timeout`.
    ///
    /// The stream is dropped as soon as it connects. Resolution failures
    /// count as unreachable.
    #[must_use]
    pub fn test_connect(host: &str, port: u16, timeout: Duration) -> bool {
        let addrs = match (host, port).to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                tracing::debug!(host, port, error = %e, "address not resolved");
                return false;
            }
        };

        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(_) => return true,
                Err(e) => tracing::debug!(peer = %addr, error = %e, "endpoint unreachable"),
            }
        }
        false
    }
}

impl TransportFactory for TcpConnector {
    type Stream = TcpStream;

    fn connect(&self, params: &ConnectParams) -> Result<TcpStream> {
        if params.scheme() != Scheme::Tcp {
            return Err(Error::InvalidConfig(
                "TcpConnector cannot open TLS connections".into(),
            ));
        }
        let stream = connect_tcp(params)?;
        stream.set_nonblocking(true)?;
        Ok(stream)
    }
}

/// Run `attempt` until it yields a value or `wait` elapses, sleeping between tries.
pub(crate) fn accept_with_wait<T>(
    wait: Duration,
    poll_interval: Duration,
    mut attempt: impl FnMut() -> io::Result<T>,
) -> Result<Option<T>> {
    let start = Instant::now();
    loop {
        match attempt() {
            Ok(value) => return Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
        let elapsed = start.elapsed();
        if elapsed >= wait {
            return Ok(None);
        }
        std::thread::sleep(poll_interval.min(wait - elapsed));
    }
}

/// Listening TCP socket yielding non-blocking streams.
#[derive(Debug)]
pub struct TcpSource {
    listener: TcpListener,
    poll_interval: Duration,
}

impl TcpSource {
    /// Bind to `addr` and start listening.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the address cannot be bound.
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Self::from_listener(listener)
    }

    /// Wrap an already bound listener.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the listener cannot be made non-blocking.
    pub fn from_listener(listener: TcpListener) -> Result<Self> {
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            poll_interval: ACCEPT_POLL_INTERVAL,
        })
    }

    /// Set the sleep between accept attempts.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Local address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

impl ConnectionSource for TcpSource {
    type Stream = TcpStream;

    fn accept(&mut self, wait: Duration) -> Result<Option<TcpStream>> {
        let accepted = accept_with_wait(wait, self.poll_interval, || self.listener.accept())?;
        match accepted {
            Some((stream, peer)) => {
                stream.set_nonblocking(true)?;
                stream.set_nodelay(true)?;
                tracing::debug!(%peer, "tcp accepted");
                Ok(Some(stream))
            }
            None => Ok(None),
        }
    }
}
