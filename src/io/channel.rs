//! Deadline-bounded reliable reads and writes over a non-blocking transport.

use std::io;
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};

use crate::error::{Error, Result};
use crate::transport::Transport;

/// How many bytes a read should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadLen {
    /// Exactly this many bytes.
    Exact(usize),
    /// Whatever is available once at least one byte has arrived.
    Any,
}

/// Largest single read from the transport.
const READ_CHUNK: usize = 4096;

/// Owns a transport and a look-ahead buffer.
///
/// Bytes parked by [`is_empty`](Self::is_empty) or
/// [`try_read_byte`](Self::try_read_byte) callers are always handed out
/// before anything new is read from the transport. Reads never request more
/// bytes than the caller still needs, so nothing past a frame boundary is
/// consumed.
#[derive(Debug)]
pub struct ByteChannel<T> {
    transport: T,
    lookahead: BytesMut,
    poll_interval: Duration,
}

impl<T: Transport> ByteChannel<T> {
    /// Wrap `transport`, sleeping `poll_interval` whenever it has nothing to offer.
    pub fn new(transport: T, poll_interval: Duration) -> Self {
        Self {
            transport,
            lookahead: BytesMut::new(),
            poll_interval,
        }
    }

    /// Borrow the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Bytes parked in the look-ahead buffer.
    pub fn buffered(&self) -> usize {
        self.lookahead.len()
    }

    /// Read `len` bytes, failing with [`Error::Timeout`] once `timeout` has
    /// elapsed since the call started.
    ///
    /// Bytes read before a timeout are discarded.
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] on deadline expiry, [`Error::ConnectionClosed`] if
    /// the peer closed the stream first, [`Error::Io`] for transport failures.
    pub fn read_exact(&mut self, len: ReadLen, timeout: Duration) -> Result<Vec<u8>> {
        let start = Instant::now();

        let mut out = match len {
            ReadLen::Exact(n) => {
                let take = n.min(self.lookahead.len());
                let mut out = Vec::with_capacity(n);
                out.extend_from_slice(&self.lookahead[..take]);
                self.lookahead.advance(take);
                out
            }
            ReadLen::Any => self.lookahead.split().to_vec(),
        };

        loop {
            match len {
                ReadLen::Exact(n) if out.len() == n => return Ok(out),
                ReadLen::Any if !out.is_empty() => loop {
                    // Drain what is immediately available, then stop.
                    match self.read_once(&mut out, READ_CHUNK) {
                        Ok(Some(_)) => {}
                        Ok(None) | Err(Error::ConnectionClosed) => return Ok(out),
                        Err(e) => return Err(e),
                    }
                },
                _ => {}
            }

            let want = match len {
                ReadLen::Exact(n) => n - out.len(),
                ReadLen::Any => READ_CHUNK,
            };
            if self.read_once(&mut out, want)?.is_some() {
                continue;
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(Error::Timeout(timeout));
            }
            std::thread::sleep(self.poll_interval.min(timeout - elapsed));
        }
    }

    /// One non-blocking read of up to `want` bytes appended to `out`, capped
    /// at [`READ_CHUNK`].
    ///
    /// `Ok(None)` means nothing was available.
    fn read_once(&mut self, out: &mut Vec<u8>, want: usize) -> Result<Option<usize>> {
        let want = want.min(READ_CHUNK);
        let filled = out.len();
        out.resize(filled + want, 0);
        let result = self.transport.read_available(&mut out[filled..]);
        match result {
            Ok(0) => {
                out.truncate(filled);
                Err(Error::ConnectionClosed)
            }
            Ok(n) => {
                out.truncate(filled + n);
                Ok(Some(n))
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                out.truncate(filled);
                Ok(None)
            }
            Err(e) => {
                out.truncate(filled);
                Err(e.into())
            }
        }
    }

    /// Take one byte if one is available right now.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] at end of stream, [`Error::Io`] for
    /// transport failures.
    pub fn try_read_byte(&mut self) -> Result<Option<u8>> {
        if !self.lookahead.is_empty() {
            return Ok(Some(self.lookahead.get_u8()));
        }
        let mut byte = Vec::with_capacity(1);
        Ok(self.read_once(&mut byte, 1)?.map(|_| byte[0]))
    }

    /// Returns `true` if no byte is buffered or immediately readable.
    ///
    /// A byte read by the probe is parked in the look-ahead buffer. End of
    /// stream counts as empty.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] for transport failures.
    pub fn is_empty(&mut self) -> Result<bool> {
        if !self.lookahead.is_empty() {
            return Ok(false);
        }
        let mut probe = Vec::with_capacity(1);
        match self.read_once(&mut probe, 1) {
            Ok(Some(_)) => {
                self.lookahead.extend_from_slice(&probe);
                Ok(false)
            }
            Ok(None) | Err(Error::ConnectionClosed) => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// Returns `true` once nothing is buffered and the peer has closed the stream.
    pub fn is_eof(&mut self) -> bool {
        self.lookahead.is_empty() && self.transport.is_eof()
    }

    /// Write every byte of `data`.
    ///
    /// A zero-byte result is backpressure and is retried until `timeout`
    /// elapses. Any other short write is not retried.
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] on deadline expiry, [`Error::PartialWrite`] when
    /// the transport took only part of `data`, [`Error::Io`] for transport
    /// failures.
    pub fn write_all(&mut self, data: &[u8], timeout: Duration) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let start = Instant::now();

        loop {
            let written = match self.transport.write_available(data) {
                Ok(n) => n,
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::Interrupted =>
                {
                    0
                }
                Err(e) => return Err(e.into()),
            };

            let elapsed = start.elapsed();
            if written == data.len() {
                return match self.transport.flush() {
                    Err(e) if e.kind() != io::ErrorKind::WouldBlock => Err(e.into()),
                    _ => Ok(()),
                };
            } else if elapsed > timeout {
                return Err(Error::Timeout(timeout));
            } else if written == 0 {
                std::thread::sleep(self.poll_interval.min(timeout - elapsed));
            } else {
                return Err(Error::PartialWrite {
                    written,
                    expected: data.len(),
                });
            }
        }
    }

    /// Drop buffered bytes, close the transport and hand it back.
    pub fn shutdown(mut self) -> T {
        self.lookahead.clear();
        self.transport.shutdown();
        self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    const POLL: Duration = Duration::from_millis(1);

    #[test]
    fn test_read_exact_across_chunks() {
        let mock = MockTransport::with_inbound(b"hello world");
        let mut channel = ByteChannel::new(mock.clone(), POLL);

        assert_eq!(channel.read_exact(ReadLen::Exact(5), Duration::ZERO).unwrap(), b"hello");
        assert_eq!(channel.read_exact(ReadLen::Exact(1), Duration::ZERO).unwrap(), b" ");
        assert_eq!(mock.inbound_len(), 5);
    }

    /// Records the largest buffer it was offered.
    struct Recording {
        inbound: std::collections::VecDeque<u8>,
        largest_offer: usize,
    }

    impl Transport for Recording {
        fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.largest_offer = self.largest_offer.max(buf.len());
            if self.inbound.is_empty() {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.inbound.len());
            for (slot, byte) in buf.iter_mut().zip(self.inbound.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }

        fn write_available(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn is_eof(&mut self) -> bool {
            false
        }

        fn shutdown(&mut self) {}

        fn peer_addr(&self) -> Option<std::net::SocketAddr> {
            None
        }
    }

    #[test]
    fn test_large_read_is_chunked() {
        let len = 3 * READ_CHUNK + 5;
        let data: Vec<u8> = (0..len).map(|i| (i % 253) as u8).collect();
        let mut channel = ByteChannel::new(
            Recording {
                inbound: data.iter().copied().collect(),
                largest_offer: 0,
            },
            POLL,
        );

        let bytes = channel.read_exact(ReadLen::Exact(len), Duration::ZERO).unwrap();
        assert_eq!(bytes, data);
        assert_eq!(channel.transport().largest_offer, READ_CHUNK);
    }

    #[test]
    fn test_read_never_consumes_past_request() {
        let mock = MockTransport::with_inbound(b"abcdef");
        let mut channel = ByteChannel::new(mock.clone(), POLL);

        channel.read_exact(ReadLen::Exact(2), Duration::ZERO).unwrap();
        assert_eq!(mock.inbound_len(), 4);
    }

    #[test]
    fn test_read_timeout() {
        let mock = MockTransport::with_inbound(b"ab");
        let mut channel = ByteChannel::new(mock, POLL);

        let start = Instant::now();
        let err = channel
            .read_exact(ReadLen::Exact(4), Duration::from_millis(20))
            .unwrap_err();
        assert_eq!(err, Error::Timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_read_any_returns_available() {
        let mock = MockTransport::with_inbound(b"xyz");
        let mut channel = ByteChannel::new(mock, POLL);
        assert_eq!(channel.read_exact(ReadLen::Any, Duration::ZERO).unwrap(), b"xyz");

        let err = channel.read_exact(ReadLen::Any, Duration::from_millis(5)).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_read_end_of_stream() {
        let mock = MockTransport::with_inbound(b"a");
        mock.set_eof();
        let mut channel = ByteChannel::new(mock, POLL);
        assert_eq!(
            channel.read_exact(ReadLen::Exact(2), Duration::from_secs(1)),
            Err(Error::ConnectionClosed)
        );
    }

    #[test]
    fn test_is_empty_parks_lookahead() {
        let mock = MockTransport::new();
        let mut channel = ByteChannel::new(mock.clone(), POLL);
        assert!(channel.is_empty().unwrap());

        mock.push_inbound(b"\x81\x00");
        assert!(!channel.is_empty().unwrap());
        assert_eq!(channel.buffered(), 1);
        assert!(!channel.is_empty().unwrap());

        let bytes = channel.read_exact(ReadLen::Exact(2), Duration::ZERO).unwrap();
        assert_eq!(bytes, vec![0x81, 0x00]);
        assert_eq!(channel.buffered(), 0);
    }

    #[test]
    fn test_try_read_byte() {
        let mock = MockTransport::with_inbound(b"ok");
        let mut channel = ByteChannel::new(mock.clone(), POLL);
        assert_eq!(channel.try_read_byte().unwrap(), Some(b'o'));
        assert_eq!(channel.try_read_byte().unwrap(), Some(b'k'));
        assert_eq!(channel.try_read_byte().unwrap(), None);
        mock.set_eof();
        assert_eq!(channel.try_read_byte(), Err(Error::ConnectionClosed));
    }

    #[test]
    fn test_write_all() {
        let mock = MockTransport::new();
        let mut channel = ByteChannel::new(mock.clone(), POLL);
        channel.write_all(b"frame", Duration::from_secs(1)).unwrap();
        assert_eq!(mock.written(), b"frame");
    }

    #[test]
    fn test_write_partial_is_fatal() {
        let mock = MockTransport::new();
        mock.set_write_limit(3);
        let mut channel = ByteChannel::new(mock, POLL);
        assert_eq!(
            channel.write_all(b"frame", Duration::from_secs(1)),
            Err(Error::PartialWrite {
                written: 3,
                expected: 5
            })
        );
    }

    #[test]
    fn test_write_backpressure_times_out() {
        let mock = MockTransport::new();
        mock.block_writes();
        let mut channel = ByteChannel::new(mock, POLL);
        let err = channel
            .write_all(b"frame", Duration::from_millis(15))
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_shutdown_closes_transport() {
        let mock = MockTransport::with_inbound(b"x");
        let mut channel = ByteChannel::new(mock.clone(), POLL);
        assert!(!channel.is_empty().unwrap());
        channel.shutdown();
        assert!(mock.is_shut_down());
    }
}
