//! Scripted in-memory transport for unit tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

use super::Transport;

type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>>>;

#[derive(Default)]
struct MockState {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    eof: bool,
    write_limit: Option<usize>,
    writes_blocked: bool,
    shut_down: bool,
    responder: Option<Responder>,
}

/// Cloning shares the state, so a test can keep one handle and give the
/// other to a connection.
#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    state: Rc<RefCell<MockState>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_inbound(bytes: &[u8]) -> Self {
        let mock = Self::new();
        mock.push_inbound(bytes);
        mock
    }

    pub(crate) fn push_inbound(&self, bytes: &[u8]) {
        self.state.borrow_mut().inbound.extend(bytes.iter().copied());
    }

    pub(crate) fn inbound_len(&self) -> usize {
        self.state.borrow().inbound.len()
    }

    pub(crate) fn written(&self) -> Vec<u8> {
        self.state.borrow().outbound.clone()
    }

    pub(crate) fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.borrow_mut().outbound)
    }

    /// Reads return `Ok(0)` once the inbound queue is drained.
    pub(crate) fn set_eof(&self) {
        self.state.borrow_mut().eof = true;
    }

    /// Accept at most `limit` bytes per write call.
    pub(crate) fn set_write_limit(&self, limit: usize) {
        self.state.borrow_mut().write_limit = Some(limit);
    }

    /// Every write reports zero bytes accepted.
    pub(crate) fn block_writes(&self) {
        self.state.borrow_mut().writes_blocked = true;
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.state.borrow().shut_down
    }

    /// Called with everything written so far after each write; returned bytes
    /// become readable.
    pub(crate) fn set_responder(&self, responder: impl FnMut(&[u8]) -> Option<Vec<u8>> + 'static) {
        self.state.borrow_mut().responder = Some(Box::new(responder));
    }
}

impl Transport for MockTransport {
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.borrow_mut();
        if state.shut_down {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "shut down"));
        }
        if state.inbound.is_empty() {
            return if state.eof {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        let count = buf.len().min(state.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }

    fn write_available(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.borrow_mut();
        if state.shut_down {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "shut down"));
        }
        if state.writes_blocked {
            return Ok(0);
        }
        let count = state.write_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
        state.outbound.extend_from_slice(&buf[..count]);

        if let Some(mut responder) = state.responder.take() {
            if let Some(reply) = responder(&state.outbound) {
                state.inbound.extend(reply);
            }
            state.responder = Some(responder);
        }
        Ok(count)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn is_eof(&mut self) -> bool {
        let state = self.state.borrow();
        state.shut_down || (state.eof && state.inbound.is_empty())
    }

    fn shutdown(&mut self) {
        self.state.borrow_mut().shut_down = true;
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}
