//! Driving the opening handshake to completion.
//!
//! Every strategy repeats the same non-blocking attempt: pull whatever
//! header bytes are available and stop at the blank line or the deadline.
//! They differ only in who schedules the next attempt.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::io::ByteChannel;
use crate::protocol::handshake::HEADER_TERMINATOR;
use crate::schedule::{EventLoop, TaskRunner};
use crate::transport::Transport;

/// How repeated handshake attempts are scheduled.
pub enum SchedulingStrategy<'a> {
    /// Loop on the calling thread, sleeping between attempts.
    Blocking,
    /// Register each attempt with a task runner and tick it until done.
    CallbackDriven(&'a mut dyn TaskRunner),
    /// Register with an event loop that re-runs the attempt after a backoff.
    EventLoopDriven(&'a mut dyn EventLoop),
}

impl std::fmt::Debug for SchedulingStrategy<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SchedulingStrategy::Blocking => "Blocking",
            SchedulingStrategy::CallbackDriven(_) => "CallbackDriven",
            SchedulingStrategy::EventLoopDriven(_) => "EventLoopDriven",
        })
    }
}

/// Accumulates handshake header bytes up to the blank line.
#[derive(Debug)]
pub(crate) struct HeaderScan {
    buf: Vec<u8>,
    started: Instant,
    timeout: Duration,
    limits: Limits,
}

impl HeaderScan {
    pub(crate) fn new(timeout: Duration, limits: Limits) -> Self {
        Self {
            buf: Vec::new(),
            started: Instant::now(),
            timeout,
            limits,
        }
    }

    fn expired(&self) -> bool {
        self.started.elapsed() >= self.timeout
    }

    /// One non-blocking attempt. Returns the complete header block once the
    /// terminator has been read.
    ///
    /// Bytes are taken one at a time so nothing after the terminator is
    /// consumed.
    pub(crate) fn step<T: Transport>(
        &mut self,
        channel: &mut ByteChannel<T>,
    ) -> Result<Option<Vec<u8>>> {
        while let Some(byte) = channel.try_read_byte()? {
            self.buf.push(byte);
            self.limits.check_handshake_size(self.buf.len())?;
            if self.buf.ends_with(HEADER_TERMINATOR) {
                return Ok(Some(std::mem::take(&mut self.buf)));
            }
        }

        if self.expired() {
            Err(Error::Timeout(self.timeout))
        } else {
            Ok(None)
        }
    }
}

/// State shared between a scheduled step and the driver waiting on it.
struct Scheduled<T> {
    channel: Option<ByteChannel<T>>,
    scan: HeaderScan,
    outcome: Option<Result<Vec<u8>>>,
    ran: bool,
}

impl<T: Transport> Scheduled<T> {
    fn advance(&mut self) {
        if self.outcome.is_some() {
            return;
        }
        self.ran = true;
        if let Some(channel) = self.channel.as_mut() {
            match self.scan.step(channel) {
                Ok(None) => {}
                Ok(Some(headers)) => self.outcome = Some(Ok(headers)),
                Err(e) => self.outcome = Some(Err(e)),
            }
        }
    }

    /// Fail a step the scheduler never got around to running in time.
    fn check_overdue(&mut self) {
        if self.outcome.is_none() && self.scan.expired() {
            self.outcome = Some(Err(Error::Timeout(self.scan.timeout)));
        }
    }

    fn finish(&mut self) -> (Option<ByteChannel<T>>, Result<Vec<u8>>) {
        let outcome = self
            .outcome
            .take()
            .unwrap_or(Err(Error::Timeout(self.scan.timeout)));
        (self.channel.take(), outcome)
    }
}

/// Wait for a complete handshake header block using `strategy`.
///
/// The channel is handed back alongside the outcome; it is only `None` if a
/// scheduler dropped the registered step without running it to the end.
pub(crate) fn await_headers<T: Transport + 'static>(
    mut channel: ByteChannel<T>,
    mut scan: HeaderScan,
    strategy: SchedulingStrategy<'_>,
    poll_interval: Duration,
    backoff: Duration,
) -> (Option<ByteChannel<T>>, Result<Vec<u8>>) {
    let shared = match strategy {
        SchedulingStrategy::Blocking => loop {
            match scan.step(&mut channel) {
                Ok(None) => std::thread::sleep(poll_interval),
                Ok(Some(headers)) => return (Some(channel), Ok(headers)),
                Err(e) => return (Some(channel), Err(e)),
            }
        },
        SchedulingStrategy::CallbackDriven(runner) => {
            let shared = scheduled(channel, scan);
            let task = Rc::clone(&shared);
            let handle = runner.register(Box::new(move || task.borrow_mut().advance()));

            loop {
                runner.run_once();
                let mut state = shared.borrow_mut();
                state.check_overdue();
                if state.outcome.is_some() {
                    break;
                }
                drop(state);
                std::thread::sleep(poll_interval);
            }

            runner.deregister(handle);
            shared
        }
        SchedulingStrategy::EventLoopDriven(event_loop) => {
            let shared = scheduled(channel, scan);
            let task = Rc::clone(&shared);
            let handle = event_loop.register(Box::new(move || task.borrow_mut().advance()));
            event_loop.request_next_run(handle, Duration::ZERO);

            loop {
                event_loop.run_once();
                let mut state = shared.borrow_mut();
                state.check_overdue();
                if state.outcome.is_some() {
                    break;
                }
                if std::mem::take(&mut state.ran) {
                    event_loop.request_next_run(handle, backoff);
                }
            }

            event_loop.deregister(handle);
            shared
        }
    };

    let mut state = shared.borrow_mut();
    state.finish()
}

fn scheduled<T>(channel: ByteChannel<T>, scan: HeaderScan) -> Rc<RefCell<Scheduled<T>>> {
    Rc::new(RefCell::new(Scheduled {
        channel: Some(channel),
        scan,
        outcome: None,
        ran: false,
    }))
}
