//! Cooperative scheduling collaborators.
//!
//! A handshake driven through a [`TaskRunner`] or an [`EventLoop`] registers
//! a step function and lets the scheduler decide when it runs, so other
//! registered tasks interleave between handshake attempts on one thread.
//!
//! [`LocalTaskRunner`] and [`LocalEventLoop`] are minimal single-threaded
//! implementations. Anything else implementing the traits works the same.

mod event_loop;
mod runner;

pub use event_loop::LocalEventLoop;
pub use runner::LocalTaskRunner;

use std::time::Duration;

/// A task as seen by a scheduler.
pub type Task = Box<dyn FnMut()>;

/// Identifies a task registered with a [`TaskRunner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(pub(crate) u64);

/// Identifies a task registered with an [`EventLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle(pub(crate) u64);

/// Runs every registered task once per tick.
pub trait TaskRunner {
    /// Add a task that runs on every subsequent tick until deregistered.
    fn register(&mut self, task: Task) -> TaskHandle;

    /// Remove a task. Unknown handles are ignored.
    fn deregister(&mut self, handle: TaskHandle);

    /// Advance one tick.
    fn run_once(&mut self);
}

/// Runs registered tasks when a run has been requested for them.
pub trait EventLoop {
    /// Add a task. It does not run until [`request_next_run`](Self::request_next_run).
    fn register(&mut self, task: Task) -> EventHandle;

    /// Run the task once, no earlier than `delay` from now.
    fn request_next_run(&mut self, handle: EventHandle, delay: Duration);

    /// Remove a task and any pending run. Unknown handles are ignored.
    fn deregister(&mut self, handle: EventHandle);

    /// Advance one tick.
    fn run_once(&mut self);
}
