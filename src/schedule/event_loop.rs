use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::{EventHandle, EventLoop, Task};

/// Timer-driven [`EventLoop`].
///
/// A tick runs every task whose requested run is due. When none is due yet,
/// the tick sleeps until the earliest one is.
#[derive(Default)]
pub struct LocalEventLoop {
    tasks: HashMap<EventHandle, Task>,
    pending: Vec<(Instant, EventHandle)>,
    next_id: u64,
}

impl LocalEventLoop {
    /// Create an empty event loop.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of requested runs not yet performed.
    #[must_use]
    pub fn pending_runs(&self) -> usize {
        self.pending.len()
    }
}

impl std::fmt::Debug for LocalEventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEventLoop")
            .field("tasks", &self.tasks.len())
            .field("pending", &self.pending)
            .finish()
    }
}

impl EventLoop for LocalEventLoop {
    fn register(&mut self, task: Task) -> EventHandle {
        let handle = EventHandle(self.next_id);
        self.next_id += 1;
        self.tasks.insert(handle, task);
        handle
    }

    fn request_next_run(&mut self, handle: EventHandle, delay: Duration) {
        if self.tasks.contains_key(&handle) {
            self.pending.push((Instant::now() + delay, handle));
        }
    }

    fn deregister(&mut self, handle: EventHandle) {
        self.tasks.remove(&handle);
        self.pending.retain(|(_, h)| *h != handle);
    }

    fn run_once(&mut self) {
        let Some(earliest) = self.pending.iter().map(|(due, _)| *due).min() else {
            return;
        };
        let now = Instant::now();
        if earliest > now {
            std::thread::sleep(earliest - now);
        }

        let now = Instant::now();
        let mut due: Vec<_> = self.pending.iter().filter(|(at, _)| *at <= now).copied().collect();
        self.pending.retain(|(at, _)| *at > now);
        due.sort_by_key(|(at, _)| *at);

        for (_, handle) in due {
            if let Some(task) = self.tasks.get_mut(&handle) {
                task();
            }
        }
    }
}
