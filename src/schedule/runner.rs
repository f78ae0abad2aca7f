use super::{Task, TaskHandle, TaskRunner};

/// Round-robin [`TaskRunner`]: each tick runs every task once, in
/// registration order.
#[derive(Default)]
pub struct LocalTaskRunner {
    tasks: Vec<(TaskHandle, Task)>,
    next_id: u64,
}

impl LocalTaskRunner {
    /// Create an empty runner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns `true` if no task is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl std::fmt::Debug for LocalTaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTaskRunner")
            .field("tasks", &self.tasks.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl TaskRunner for LocalTaskRunner {
    fn register(&mut self, task: Task) -> TaskHandle {
        let handle = TaskHandle(self.next_id);
        self.next_id += 1;
        self.tasks.push((handle, task));
        handle
    }

    fn deregister(&mut self, handle: TaskHandle) {
        self.tasks.retain(|(h, _)| *h != handle);
    }

    fn run_once(&mut self) {
        for (_, task) in &mut self.tasks {
            task();
        }
    }
}
