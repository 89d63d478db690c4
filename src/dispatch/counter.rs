use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Number of goal states currently executing. Shared between the poll loop,
/// which reads it to size admission, and the workers, which hold slots.
#[derive(Debug, Default)]
pub struct ExecutingTasks {
    count: AtomicUsize,
}

impl ExecutingTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Free slots under `max`; never negative.
    pub fn capacity(&self, max: usize) -> usize {
        max.saturating_sub(self.current())
    }

    /// Count one more executing task until the returned slot is dropped.
    pub fn acquire(self: &Arc<Self>) -> TaskSlot {
        self.count.fetch_add(1, Ordering::SeqCst);
        TaskSlot {
            counter: Arc::clone(self),
        }
    }
}

/// Held by a worker for the lifetime of its execution. Dropping it releases
/// the count whether the task succeeded, failed, or panicked.
#[derive(Debug)]
pub struct TaskSlot {
    counter: Arc<ExecutingTasks>,
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.counter.count.fetch_sub(1, Ordering::SeqCst);
    }
}
