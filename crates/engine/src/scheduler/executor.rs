//! Where jobs run.
//!
//! The scheduler only hands tasks to an [`Executor`]; results come back
//! over its channel.

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks in the background
pub trait Executor: Send + Sync {
    fn execute(&self, task: Task);
}

/// One OS thread per task
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadExecutor;

impl Executor for ThreadExecutor {
    fn execute(&self, task: Task) {
        std::thread::spawn(task);
    }
}

/// Tasks on the global rayon pool
#[cfg(feature = "parallel")]
#[derive(Debug, Clone, Copy, Default)]
pub struct RayonExecutor;

#[cfg(feature = "parallel")]
impl Executor for RayonExecutor {
    fn execute(&self, task: Task) {
        rayon::spawn(task);
    }
}

/// Queues tasks until the test runs them
#[cfg(test)]
#[derive(Default)]
pub(crate) struct ManualExecutor {
    queue: std::sync::Mutex<std::collections::VecDeque<Task>>,
}

#[cfg(test)]
impl ManualExecutor {
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Run the oldest queued task; false when there is none
    pub fn run_next(&self) -> bool {
        let task = self.queue.lock().unwrap().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    pub fn run_all(&self) {
        while self.run_next() {}
    }
}

#[cfg(test)]
impl Executor for ManualExecutor {
    fn execute(&self, task: Task) {
        self.queue.lock().unwrap().push_back(task);
    }
}
