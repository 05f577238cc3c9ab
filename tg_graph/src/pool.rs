//! Fixed-size worker pool and task handles.
//!
//! The pool dispatches per-node closures; each submission returns a
//! [`TaskHandle`] that any number of readers can block on. Leaves resolve
//! synchronously through [`TaskHandle::completed`] without touching the pool.

use std::sync::{Arc, Condvar, Mutex};

use crate::error::Result;

pub(crate) struct WorkerPool {
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    /// A pool sized to the host's logical processor count.
    pub(crate) fn new() -> WorkerPool {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .expect("failed to build worker pool");
        WorkerPool { pool }
    }

    /// Runs `task` on the pool, returning a handle to its eventual result.
    pub(crate) fn submit<T, F>(&self, task: F) -> TaskHandle<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let handle = TaskHandle::pending();
        let completion = handle.clone();
        self.pool.spawn(move || completion.complete(task()));
        handle
    }
}

struct TaskState<T> {
    value: Mutex<Option<Result<T>>>,
    ready: Condvar,
}

/// Shared handle to a task's eventual result. `wait` blocks until the task
/// completes and can be called from any number of threads.
pub struct TaskHandle<T> {
    state: Arc<TaskState<T>>,
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        TaskHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Clone> TaskHandle<T> {
    pub(crate) fn pending() -> TaskHandle<T> {
        TaskHandle {
            state: Arc::new(TaskState {
                value: Mutex::new(None),
                ready: Condvar::new(),
            }),
        }
    }

    /// A handle that is already resolved; used for leaf nodes whose values
    /// need no pool dispatch.
    pub(crate) fn completed(value: T) -> TaskHandle<T> {
        let handle = TaskHandle::pending();
        handle.complete(Ok(value));
        handle
    }

    pub(crate) fn complete(&self, result: Result<T>) {
        let mut value = self
            .state
            .value
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *value = Some(result);
        self.state.ready.notify_all();
    }

    /// Blocks until the task finishes and returns its result.
    pub fn wait(&self) -> Result<T> {
        let mut value = self
            .state
            .value
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(result) = value.as_ref() {
                return result.clone();
            }
            value = self
                .state
                .ready
                .wait(value)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}
