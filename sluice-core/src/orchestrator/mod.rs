//! Thread pools used to fan lifecycle work out across a container tree.
//!
//! # Key Components
//!
//! - [`WorkerPool`]: a resizable pool of named OS threads. Core and maximum size
//!   may differ, but containers keep them equal and resize them at runtime.
//! - [`TaskQueue`]: the pool's queue. Its admission control decides per task
//!   whether to enqueue it or to make the pool spawn another worker.
//! - [`TaskHandle`]: the joinable result of [`WorkerPool::submit`].
//! - [`ResultGroup`]: aggregates the results of a fan-out without dropping
//!   any failure.
//!
//! Every started container owns one pool. `start` and `stop` submit one task per
//! child and then join all of them, even after one has failed, so that the
//! caller sees every cause at once.
use thiserror::Error;

use crate::error::{LifecycleError, MultiError};

mod task_queue;
mod worker_pool;

pub use task_queue::{QueueError, QueueParent, TaskQueue};
pub use worker_pool::{Task, TaskHandle, WorkerPool, WorkerPoolBuilder, DEFAULT_KEEP_ALIVE};

#[derive(Error, Debug)]
pub enum PoolError {
    /// The pool is shut down, or its queue refused the task.
    #[error("task rejected: worker pool is not accepting work")]
    Rejected,
    /// The task was dropped before it ran, usually by `shutdown_now`.
    #[error("task cancelled before it ran")]
    Cancelled,
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("unable to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// A collection of named results from a fan-out over several workers.
///
/// Each entry carries the name of the unit of work (typically a child container)
/// so that a failure can be attributed.
pub struct ResultGroup<T, E>(Vec<(String, Result<T, E>)>);

impl<T, E> From<Vec<(String, Result<T, E>)>> for ResultGroup<T, E> {
    fn from(value: Vec<(String, Result<T, E>)>) -> Self {
        Self(value)
    }
}

impl<T, E> From<ResultGroup<T, E>> for Vec<(String, Result<T, E>)> {
    fn from(value: ResultGroup<T, E>) -> Self {
        value.0
    }
}

impl<T, E> ResultGroup<T, E> {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T, E: From<PoolError>> ResultGroup<T, E> {
    /// Waits for every pending task, in order, even after one has failed.
    ///
    /// A task the pool refused to run is recorded as that task's failure.
    pub fn join(pending: Vec<(String, Result<TaskHandle<Result<T, E>>, PoolError>)>) -> Self {
        pending
            .into_iter()
            .map(|(name, handle)| {
                let result = handle
                    .and_then(TaskHandle::join)
                    .map_err(E::from)
                    .and_then(|r| r);
                (name, result)
            })
            .collect::<Vec<_>>()
            .into()
    }
}

impl ResultGroup<(), LifecycleError> {
    /// Collapses the group into a single result carrying every failure.
    pub fn err(self, operation: &'static str) -> Result<(), MultiError> {
        let attempted = self.0.len();
        let causes: Vec<_> = self
            .0
            .into_iter()
            .filter_map(|(name, r)| r.err().map(|e| (name, e)))
            .collect();
        if causes.is_empty() {
            Ok(())
        } else {
            Err(MultiError::new(operation, attempted, causes))
        }
    }
}
