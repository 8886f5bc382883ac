//! Blocking task queue with admission control for [`WorkerPool`](super::WorkerPool).
//!
//! A plain unbounded queue never reports "full", so a pool that only grows on
//! a full queue would never grow past its core size and requests would pile up
//! behind busy workers. [`TaskQueue::offer`] inverts that trigger: while the
//! owning pool is below its maximum and every live worker is already busy, the
//! offer is refused, which the pool reads as "start one more worker".
//!
//! # Decision table for `offer`
//!
//! | condition (checked in order)              | result          |
//! |-------------------------------------------|-----------------|
//! | no parent pool attached                   | enqueue         |
//! | `pool_size == maximum_pool_size`          | enqueue         |
//! | `submitted_count <= pool_size`            | enqueue         |
//! | `pool_size < maximum_pool_size`           | refuse (grow)   |
//! | otherwise                                 | enqueue         |
//!
//! The queue also cooperates with pool shrinking: a worker that timed out in
//! [`TaskQueue::poll`] is offered for retirement, and a worker flagged for
//! retirement never blocks forever in [`TaskQueue::take`].
use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex, RwLock};

/// The view of a worker pool the queue needs for its decisions.
pub trait QueueParent: Send + Sync {
    /// Live worker count.
    fn pool_size(&self) -> usize;
    fn maximum_pool_size(&self) -> usize;
    /// Tasks accepted by the pool and not yet finished.
    fn submitted_count(&self) -> usize;
    fn is_shutdown(&self) -> bool;
    fn keep_alive(&self) -> Duration;
    /// Whether the calling worker has been asked to retire.
    fn current_thread_should_be_stopped(&self) -> bool;
    /// Called after a timed-out poll so the pool may retire the calling worker.
    fn stop_current_thread_if_needed(&self);
}

pub enum QueueError<T> {
    /// No running pool owns this queue.
    NotRunning(T),
    /// The queue was built with a capacity and it is reached.
    Full(T),
}

impl<T> QueueError<T> {
    pub fn into_inner(self) -> T {
        match self {
            QueueError::NotRunning(t) | QueueError::Full(t) => t,
        }
    }
}

impl<T> fmt::Debug for QueueError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::NotRunning(_) => f.write_str("NotRunning(..)"),
            QueueError::Full(_) => f.write_str("Full(..)"),
        }
    }
}

impl<T> fmt::Display for QueueError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::NotRunning(_) => f.write_str("task queue is not running"),
            QueueError::Full(_) => f.write_str("task queue is full"),
        }
    }
}

impl<T> std::error::Error for QueueError<T> {}

pub struct TaskQueue<T> {
    items: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    capacity: Option<usize>,
    parent: RwLock<Option<Weak<dyn QueueParent>>>,
    forced_remaining_capacity: Mutex<Option<usize>>,
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for TaskQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("remaining_capacity", &self.remaining_capacity())
            .finish()
    }
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::build(Some(capacity))
    }

    fn build(capacity: Option<usize>) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            capacity,
            parent: RwLock::new(None),
            forced_remaining_capacity: Mutex::new(None),
        }
    }

    pub fn set_parent(&self, parent: Weak<dyn QueueParent>) {
        *self.parent.write() = Some(parent);
    }

    fn parent(&self) -> Option<Arc<dyn QueueParent>> {
        self.parent.read().as_ref().and_then(Weak::upgrade)
    }

    /// Enqueues `item`, or hands it back when the pool should grow instead.
    pub fn offer(&self, item: T) -> Result<(), T> {
        let parent = match self.parent() {
            // bootstrap: we can't do any checks
            None => return self.push(item),
            Some(parent) => parent,
        };
        // maxed out on workers, queueing is the only option
        if parent.pool_size() == parent.maximum_pool_size() {
            return self.push(item);
        }
        // idle workers exist, one of them will pick it up
        if parent.submitted_count() <= parent.pool_size() {
            return self.push(item);
        }
        // every worker is busy and there is headroom: force a new worker
        if parent.pool_size() < parent.maximum_pool_size() {
            return Err(item);
        }
        self.push(item)
    }

    /// Enqueues `item` bypassing admission control.
    ///
    /// Used once the pool already refused the task but it must still be queued.
    pub fn force(&self, item: T) -> Result<(), QueueError<T>> {
        match self.parent() {
            Some(parent) if !parent.is_shutdown() => self.push(item).map_err(QueueError::Full),
            _ => Err(QueueError::NotRunning(item)),
        }
    }

    /// Waits up to `timeout` for an item.
    ///
    /// A timeout gives the parent a chance to retire the calling worker. A
    /// worker flagged for retirement stops waiting early.
    pub fn poll(&self, timeout: Duration) -> Option<T> {
        let parent = self.parent();
        let item = self.poll_inner(timeout, parent.as_deref());
        if item.is_none() {
            if let Some(parent) = parent {
                parent.stop_current_thread_if_needed();
            }
        }
        item
    }

    fn poll_inner(&self, timeout: Duration, parent: Option<&dyn QueueParent>) -> Option<T> {
        let deadline = Instant::now().checked_add(timeout);
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
            if parent.is_some_and(|p| p.current_thread_should_be_stopped()) {
                return None;
            }
            match deadline {
                Some(deadline) => {
                    if self.not_empty.wait_until(&mut items, deadline).timed_out() {
                        return items.pop_front();
                    }
                }
                None => self.not_empty.wait(&mut items),
            }
        }
    }

    /// Blocks until an item is available.
    ///
    /// A worker that has been asked to retire waits at most the parent's
    /// keep-alive instead, so this may return `None`.
    pub fn take(&self) -> Option<T> {
        let parent = self.parent();
        if let Some(parent) = parent.as_ref() {
            if parent.current_thread_should_be_stopped() {
                return self.poll(parent.keep_alive());
            }
        }
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
            if let Some(parent) = parent.as_ref() {
                if parent.current_thread_should_be_stopped() {
                    drop(items);
                    return self.poll(parent.keep_alive());
                }
            }
            self.not_empty.wait(&mut items);
        }
    }

    /// Remaining capacity, or the forced value when one is set.
    ///
    /// The pool reads a forced `0` as "do not shrink right now".
    pub fn remaining_capacity(&self) -> usize {
        if let Some(forced) = *self.forced_remaining_capacity.lock() {
            return forced;
        }
        match self.capacity {
            Some(capacity) => capacity.saturating_sub(self.len()),
            None => usize::MAX,
        }
    }

    pub fn set_forced_remaining_capacity(&self, forced: Option<usize>) {
        *self.forced_remaining_capacity.lock() = forced;
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Removes every queued item.
    pub fn drain(&self) -> Vec<T> {
        self.items.lock().drain(..).collect()
    }

    /// Wakes every blocked consumer so it can re-check its retirement flag.
    pub(crate) fn wake_all(&self) {
        let _items = self.items.lock();
        self.not_empty.notify_all();
    }

    fn push(&self, item: T) -> Result<(), T> {
        let mut items = self.items.lock();
        if self.capacity.is_some_and(|capacity| items.len() >= capacity) {
            return Err(item);
        }
        items.push_back(item);
        drop(items);
        self.not_empty.notify_one();
        Ok(())
    }
}
