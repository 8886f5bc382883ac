use std::{
    cell::RefCell,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering},
        Arc, Weak,
    },
    thread,
    time::{Duration, Instant},
};

use futures::channel::oneshot;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use super::{PoolError, QueueParent, TaskQueue};
use crate::util::panic_message;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(10);

const RUNNING: u8 = 0;
const SHUTDOWN: u8 = 1;
const STOP: u8 = 2;

static POOL_IDS: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static CURRENT_WORKER: RefCell<Option<(usize, Arc<WorkerFlags>)>> = const { RefCell::new(None) };
}

struct WorkerFlags {
    id: usize,
    retire: AtomicBool,
    // set once the worker no longer counts towards `pool_size`
    exiting: AtomicBool,
    busy: AtomicBool,
}

/// A pool of detached, named worker threads fed by a [`TaskQueue`].
///
/// The pool grows from its core size up to its maximum size whenever every
/// live worker is busy (see the queue's admission table), and shrinks back
/// either when idle workers outlive the keep-alive or when [`set_size`] asks
/// for fewer threads.
///
/// Dropping the pool shuts it down gracefully: queued tasks still run, but no
/// new task is accepted.
///
/// [`set_size`]: WorkerPool::set_size
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

pub struct WorkerPoolBuilder {
    name_prefix: String,
    core_size: usize,
    max_size: Option<usize>,
    keep_alive: Duration,
    allow_core_thread_timeout: bool,
}

impl WorkerPoolBuilder {
    pub fn core_size(mut self, core_size: usize) -> Self {
        self.core_size = core_size;
        self
    }

    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Whether core workers also exit after the keep-alive. Enabled by default.
    pub fn allow_core_thread_timeout(mut self, allow: bool) -> Self {
        self.allow_core_thread_timeout = allow;
        self
    }

    pub fn build(self) -> WorkerPool {
        let core_size = self.core_size.max(1);
        let max_size = self.max_size.unwrap_or(core_size).max(core_size);
        let shared = Arc::new_cyclic(|weak: &Weak<PoolShared>| {
            let queue = TaskQueue::new();
            let parent: Weak<dyn QueueParent> = weak.clone();
            queue.set_parent(parent);
            PoolShared {
                id: POOL_IDS.fetch_add(1, Ordering::Relaxed),
                name_prefix: self.name_prefix,
                queue,
                core_size: AtomicUsize::new(core_size),
                max_size: AtomicUsize::new(max_size),
                pool_size: AtomicUsize::new(0),
                submitted: AtomicUsize::new(0),
                keep_alive: self.keep_alive,
                allow_core_thread_timeout: self.allow_core_thread_timeout,
                run_state: AtomicU8::new(RUNNING),
                workers: Mutex::new(Vec::new()),
                terminated: Condvar::new(),
                thread_seq: AtomicUsize::new(0),
            }
        });
        WorkerPool { shared }
    }
}

impl WorkerPool {
    pub fn builder(name_prefix: impl Into<String>) -> WorkerPoolBuilder {
        WorkerPoolBuilder {
            name_prefix: name_prefix.into(),
            core_size: 1,
            max_size: None,
            keep_alive: DEFAULT_KEEP_ALIVE,
            allow_core_thread_timeout: true,
        }
    }

    /// A pool whose core and maximum size are both `size`.
    pub fn new(name_prefix: impl Into<String>, size: usize) -> Self {
        Self::builder(name_prefix).core_size(size).build()
    }

    /// Runs `task` on a worker thread.
    pub fn execute(&self, task: impl FnOnce() + Send + 'static) -> Result<(), PoolError> {
        self.shared.execute(Box::new(task))
    }

    /// Runs `f` on a worker thread and returns a handle to its result.
    pub fn submit<T, F>(&self, f: F) -> Result<TaskHandle<T>, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.execute(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(f))
                .map_err(|payload| PoolError::Panicked(panic_message(payload.as_ref())));
            // the handle may have been dropped, nobody is waiting then
            let _ = tx.send(result);
        })?;
        Ok(TaskHandle { rx })
    }

    /// Sets both the core and the maximum size.
    ///
    /// Surplus workers are asked to retire, idle ones first. While the queue
    /// reports no remaining capacity they are left to expire by keep-alive.
    pub fn set_size(&self, size: usize) {
        let size = size.max(1);
        let shared = &self.shared;
        shared.core_size.store(size, Ordering::SeqCst);
        let previous = shared.max_size.swap(size, Ordering::SeqCst);
        debug!("resizing pool {}* from {previous} to {size}", shared.name_prefix);
        if size < previous {
            shared.retire_surplus();
        } else if size > previous {
            shared.prestart_for_queue();
        }
    }

    /// Stops accepting tasks; queued tasks still run.
    pub fn shutdown(&self) {
        let shared = &self.shared;
        if shared
            .run_state
            .compare_exchange(RUNNING, SHUTDOWN, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            debug!("shutting down pool {}*", shared.name_prefix);
        }
        shared.queue.wake_all();
        shared.notify_if_terminated();
    }

    /// Stops accepting tasks and cancels every queued one.
    ///
    /// Workers exit once their current task returns; a running task is never
    /// interrupted. Returns the number of cancelled tasks, whose handles
    /// report [`PoolError::Cancelled`].
    pub fn shutdown_now(&self) -> usize {
        let shared = &self.shared;
        shared.run_state.store(STOP, Ordering::SeqCst);
        let cancelled = shared.queue.drain();
        let count = cancelled.len();
        shared.submitted.fetch_sub(count, Ordering::SeqCst);
        drop(cancelled);
        for worker in shared.workers.lock().iter() {
            worker.retire.store(true, Ordering::SeqCst);
        }
        shared.queue.wake_all();
        shared.notify_if_terminated();
        debug!(
            "pool {}* stopped, {count} queued task(s) cancelled",
            shared.name_prefix
        );
        count
    }

    /// Waits until every worker has exited. Returns whether that happened in time.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut workers = self.shared.workers.lock();
        while !workers.is_empty() {
            let Some(deadline) = deadline else {
                self.shared.terminated.wait(&mut workers);
                continue;
            };
            if self
                .shared
                .terminated
                .wait_until(&mut workers, deadline)
                .timed_out()
            {
                return workers.is_empty();
            }
        }
        true
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    pub fn pool_size(&self) -> usize {
        self.shared.pool_size()
    }

    pub fn core_pool_size(&self) -> usize {
        self.shared.core_size.load(Ordering::SeqCst)
    }

    pub fn maximum_pool_size(&self) -> usize {
        self.shared.max_size()
    }

    /// Tasks accepted and not yet finished.
    pub fn submitted_count(&self) -> usize {
        self.shared.submitted.load(Ordering::SeqCst)
    }

    /// Workers currently running a task.
    pub fn active_count(&self) -> usize {
        self.shared
            .workers
            .lock()
            .iter()
            .filter(|w| w.busy.load(Ordering::SeqCst))
            .count()
    }

    pub fn keep_alive(&self) -> Duration {
        self.shared.keep_alive
    }

    pub fn queue(&self) -> &TaskQueue<Task> {
        &self.shared.queue
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name_prefix", &self.shared.name_prefix)
            .field("pool_size", &self.pool_size())
            .field("maximum_pool_size", &self.maximum_pool_size())
            .field("submitted", &self.submitted_count())
            .field("queued", &self.shared.queue.len())
            .finish()
    }
}

/// The pending result of a task handed to [`WorkerPool::submit`].
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<Result<T, PoolError>>,
}

impl<T> TaskHandle<T> {
    /// Blocks until the task has run.
    pub fn join(self) -> Result<T, PoolError> {
        match futures::executor::block_on(self.rx) {
            Ok(result) => result,
            Err(oneshot::Canceled) => Err(PoolError::Cancelled),
        }
    }
}

struct PoolShared {
    id: usize,
    name_prefix: String,
    queue: TaskQueue<Task>,
    core_size: AtomicUsize,
    max_size: AtomicUsize,
    pool_size: AtomicUsize,
    submitted: AtomicUsize,
    keep_alive: Duration,
    allow_core_thread_timeout: bool,
    run_state: AtomicU8,
    workers: Mutex<Vec<Arc<WorkerFlags>>>,
    terminated: Condvar,
    thread_seq: AtomicUsize,
}

impl PoolShared {
    fn execute(self: &Arc<Self>, task: Task) -> Result<(), PoolError> {
        if self.is_shutdown() {
            return Err(PoolError::Rejected);
        }
        self.submitted.fetch_add(1, Ordering::SeqCst);

        if self.reserve_slot(self.core_size.load(Ordering::SeqCst)) {
            return self.spawn_first(task);
        }
        let task = match self.queue.offer(task) {
            Ok(()) => {
                if self.pool_size() == 0 && self.reserve_slot(self.max_size()) {
                    if let Err(e) = self.spawn_worker(None) {
                        warn!("no worker for queued task in {}*: {e}", self.name_prefix);
                    }
                }
                return Ok(());
            }
            Err(task) => task,
        };
        if self.reserve_slot(self.max_size()) {
            return self.spawn_first(task);
        }
        self.queue.force(task).map_err(|_| {
            self.submitted.fetch_sub(1, Ordering::SeqCst);
            PoolError::Rejected
        })
    }

    fn spawn_first(self: &Arc<Self>, task: Task) -> Result<(), PoolError> {
        self.spawn_worker(Some(task)).map_err(|e| {
            self.submitted.fetch_sub(1, Ordering::SeqCst);
            e
        })
    }

    /// Claims one worker slot if fewer than `limit` are taken.
    fn reserve_slot(&self, limit: usize) -> bool {
        self.pool_size
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < limit).then_some(n + 1)
            })
            .is_ok()
    }

    /// Starts a worker on a slot already claimed with `reserve_slot`.
    fn spawn_worker(self: &Arc<Self>, first: Option<Task>) -> Result<(), PoolError> {
        let seq = self.thread_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let flags = Arc::new(WorkerFlags {
            id: seq,
            retire: AtomicBool::new(false),
            exiting: AtomicBool::new(false),
            busy: AtomicBool::new(false),
        });
        self.workers.lock().push(flags.clone());

        let shared = self.clone();
        let worker = flags.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}{seq}", self.name_prefix))
            .spawn(move || shared.run_worker(worker, first));
        match spawned {
            // detached, the pool tracks liveness through `workers`
            Ok(_) => Ok(()),
            Err(e) => {
                warn!("spawn worker {}{seq} failed: {e}", self.name_prefix);
                self.workers.lock().retain(|w| w.id != seq);
                self.pool_size.fetch_sub(1, Ordering::SeqCst);
                self.terminated.notify_all();
                Err(PoolError::Spawn(e))
            }
        }
    }

    fn run_worker(self: Arc<Self>, flags: Arc<WorkerFlags>, first: Option<Task>) {
        CURRENT_WORKER.with(|w| *w.borrow_mut() = Some((self.id, flags.clone())));
        trace!("worker {}{} started", self.name_prefix, flags.id);

        let mut next = first;
        loop {
            let task = match next.take() {
                Some(task) => task,
                None => match self.next_task(&flags) {
                    Some(task) => task,
                    None => break,
                },
            };
            flags.busy.store(true, Ordering::SeqCst);
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
                warn!(
                    "task panicked on worker {}{}: {}",
                    self.name_prefix,
                    flags.id,
                    panic_message(payload.as_ref())
                );
            }
            flags.busy.store(false, Ordering::SeqCst);
            self.submitted.fetch_sub(1, Ordering::SeqCst);
        }

        if !flags.exiting.swap(true, Ordering::SeqCst) {
            self.pool_size.fetch_sub(1, Ordering::SeqCst);
        }
        self.workers.lock().retain(|w| w.id != flags.id);
        self.terminated.notify_all();
        CURRENT_WORKER.with(|w| w.borrow_mut().take());
        trace!("worker {}{} exited", self.name_prefix, flags.id);
    }

    /// Next task for the calling worker, `None` once it must exit.
    fn next_task(&self, flags: &WorkerFlags) -> Option<Task> {
        loop {
            match self.run_state.load(Ordering::SeqCst) {
                STOP => return None,
                SHUTDOWN if self.queue.is_empty() => return None,
                _ => {}
            }
            if flags.retire.load(Ordering::SeqCst) || flags.exiting.load(Ordering::SeqCst) {
                return None;
            }
            if self.pool_size() > self.max_size() && self.release_slot(flags, true) {
                return None;
            }
            let timed = self.allow_core_thread_timeout
                || self.pool_size() > self.core_size.load(Ordering::SeqCst);
            let task = if timed {
                self.queue.poll(self.keep_alive)
            } else {
                self.queue.take()
            };
            if task.is_some() {
                return task;
            }
        }
    }

    /// Gives up the calling worker's slot, keeping at least one worker while
    /// work is queued unless `must` is set.
    fn release_slot(&self, flags: &WorkerFlags, must: bool) -> bool {
        let floor = if self.allow_core_thread_timeout {
            0
        } else {
            self.core_size.load(Ordering::SeqCst)
        };
        let released = self
            .pool_size
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n == 0 {
                    return None;
                }
                let allowed = if must {
                    true
                } else {
                    n > floor && (n > 1 || self.queue.is_empty())
                };
                allowed.then(|| n - 1)
            })
            .is_ok();
        if released {
            flags.exiting.store(true, Ordering::SeqCst);
        }
        released
    }

    fn retire_surplus(&self) {
        if self.queue.remaining_capacity() == 0 {
            debug!(
                "queue of {}* reports no capacity, surplus workers retire on keep-alive",
                self.name_prefix
            );
            return;
        }
        let max = self.max_size();
        {
            let workers = self.workers.lock();
            let mut live: Vec<&Arc<WorkerFlags>> = workers
                .iter()
                .filter(|w| !w.retire.load(Ordering::SeqCst) && !w.exiting.load(Ordering::SeqCst))
                .collect();
            let surplus = live.len().saturating_sub(max);
            // idle workers first
            live.sort_by_key(|w| w.busy.load(Ordering::SeqCst));
            for worker in live.into_iter().take(surplus) {
                worker.retire.store(true, Ordering::SeqCst);
            }
        }
        self.queue.wake_all();
    }

    fn prestart_for_queue(self: &Arc<Self>) {
        let wanted = self.queue.len();
        for _ in 0..wanted {
            if !self.reserve_slot(self.max_size()) {
                break;
            }
            if let Err(e) = self.spawn_worker(None) {
                warn!("prestarting worker for {}* failed: {e}", self.name_prefix);
                break;
            }
        }
    }

    fn notify_if_terminated(&self) {
        let workers = self.workers.lock();
        if workers.is_empty() {
            self.terminated.notify_all();
        }
    }

    fn current_flags(&self) -> Option<Arc<WorkerFlags>> {
        CURRENT_WORKER.with(|w| match w.borrow().as_ref() {
            Some((pool, flags)) if *pool == self.id => Some(flags.clone()),
            _ => None,
        })
    }

    fn max_size(&self) -> usize {
        self.max_size.load(Ordering::SeqCst)
    }
}

impl QueueParent for PoolShared {
    fn pool_size(&self) -> usize {
        self.pool_size.load(Ordering::SeqCst)
    }

    fn maximum_pool_size(&self) -> usize {
        self.max_size()
    }

    fn submitted_count(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }

    fn is_shutdown(&self) -> bool {
        self.run_state.load(Ordering::SeqCst) != RUNNING
    }

    fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    fn current_thread_should_be_stopped(&self) -> bool {
        match self.current_flags() {
            Some(flags) => {
                flags.retire.load(Ordering::SeqCst)
                    || flags.exiting.load(Ordering::SeqCst)
                    || self.is_shutdown()
            }
            None => false,
        }
    }

    fn stop_current_thread_if_needed(&self) {
        let Some(flags) = self.current_flags() else {
            return;
        };
        if flags.exiting.load(Ordering::SeqCst) {
            return;
        }
        let must = flags.retire.load(Ordering::SeqCst)
            || self.run_state.load(Ordering::SeqCst) == STOP
            || self.pool_size() > self.max_size()
            || (self.is_shutdown() && self.queue.is_empty());
        if self.release_slot(&flags, must) {
            trace!("worker {}{} retiring", self.name_prefix, flags.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[derive(Default)]
    struct Gate {
        open: Mutex<bool>,
        cond: Condvar,
    }

    impl Gate {
        fn wait(&self) {
            let mut open = self.open.lock();
            while !*open {
                self.cond.wait(&mut open);
            }
        }

        fn open(&self) {
            *self.open.lock() = true;
            self.cond.notify_all();
        }
    }

    fn wait_until(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if f() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        f()
    }

    #[test]
    fn test_submit_and_join() {
        let pool = WorkerPool::new("submit-test-", 2);
        let handle = pool.submit(|| 40 + 2).unwrap();
        assert_eq!(handle.join().unwrap(), 42);
        let name = pool
            .submit(|| thread::current().name().map(str::to_string))
            .unwrap()
            .join()
            .unwrap()
            .unwrap();
        assert!(name.starts_with("submit-test-"), "{name}");
    }

    #[test]
    fn test_grows_past_core_before_queueing() {
        let pool = WorkerPool::builder("grow-test-")
            .core_size(1)
            .max_size(3)
            .keep_alive(Duration::from_secs(30))
            .build();
        let gate = Arc::new(Gate::default());
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let gate = gate.clone();
                pool.submit(move || gate.wait()).unwrap()
            })
            .collect();
        // every busy worker triggered a new one instead of queueing
        assert_eq!(pool.pool_size(), 3);
        assert!(pool.queue().is_empty());

        // at the ceiling the next task waits in the queue
        let queued = {
            let gate = gate.clone();
            pool.submit(move || gate.wait()).unwrap()
        };
        assert_eq!(pool.pool_size(), 3);
        assert_eq!(pool.queue().len(), 1);
        assert_eq!(pool.submitted_count(), 4);

        gate.open();
        for handle in handles {
            handle.join().unwrap();
        }
        queued.join().unwrap();
        assert!(wait_until(Duration::from_secs(5), || pool.submitted_count() == 0));
    }

    #[test]
    fn test_idle_workers_take_queued_tasks() {
        let pool = WorkerPool::builder("idle-test-")
            .core_size(1)
            .max_size(4)
            .keep_alive(Duration::from_secs(30))
            .build();
        pool.submit(|| ()).unwrap().join().unwrap();
        assert!(wait_until(Duration::from_secs(5), || pool.submitted_count() == 0));
        // one idle worker and nothing outstanding: queue instead of growing
        let handle = pool.submit(|| 1).unwrap();
        assert_eq!(handle.join().unwrap(), 1);
        assert_eq!(pool.pool_size(), 1);
    }

    #[test]
    fn test_panicking_task() {
        let pool = WorkerPool::new("panic-test-", 1);
        let err = pool.submit(|| panic!("boom")).unwrap().join().unwrap_err();
        assert!(matches!(err, PoolError::Panicked(ref msg) if msg == "boom"));
        // the worker survives
        assert_eq!(pool.submit(|| 7).unwrap().join().unwrap(), 7);

        let ran = Arc::new(AtomicUsize::new(0));
        pool.execute(|| panic!("unobserved")).unwrap();
        let counter = ran.clone();
        pool.execute(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert!(wait_until(Duration::from_secs(5), || ran.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn test_shutdown_now_cancels_queued() {
        let pool = WorkerPool::new("cancel-test-", 1);
        let gate = Arc::new(Gate::default());
        let running = {
            let gate = gate.clone();
            pool.submit(move || gate.wait()).unwrap()
        };
        let queued: Vec<_> = (0..2).map(|i| pool.submit(move || i).unwrap()).collect();
        assert_eq!(pool.queue().len(), 2);

        assert_eq!(pool.shutdown_now(), 2);
        assert!(pool.is_shutdown());
        for handle in queued {
            assert!(matches!(handle.join(), Err(PoolError::Cancelled)));
        }
        assert!(matches!(pool.execute(|| ()), Err(PoolError::Rejected)));

        // the running task is not interrupted
        gate.open();
        running.join().unwrap();
        assert!(pool.await_termination(Duration::from_secs(5)));
        assert_eq!(pool.pool_size(), 0);
    }

    #[test]
    fn test_graceful_shutdown_drains_queue() {
        let pool = WorkerPool::new("drain-test-", 1);
        let handles: Vec<_> = (0..4).map(|i| pool.submit(move || i * 2).unwrap()).collect();
        pool.shutdown();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results, vec![0, 2, 4, 6]);
        assert!(pool.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn test_unbounded_keep_alive_and_wait() {
        let pool = WorkerPool::builder("forever-test-")
            .core_size(2)
            .keep_alive(Duration::MAX)
            .build();
        assert_eq!(pool.submit(|| 5).unwrap().join().unwrap(), 5);
        assert_eq!(pool.pool_size(), 1);
        pool.shutdown_now();
        assert!(pool.await_termination(Duration::MAX));
        assert_eq!(pool.pool_size(), 0);
    }

    #[test]
    fn test_idle_workers_expire() {
        let pool = WorkerPool::builder("expire-test-")
            .core_size(2)
            .keep_alive(Duration::from_millis(30))
            .build();
        pool.submit(|| ()).unwrap().join().unwrap();
        assert!(wait_until(Duration::from_secs(5), || pool.pool_size() == 0));
        assert!(pool.await_termination(Duration::from_secs(5)));
        // the pool is still usable afterwards
        assert_eq!(pool.submit(|| 3).unwrap().join().unwrap(), 3);
    }

    fn saturated(name: &str, size: usize) -> (WorkerPool, Arc<Gate>, Vec<TaskHandle<()>>) {
        let pool = WorkerPool::builder(name)
            .core_size(size)
            .keep_alive(Duration::from_secs(60))
            .build();
        let gate = Arc::new(Gate::default());
        let handles = (0..size)
            .map(|_| {
                let gate = gate.clone();
                pool.submit(move || gate.wait()).unwrap()
            })
            .collect();
        (pool, gate, handles)
    }

    #[test]
    fn test_shrink_retires_workers() {
        let (pool, gate, handles) = saturated("shrink-test-", 3);
        assert_eq!(pool.pool_size(), 3);
        gate.open();
        for handle in handles {
            handle.join().unwrap();
        }
        pool.set_size(1);
        assert_eq!(pool.core_pool_size(), 1);
        assert_eq!(pool.maximum_pool_size(), 1);
        assert!(wait_until(Duration::from_secs(5), || pool.pool_size() == 1));
        assert_eq!(pool.submit(|| 5).unwrap().join().unwrap(), 5);
    }

    #[test]
    fn test_shrink_deferred_without_capacity() {
        let (pool, gate, handles) = saturated("defer-test-", 3);
        gate.open();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(wait_until(Duration::from_secs(5), || pool.active_count() == 0));
        pool.queue().set_forced_remaining_capacity(Some(0));
        pool.set_size(1);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(pool.pool_size(), 3);
        pool.queue().set_forced_remaining_capacity(None);
        pool.shutdown_now();
        assert!(pool.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn test_grow_runs_queued_tasks() {
        let pool = WorkerPool::builder("regrow-test-")
            .core_size(1)
            .keep_alive(Duration::from_secs(30))
            .build();
        let gate = Arc::new(Gate::default());
        let blocker = {
            let gate = gate.clone();
            pool.submit(move || gate.wait()).unwrap()
        };
        let queued = pool.submit(|| 9).unwrap();
        assert_eq!(pool.queue().len(), 1);
        pool.set_size(2);
        // the new worker picks up the queued task while the first one is blocked
        assert_eq!(queued.join().unwrap(), 9);
        gate.open();
        blocker.join().unwrap();
    }
}
