//! Periodic background processing of a container subtree.
//!
//! A container with a positive background delay owns one timer thread. Each
//! tick sweeps the container and every descendant that does not run a timer of
//! its own; those are left to their own thread.
use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use super::{component::ContextBinding, Container, ContainerKind};
use crate::util::panic_message;

#[derive(Default)]
struct StopSignal {
    done: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    /// Sleeps for `delay` unless stopped first. Returns whether a stop was requested.
    fn sleep(&self, delay: Duration) -> bool {
        // too far out to represent: wait for the stop alone
        let deadline = Instant::now().checked_add(delay);
        let mut done = self.done.lock();
        while !*done {
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut done, deadline).timed_out() {
                        break;
                    }
                }
                None => self.cond.wait(&mut done),
            }
        }
        *done
    }

    fn stop(&self) {
        *self.done.lock() = true;
        self.cond.notify_all();
    }
}

pub(crate) struct BackgroundProcessor {
    signal: Arc<StopSignal>,
    handle: JoinHandle<()>,
}

impl BackgroundProcessor {
    pub(crate) fn spawn(container: &Container, delay: Duration) -> std::io::Result<Self> {
        let signal = Arc::new(StopSignal::default());
        let name = format!("ContainerBackgroundProcessor[{container}]");
        let weak = container.downgrade();
        let thread_signal = signal.clone();
        let thread_name = name.clone();
        let handle = thread::Builder::new().name(name).spawn(move || {
            let swept = panic::catch_unwind(AssertUnwindSafe(|| {
                while !thread_signal.sleep(delay) {
                    let Some(container) = weak.upgrade() else {
                        debug!("{thread_name}: container dropped, exiting");
                        return;
                    };
                    process_children(&container);
                }
            }));
            if let Err(payload) = swept {
                error!(
                    "unexpected death of background thread {thread_name}: {}",
                    panic_message(payload.as_ref())
                );
            }
        })?;
        Ok(Self { signal, handle })
    }

    /// Interrupts the sleep and waits for the thread, unless called from it.
    pub(crate) fn stop(self) {
        self.signal.stop();
        if self.handle.thread().id() == thread::current().id() {
            return;
        }
        if self.handle.join().is_err() {
            error!("background thread panicked while stopping");
        }
    }
}

/// Runs one sweep rooted at `container`.
///
/// The container's loader stays bound while its own periodic work runs.
/// Descendants with a positive delay are skipped, and a failure in one
/// container never stops the sweep of its siblings.
pub fn process_children(container: &Container) {
    let loader = container.loader();
    // a context without a loader failed to start
    if container.kind() == ContainerKind::Context && loader.is_none() {
        return;
    }
    {
        let _binding = ContextBinding::bind(loader.as_deref());
        let span = container.span();
        let _enter = span.enter();
        if let Err(payload) =
            panic::catch_unwind(AssertUnwindSafe(|| container.background_process()))
        {
            error!(
                "background processing of {container} failed: {}",
                panic_message(payload.as_ref())
            );
        }
    }
    for child in container.find_children() {
        if child.background_processor_delay() <= 0 {
            process_children(&child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_interrupted() {
        let signal = Arc::new(StopSignal::default());
        let sleeper = {
            let signal = signal.clone();
            thread::spawn(move || signal.sleep(Duration::from_secs(60)))
        };
        thread::sleep(Duration::from_millis(20));
        signal.stop();
        assert!(sleeper.join().unwrap());
    }

    #[test]
    fn test_sleep_beyond_clock_range() {
        let signal = Arc::new(StopSignal::default());
        let sleeper = {
            let signal = signal.clone();
            thread::spawn(move || signal.sleep(Duration::from_secs(i64::MAX as u64)))
        };
        thread::sleep(Duration::from_millis(20));
        signal.stop();
        assert!(sleeper.join().unwrap());
    }
}
