use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use sluice_core::{
    container::AccessLog,
    pipeline::{Contained, Next, Request, Response, Valve},
    AnyResult, Lifecycle, LifecycleCell, LifecycleError, LifecycleState,
};
use tracing::{debug, info};

/// Writes one line per finished request.
///
/// The valve itself only forwards; lines are written when the container's
/// [`log_access`](sluice_core::Container::log_access) reaches it, which also
/// covers requests answered by a descendant without an access log of its own.
#[derive(Debug)]
pub struct AccessLogValve {
    contained: Contained,
    state: LifecycleCell,
    prefix: String,
    logged: AtomicU64,
    reported: AtomicU64,
}

impl AccessLogValve {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            contained: Contained::new(),
            state: LifecycleCell::new(),
            prefix: prefix.into(),
            logged: AtomicU64::new(0),
            reported: AtomicU64::new(0),
        }
    }

    /// Requests logged so far.
    pub fn logged(&self) -> u64 {
        self.logged.load(Ordering::Relaxed)
    }
}

impl Valve for AccessLogValve {
    fn name(&self) -> &str {
        "AccessLogValve"
    }

    fn contained(&self) -> &Contained {
        &self.contained
    }

    fn invoke(&self, req: &mut Request, resp: &mut Response, next: Next<'_>) -> AnyResult<()> {
        next.invoke(req, resp)
    }

    fn background_process(&self) -> AnyResult<()> {
        let logged = self.logged();
        let previous = self.reported.swap(logged, Ordering::Relaxed);
        if logged != previous {
            debug!(prefix = %self.prefix, "{} requests logged since last sweep", logged - previous);
        }
        Ok(())
    }

    fn lifecycle(&self) -> Option<&dyn Lifecycle> {
        Some(self)
    }

    fn access_log(&self) -> Option<&dyn AccessLog> {
        Some(self)
    }
}

impl AccessLog for AccessLogValve {
    fn log(&self, request: &Request, response: &Response, elapsed: Duration) {
        if !self.state.get().is_available() {
            return;
        }
        self.logged.fetch_add(1, Ordering::Relaxed);
        info!(
            prefix = %self.prefix,
            "{} {} {} {}B {}us",
            request.method(),
            request.uri(),
            response.status().as_u16(),
            response.body().len(),
            elapsed.as_micros()
        );
    }
}

impl Lifecycle for AccessLogValve {
    fn start(&self) -> Result<(), LifecycleError> {
        self.state.start_with("AccessLogValve", || Ok(()))
    }

    fn stop(&self) -> Result<(), LifecycleError> {
        self.state.stop_with("AccessLogValve", || {
            debug!(prefix = %self.prefix, "access log closed after {} requests", self.logged());
            Ok(())
        })
    }

    fn destroy(&self) -> Result<(), LifecycleError> {
        self.state.destroy_with("AccessLogValve", || Ok(()))
    }

    fn state(&self) -> LifecycleState {
        self.state.get()
    }
}
