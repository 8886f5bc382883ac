use std::sync::atomic::{AtomicU64, Ordering};

use sluice_core::{
    pipeline::{Contained, Next, Request, Response, Valve},
    AnyResult,
};
use tracing::info;

/// Logs every request passing through and forwards it unchanged.
#[derive(Debug, Default)]
pub struct RequestLogValve {
    contained: Contained,
    prefix: String,
    seen: AtomicU64,
}

impl RequestLogValve {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            contained: Contained::new(),
            prefix: prefix.into(),
            seen: AtomicU64::new(0),
        }
    }

    /// Requests this valve has forwarded.
    pub fn seen(&self) -> u64 {
        self.seen.load(Ordering::Relaxed)
    }
}

impl Valve for RequestLogValve {
    fn name(&self) -> &str {
        "RequestLogValve"
    }

    fn contained(&self) -> &Contained {
        &self.contained
    }

    fn invoke(&self, req: &mut Request, resp: &mut Response, next: Next<'_>) -> AnyResult<()> {
        self.seen.fetch_add(1, Ordering::Relaxed);
        info!(prefix = %self.prefix, "{} {}", req.method(), req.uri());
        next.invoke(req, resp)
    }
}
