use std::{sync::Arc, time::Duration};

use crate::pipeline::{Request, Response, Valve};

/// Records finished requests. Valves expose it through `Valve::access_log`.
pub trait AccessLog: Send + Sync {
    fn log(&self, request: &Request, response: &Response, elapsed: Duration);
}

/// Every access-log valve of one pipeline, behind a single [`AccessLog`].
pub struct AccessLogAdapter {
    valves: Vec<Arc<dyn Valve>>,
}

impl AccessLogAdapter {
    /// `None` when no valve logs access.
    pub(crate) fn collect(valves: Vec<Arc<dyn Valve>>) -> Option<Self> {
        let valves: Vec<_> = valves
            .into_iter()
            .filter(|v| v.access_log().is_some())
            .collect();
        (!valves.is_empty()).then_some(Self { valves })
    }

    pub fn len(&self) -> usize {
        self.valves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.valves.is_empty()
    }
}

impl AccessLog for AccessLogAdapter {
    fn log(&self, request: &Request, response: &Response, elapsed: Duration) {
        for log in self.valves.iter().filter_map(|v| v.access_log()) {
            log.log(request, response, elapsed);
        }
    }
}
