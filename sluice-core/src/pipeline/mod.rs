//! Chain-of-responsibility request processing.
//!
//! Each container owns exactly one [`Pipeline`]: an ordered list of [`Valve`]s
//! terminated by a *basic* valve. Requests enter at the head and every valve
//! decides whether to forward them through its [`Next`] cursor.
//!
//! The chain can be edited while requests are in flight. Every edit publishes a
//! fresh immutable snapshot, and a request runs against the snapshot it started
//! with.
use std::{
    ptr,
    sync::{Arc, Weak},
};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::{
    container::{Container, ContainerEventKind, ContainerInner, EventData},
    error::PipelineError,
    lifecycle::{Lifecycle, LifecycleCell, LifecycleState},
    util::isolate,
    AnyResult, LifecycleError,
};

mod valve;

pub use valve::{Contained, Next, Request, Response, Valve};

struct Chain {
    valves: Vec<Arc<dyn Valve>>,
    basic: Option<Arc<dyn Valve>>,
    // valves followed by basic
    stages: Arc<[Arc<dyn Valve>]>,
}

impl Chain {
    fn empty() -> Self {
        Self {
            valves: Vec::new(),
            basic: None,
            stages: Arc::from(Vec::new()),
        }
    }

    fn rebuild(&mut self) {
        self.stages = self
            .valves
            .iter()
            .chain(self.basic.iter())
            .cloned()
            .collect();
    }
}

fn same_valve(a: &Arc<dyn Valve>, b: &Arc<dyn Valve>) -> bool {
    ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

pub struct Pipeline {
    owner: Weak<ContainerInner>,
    chain: RwLock<Chain>,
    state: LifecycleCell,
}

impl Pipeline {
    pub(crate) fn new(owner: Weak<ContainerInner>) -> Self {
        Self {
            owner,
            chain: RwLock::new(Chain::empty()),
            state: LifecycleCell::new(),
        }
    }

    fn container(&self) -> Result<Container, PipelineError> {
        self.owner
            .upgrade()
            .map(Container::from_inner)
            .ok_or(PipelineError::Orphaned)
    }

    fn owner_name(&self) -> String {
        match self.owner.upgrade() {
            Some(inner) => Container::from_inner(inner).to_string(),
            None => "<detached>".to_string(),
        }
    }

    fn is_available(&self) -> bool {
        self.state.get().is_available()
    }

    /// Attaches `valve` and starts it if the pipeline is running.
    fn adopt(&self, container: &Container, valve: &Arc<dyn Valve>) -> Result<(), PipelineError> {
        if !valve.contained().attach(container) {
            return Err(PipelineError::ValveAlreadyAttached {
                valve: valve.name().to_string(),
            });
        }
        if self.is_available() {
            if let Some(lifecycle) = valve.lifecycle() {
                if let Err(source) = lifecycle.start() {
                    valve.contained().detach();
                    return Err(PipelineError::ValveStart {
                        valve: valve.name().to_string(),
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    /// Stops (if running) and detaches a valve leaving the chain.
    fn release(&self, valve: &Arc<dyn Valve>, destroy: bool) {
        if let Some(lifecycle) = valve.lifecycle() {
            if self.is_available() {
                if let Err(e) = lifecycle.stop() {
                    warn!("stopping valve {} failed: {e}", valve.name());
                }
            }
            if destroy {
                if let Err(e) = lifecycle.destroy() {
                    warn!("destroying valve {} failed: {e}", valve.name());
                }
            }
        }
        valve.contained().detach();
    }

    /// Inserts `valve` right before the basic valve, or makes it the basic
    /// valve when there is none yet.
    pub fn add_valve(&self, valve: Arc<dyn Valve>) -> Result<(), PipelineError> {
        let container = self.container()?;
        self.adopt(&container, &valve)?;
        {
            let mut chain = self.chain.write();
            match chain.basic {
                Some(_) => chain.valves.push(valve.clone()),
                None => chain.basic = Some(valve.clone()),
            }
            chain.rebuild();
        }
        debug!("added valve {} to {container}", valve.name());
        container.invalidate_access_log();
        container.fire(ContainerEventKind::AddValve, EventData::Valve(valve));
        Ok(())
    }

    /// Replaces the basic valve. The previous one is stopped and detached.
    pub fn set_basic(&self, valve: Arc<dyn Valve>) -> Result<(), PipelineError> {
        if self.basic().is_some_and(|old| same_valve(&old, &valve)) {
            return Ok(());
        }
        let container = self.container()?;
        self.adopt(&container, &valve)?;
        let previous = {
            let mut chain = self.chain.write();
            let previous = chain.basic.replace(valve.clone());
            chain.rebuild();
            previous
        };
        container.invalidate_access_log();
        if let Some(previous) = previous {
            self.release(&previous, false);
            container.fire(ContainerEventKind::RemoveValve, EventData::Valve(previous));
        }
        container.fire(ContainerEventKind::AddValve, EventData::Valve(valve));
        Ok(())
    }

    /// Removes `valve`, basic included. Returns `false` if it is not part of this pipeline.
    pub fn remove_valve(&self, valve: &Arc<dyn Valve>) -> bool {
        let removed = {
            let mut chain = self.chain.write();
            let removed = if chain.basic.as_ref().is_some_and(|b| same_valve(b, valve)) {
                chain.basic.take()
            } else {
                chain
                    .valves
                    .iter()
                    .position(|v| same_valve(v, valve))
                    .map(|idx| chain.valves.remove(idx))
            };
            if removed.is_some() {
                chain.rebuild();
            }
            removed
        };
        let Some(removed) = removed else {
            return false;
        };
        self.release(&removed, true);
        if let Ok(container) = self.container() {
            debug!("removed valve {} from {container}", removed.name());
            container.invalidate_access_log();
            container.fire(ContainerEventKind::RemoveValve, EventData::Valve(removed));
        }
        true
    }

    pub fn basic(&self) -> Option<Arc<dyn Valve>> {
        self.chain.read().basic.clone()
    }

    /// The head of the chain: the first valve, or the basic valve.
    pub fn first(&self) -> Option<Arc<dyn Valve>> {
        self.chain.read().stages.first().cloned()
    }

    /// Every stage in invocation order, basic last.
    pub fn valves(&self) -> Vec<Arc<dyn Valve>> {
        self.chain.read().stages.to_vec()
    }

    /// Runs the request through the chain, head first.
    pub fn invoke(&self, req: &mut Request, resp: &mut Response) -> AnyResult<()> {
        let stages = {
            let chain = self.chain.read();
            if chain.basic.is_none() {
                return Err(PipelineError::NoBasicValve {
                    container: self.owner_name(),
                }
                .into());
            }
            chain.stages.clone()
        };
        Next::new(&stages).invoke(req, resp)
    }

    /// Runs each valve's periodic hook. A failing valve does not stop the walk.
    pub fn background_process(&self) {
        let stages = self.chain.read().stages.clone();
        let owner = self.owner_name();
        for valve in stages.iter() {
            isolate(valve.name(), &owner, || valve.background_process());
        }
    }

    fn lifecycle_stages(&self) -> Vec<Arc<dyn Valve>> {
        self.chain
            .read()
            .stages
            .iter()
            .filter(|v| v.lifecycle().is_some())
            .cloned()
            .collect()
    }
}

impl Lifecycle for Pipeline {
    fn start(&self) -> Result<(), LifecycleError> {
        let component = format!("pipeline of {}", self.owner_name());
        self.state.start_with(&component, || {
            for valve in self.lifecycle_stages() {
                if let Some(lifecycle) = valve.lifecycle() {
                    lifecycle.start().map_err(|e| PipelineError::ValveStart {
                        valve: valve.name().to_string(),
                        source: e,
                    })?;
                }
            }
            Ok(())
        })
    }

    fn stop(&self) -> Result<(), LifecycleError> {
        let component = format!("pipeline of {}", self.owner_name());
        self.state.stop_with(&component, || {
            let mut first_error = None;
            for valve in self.lifecycle_stages() {
                if let Some(Err(e)) = valve.lifecycle().map(|l| l.stop()) {
                    warn!("stopping valve {} failed: {e}", valve.name());
                    first_error.get_or_insert(e);
                }
            }
            first_error.map_or(Ok(()), |e| Err(e.into()))
        })
    }

    fn destroy(&self) -> Result<(), LifecycleError> {
        let component = format!("pipeline of {}", self.owner_name());
        self.state.destroy_with(&component, || {
            for valve in self.lifecycle_stages() {
                if let Some(Err(e)) = valve.lifecycle().map(|l| l.destroy()) {
                    warn!("destroying valve {} failed: {e}", valve.name());
                }
            }
            Ok(())
        })
    }

    fn state(&self) -> LifecycleState {
        self.state.get()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let chain = self.chain.read();
        f.debug_struct("Pipeline")
            .field("stages", &chain.stages.iter().map(|v| v.name()).collect::<Vec<_>>())
            .field("state", &self.state.get())
            .finish()
    }
}
