//! The container tree.
//!
//! A [`Container`] is one node of an engine → host → context → wrapper
//! hierarchy. Every node owns a [`Pipeline`], an optional realm, cluster and
//! loader, a start/stop [`WorkerPool`] and, when its background delay is
//! positive, a timer thread. Parents own their children; children only keep a
//! weak reference back.
//!
//! # Lifecycle
//!
//! `start` fans one task per child out to the node's pool and joins all of
//! them before starting its own pipeline, so a node is `STARTED` only once its
//! whole subtree is. Every child failure is collected into a single
//! [`MultiError`](crate::MultiError); one failing child never prevents its
//! siblings from starting or stopping.
//!
//! `stop` runs in reverse: timer, pipeline, children, then realm and cluster.
//! `destroy` tears the subtree down and shuts the pool down immediately.
use std::{
    collections::BTreeMap,
    fmt, ptr,
    sync::{
        atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, info_span, warn, Span};

use crate::{
    error::{ContainerError, LifecycleError},
    lifecycle::{Lifecycle, LifecycleCell, LifecycleState},
    orchestrator::{ResultGroup, WorkerPool, DEFAULT_KEEP_ALIVE},
    pipeline::{Pipeline, Request, Response},
    util::{isolate, resolve_thread_count},
};

mod access_log;
pub mod background;
mod component;
mod event;

pub use access_log::{AccessLog, AccessLogAdapter};
use background::BackgroundProcessor;
pub use component::{Cluster, ContextBinding, Loader, Realm};
pub use event::{ContainerEvent, ContainerEventKind, ContainerListener, EventData};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    Engine,
    Host,
    Context,
    Wrapper,
}

impl ContainerKind {
    /// The only kind this kind accepts as children.
    pub const fn child_kind(self) -> Option<ContainerKind> {
        match self {
            ContainerKind::Engine => Some(ContainerKind::Host),
            ContainerKind::Host => Some(ContainerKind::Context),
            ContainerKind::Context => Some(ContainerKind::Wrapper),
            ContainerKind::Wrapper => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ContainerKind::Engine => "Engine",
            ContainerKind::Host => "Host",
            ContainerKind::Context => "Context",
            ContainerKind::Wrapper => "Wrapper",
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) struct ContainerInner {
    kind: ContainerKind,
    name: RwLock<String>,
    parent: RwLock<Weak<ContainerInner>>,
    children: Mutex<BTreeMap<String, Container>>,
    pipeline: Pipeline,
    realm: RwLock<Option<Arc<dyn Realm>>>,
    cluster: RwLock<Option<Arc<dyn Cluster>>>,
    loader: RwLock<Option<Arc<dyn Loader>>>,
    state: LifecycleCell,
    // serializes init/start/stop/destroy of this node
    lifecycle_lock: Mutex<()>,
    background_processor_delay: AtomicI64,
    start_children: AtomicBool,
    start_stop_threads: AtomicI32,
    keep_alive: Mutex<Duration>,
    executor: Mutex<Option<Arc<WorkerPool>>>,
    background: Mutex<Option<BackgroundProcessor>>,
    listeners: RwLock<Vec<Arc<dyn ContainerListener>>>,
    // outer `None` means the pipeline changed since the last lookup
    access_log: Mutex<Option<Option<Arc<AccessLogAdapter>>>>,
    log_name: Mutex<Option<String>>,
    span: RwLock<Span>,
}

/// Shared handle to one node of the container tree. Cloning is cheap.
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

/// Non-owning handle, see [`Container::downgrade`].
#[derive(Clone, Default)]
pub struct WeakContainer(Weak<ContainerInner>);

impl WeakContainer {
    pub fn upgrade(&self) -> Option<Container> {
        self.0.upgrade().map(Container::from_inner)
    }
}

impl Container {
    pub fn new(kind: ContainerKind, name: impl Into<String>) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<ContainerInner>| ContainerInner {
            kind,
            name: RwLock::new(name.into()),
            parent: RwLock::new(Weak::new()),
            children: Mutex::new(BTreeMap::new()),
            pipeline: Pipeline::new(weak.clone()),
            realm: RwLock::new(None),
            cluster: RwLock::new(None),
            loader: RwLock::new(None),
            state: LifecycleCell::new(),
            lifecycle_lock: Mutex::new(()),
            background_processor_delay: AtomicI64::new(-1),
            start_children: AtomicBool::new(true),
            start_stop_threads: AtomicI32::new(1),
            keep_alive: Mutex::new(DEFAULT_KEEP_ALIVE),
            executor: Mutex::new(None),
            background: Mutex::new(None),
            listeners: RwLock::new(Vec::new()),
            access_log: Mutex::new(None),
            log_name: Mutex::new(None),
            span: RwLock::new(Span::none()),
        });
        Self { inner }
    }

    pub fn engine(name: impl Into<String>) -> Self {
        Self::new(ContainerKind::Engine, name)
    }

    pub fn host(name: impl Into<String>) -> Self {
        Self::new(ContainerKind::Host, name)
    }

    pub fn context(name: impl Into<String>) -> Self {
        Self::new(ContainerKind::Context, name)
    }

    pub fn wrapper(name: impl Into<String>) -> Self {
        Self::new(ContainerKind::Wrapper, name)
    }

    pub(crate) fn from_inner(inner: Arc<ContainerInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<ContainerInner> {
        &self.inner
    }

    pub fn downgrade(&self) -> WeakContainer {
        WeakContainer(Arc::downgrade(&self.inner))
    }

    pub fn ptr_eq(&self, other: &Container) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn kind(&self) -> ContainerKind {
        self.inner.kind
    }

    pub fn name(&self) -> String {
        self.inner.name.read().clone()
    }

    /// Renames the container. Only allowed before it is added to a parent.
    pub fn set_name(&self, name: impl Into<String>) -> Result<(), ContainerError> {
        if self.parent().is_some() {
            return Err(ContainerError::NameFrozen {
                container: self.to_string(),
            });
        }
        *self.inner.name.write() = name.into();
        self.reset_log_name();
        self.fire(ContainerEventKind::PropertyChange, EventData::Property("name"));
        Ok(())
    }

    pub fn parent(&self) -> Option<Container> {
        self.inner.parent.read().upgrade().map(Container::from_inner)
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.state.get()
    }

    pub fn is_available(&self) -> bool {
        self.state().is_available()
    }

    // ===== tuning =====

    /// Seconds between background sweeps. Zero or less: swept by the nearest
    /// ancestor's timer.
    pub fn background_processor_delay(&self) -> i64 {
        self.inner.background_processor_delay.load(Ordering::SeqCst)
    }

    /// Takes effect on the next start.
    pub fn set_background_processor_delay(&self, delay: i64) {
        self.inner
            .background_processor_delay
            .store(delay, Ordering::SeqCst);
    }

    pub fn start_children(&self) -> bool {
        self.inner.start_children.load(Ordering::SeqCst)
    }

    /// Whether children added to a running container are started right away.
    pub fn set_start_children(&self, start_children: bool) {
        let previous = self
            .inner
            .start_children
            .swap(start_children, Ordering::SeqCst);
        if previous != start_children {
            self.fire(
                ContainerEventKind::PropertyChange,
                EventData::Property("start_children"),
            );
        }
    }

    pub fn start_stop_threads(&self) -> i32 {
        self.inner.start_stop_threads.load(Ordering::SeqCst)
    }

    /// Sizes the start/stop pool, resizing it in place when it already exists.
    ///
    /// See [`resolve_thread_count`] for how zero and negative values resolve.
    pub fn set_start_stop_threads(&self, threads: i32) {
        let previous = self
            .inner
            .start_stop_threads
            .swap(threads, Ordering::SeqCst);
        if previous == threads {
            return;
        }
        if let Some(pool) = self.inner.executor.lock().as_ref() {
            pool.set_size(resolve_thread_count(threads));
        }
    }

    /// Idle timeout of start/stop workers. Takes effect on the next `init`.
    pub fn set_keep_alive(&self, keep_alive: Duration) {
        *self.inner.keep_alive.lock() = keep_alive;
    }

    /// Size of the start/stop pool; `None` before `init` and after `destroy`.
    pub fn start_stop_pool_size(&self) -> Option<usize> {
        self.inner
            .executor
            .lock()
            .as_ref()
            .map(|p| p.maximum_pool_size())
    }

    /// Live start/stop worker threads.
    pub fn start_stop_workers(&self) -> usize {
        self.inner
            .executor
            .lock()
            .as_ref()
            .map_or(0, |p| p.pool_size())
    }

    // ===== realm, cluster, loader =====

    /// The realm of this container or, failing that, of its nearest ancestor.
    pub fn realm(&self) -> Option<Arc<dyn Realm>> {
        self.inherited(|inner| inner.realm.read().clone())
    }

    /// Installs `realm` on this container.
    ///
    /// A running container stops the realm it replaces and starts the new one.
    pub fn set_realm(&self, realm: Option<Arc<dyn Realm>>) -> Result<(), LifecycleError> {
        let previous = {
            let mut slot = self.inner.realm.write();
            if same_component(slot.as_ref(), realm.as_ref()) {
                return Ok(());
            }
            std::mem::replace(&mut *slot, realm.clone())
        };
        let running = self.is_available();
        if let Some(lifecycle) = previous.as_ref().and_then(|r| r.lifecycle()) {
            if running {
                if let Err(e) = lifecycle.stop() {
                    warn!("{self}: stopping replaced realm failed: {e}");
                }
            }
        }
        let mut result = Ok(());
        if let Some(realm) = realm.as_ref() {
            realm.set_container(self.downgrade());
            if let Some(lifecycle) = realm.lifecycle() {
                if running {
                    result = lifecycle.start();
                }
            }
        }
        self.fire(ContainerEventKind::PropertyChange, EventData::Property("realm"));
        result
    }

    /// The cluster of this container or, failing that, of its nearest ancestor.
    pub fn cluster(&self) -> Option<Arc<dyn Cluster>> {
        self.inherited(|inner| inner.cluster.read().clone())
    }

    pub fn set_cluster(&self, cluster: Option<Arc<dyn Cluster>>) -> Result<(), LifecycleError> {
        let previous = {
            let mut slot = self.inner.cluster.write();
            if same_component(slot.as_ref(), cluster.as_ref()) {
                return Ok(());
            }
            std::mem::replace(&mut *slot, cluster.clone())
        };
        let running = self.is_available();
        if let Some(lifecycle) = previous.as_ref().and_then(|c| c.lifecycle()) {
            if running {
                if let Err(e) = lifecycle.stop() {
                    warn!("{self}: stopping replaced cluster failed: {e}");
                }
            }
        }
        let mut result = Ok(());
        if let Some(cluster) = cluster.as_ref() {
            cluster.set_container(self.downgrade());
            if let Some(lifecycle) = cluster.lifecycle() {
                if running {
                    result = lifecycle.start();
                }
            }
        }
        self.fire(
            ContainerEventKind::PropertyChange,
            EventData::Property("cluster"),
        );
        result
    }

    /// This container's own loader. Loaders are not inherited.
    pub fn loader(&self) -> Option<Arc<dyn Loader>> {
        self.inner.loader.read().clone()
    }

    pub fn set_loader(&self, loader: Option<Arc<dyn Loader>>) {
        *self.inner.loader.write() = loader;
        self.fire(
            ContainerEventKind::PropertyChange,
            EventData::Property("loader"),
        );
    }

    fn inherited<T>(&self, get: impl Fn(&ContainerInner) -> Option<T>) -> Option<T> {
        let mut current = Some(self.clone());
        while let Some(container) = current {
            if let Some(found) = get(&container.inner) {
                return Some(found);
            }
            current = container.parent();
        }
        None
    }

    fn local_realm(&self) -> Option<Arc<dyn Realm>> {
        self.inner.realm.read().clone()
    }

    fn local_cluster(&self) -> Option<Arc<dyn Cluster>> {
        self.inner.cluster.read().clone()
    }

    // ===== children =====

    /// Adds `child` under this container.
    ///
    /// Neither container may be destroyed or destroying. The child must be of
    /// the kind this container accepts and unparented (or already ours), and
    /// its name must be free. A running
    /// container starts the child right away when `start_children` is set;
    /// `AddChild` fires whether that start succeeds or not.
    pub fn add_child(&self, child: Container) -> Result<(), ContainerError> {
        let name = child.name();
        {
            let mut children = self.inner.children.lock();
            // destroy marks the state before taking its snapshot of children
            let state = self.state();
            if matches!(state, LifecycleState::Destroying | LifecycleState::Destroyed) {
                return Err(ContainerError::ParentClosed {
                    parent: self.to_string(),
                    state,
                });
            }
            if children.contains_key(&name) {
                return Err(ContainerError::DuplicateChild {
                    parent: self.to_string(),
                    name,
                });
            }
            child.accept_parent(self)?;
            children.insert(name.clone(), child.clone());
        }
        debug!("{self}: added child {name}");
        child.fire(
            ContainerEventKind::PropertyChange,
            EventData::Property("parent"),
        );

        let mut result = Ok(());
        if self.start_children() && self.is_available() {
            if let Err(e) = child.start() {
                error!("{self}: starting added child {name} failed: {e}");
                result = Err(ContainerError::ChildStart {
                    child: name,
                    source: Box::new(e),
                });
            }
        }
        self.fire(ContainerEventKind::AddChild, EventData::Child(child));
        result
    }

    fn accept_parent(&self, parent: &Container) -> Result<(), ContainerError> {
        let refuse = |reason: String| ContainerError::ParentRefused {
            child: self.to_string(),
            reason,
        };
        if self.ptr_eq(parent) {
            return Err(refuse("a container cannot contain itself".to_string()));
        }
        if parent.kind().child_kind() != Some(self.kind()) {
            return Err(refuse(format!(
                "a {} cannot be a child of a {}",
                self.kind(),
                parent.kind()
            )));
        }
        if matches!(
            self.state(),
            LifecycleState::Destroying | LifecycleState::Destroyed
        ) {
            return Err(refuse(format!("it is {}", self.state())));
        }
        let existing = {
            let mut current = self.inner.parent.write();
            match current.upgrade() {
                Some(existing) if !Arc::ptr_eq(&existing, &parent.inner) => Some(existing),
                _ => {
                    *current = Arc::downgrade(&parent.inner);
                    None
                }
            }
        };
        match existing {
            Some(existing) => Err(refuse(format!(
                "it already belongs to {}",
                Container::from_inner(existing)
            ))),
            None => Ok(()),
        }
    }

    /// Removes `child`, stopping and destroying it. Returns whether it was ours.
    pub fn remove_child(&self, child: &Container) -> bool {
        let name = child.name();
        let ours = self
            .inner
            .children
            .lock()
            .get(&name)
            .is_some_and(|c| c.ptr_eq(child));
        if !ours {
            return false;
        }
        if child.is_available() {
            if let Err(e) = child.stop() {
                error!("{self}: stopping removed child {name} failed: {e}");
            }
        }
        if child.state() != LifecycleState::Destroying {
            if let Err(e) = child.destroy() {
                error!("{self}: destroying removed child {name} failed: {e}");
            }
        }
        let removed = {
            let mut children = self.inner.children.lock();
            match children.get(&name) {
                Some(c) if c.ptr_eq(child) => children.remove(&name),
                _ => None,
            }
        };
        // destroying the child already detached it
        let Some(removed) = removed else {
            return true;
        };
        *removed.inner.parent.write() = Weak::new();
        debug!("{self}: removed child {name}");
        self.fire(ContainerEventKind::RemoveChild, EventData::Child(removed));
        true
    }

    pub fn find_child(&self, name: &str) -> Option<Container> {
        self.inner.children.lock().get(name).cloned()
    }

    /// Children ordered by name.
    pub fn find_children(&self) -> Vec<Container> {
        self.inner.children.lock().values().cloned().collect()
    }

    // ===== events =====

    pub fn add_container_listener(&self, listener: Arc<dyn ContainerListener>) {
        self.inner.listeners.write().push(listener);
    }

    pub fn remove_container_listener(&self, listener: &Arc<dyn ContainerListener>) -> bool {
        let mut listeners = self.inner.listeners.write();
        match listeners
            .iter()
            .position(|l| ptr::addr_eq(Arc::as_ptr(l), Arc::as_ptr(listener)))
        {
            Some(idx) => {
                listeners.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn find_container_listeners(&self) -> Vec<Arc<dyn ContainerListener>> {
        self.inner.listeners.read().clone()
    }

    /// Notifies every listener, in registration order, on the calling thread.
    pub(crate) fn fire(&self, kind: ContainerEventKind, data: EventData) {
        let listeners = self.find_container_listeners();
        if listeners.is_empty() {
            return;
        }
        let event = ContainerEvent::new(self.clone(), kind, data);
        for listener in listeners.iter() {
            listener.container_event(&event);
        }
    }

    // ===== logging =====

    /// Bracketed names from the root down, e.g. `[engine].[localhost].[/]`.
    pub fn log_name(&self) -> String {
        let mut cached = self.inner.log_name.lock();
        if let Some(name) = cached.as_ref() {
            return name.clone();
        }
        let mut names = Vec::new();
        let mut current = Some(self.clone());
        while let Some(container) = current {
            let name = container.name();
            names.push(if name.is_empty() {
                "[/]".to_string()
            } else {
                format!("[{name}]")
            });
            current = container.parent();
        }
        names.reverse();
        let name = names.join(".");
        *cached = Some(name.clone());
        name
    }

    /// The span lifecycle and background work of this container run in.
    pub fn span(&self) -> Span {
        let span = self.inner.span.read().clone();
        if !span.is_none() {
            return span;
        }
        self.reset_log_name();
        self.inner.span.read().clone()
    }

    fn reset_log_name(&self) {
        *self.inner.log_name.lock() = None;
        let span = info_span!("container", name = %self.log_name());
        *self.inner.span.write() = span;
    }

    // ===== access logging =====

    pub(crate) fn invalidate_access_log(&self) {
        *self.inner.access_log.lock() = None;
    }

    /// Every access-log valve of this container's pipeline, or `None`.
    pub fn access_log(&self) -> Option<Arc<AccessLogAdapter>> {
        let mut cached = self.inner.access_log.lock();
        if let Some(adapter) = cached.as_ref() {
            return adapter.clone();
        }
        let adapter = AccessLogAdapter::collect(self.inner.pipeline.valves()).map(Arc::new);
        *cached = Some(adapter.clone());
        adapter
    }

    /// Logs a finished request here or at the nearest ancestor that logs access.
    ///
    /// Returns `false` when no container on the way up logs access.
    pub fn log_access(&self, request: &Request, response: &Response, elapsed: Duration) -> bool {
        let mut current = Some(self.clone());
        while let Some(container) = current {
            if let Some(log) = container.access_log() {
                log.log(request, response, elapsed);
                return true;
            }
            current = container.parent();
        }
        false
    }

    // ===== lifecycle =====

    fn set_state(&self, state: LifecycleState) {
        self.inner.state.set(state);
        debug!("{self} -> {state}");
        let kind = match state {
            LifecycleState::Starting => ContainerEventKind::Start,
            LifecycleState::Stopping => ContainerEventKind::Stop,
            LifecycleState::Destroying => ContainerEventKind::Destroy,
            _ => return,
        };
        self.fire(kind, EventData::None);
    }

    fn invalid(&self, operation: &'static str) -> LifecycleError {
        LifecycleError::invalid(self.to_string(), operation, self.state())
    }

    fn executor(&self) -> Option<Arc<WorkerPool>> {
        self.inner.executor.lock().clone()
    }

    /// Allocates the start/stop pool. Legal only from `NEW`.
    pub fn init(&self) -> Result<(), LifecycleError> {
        let _guard = self.inner.lifecycle_lock.lock();
        self.init_locked()
    }

    fn init_locked(&self) -> Result<(), LifecycleError> {
        if self.state() != LifecycleState::New {
            return Err(self.invalid("init"));
        }
        self.set_state(LifecycleState::Initializing);
        let size = resolve_thread_count(self.start_stop_threads());
        let pool = WorkerPool::builder(format!("{}-startStop-", self.name()))
            .core_size(size)
            .keep_alive(*self.inner.keep_alive.lock())
            .build();
        *self.inner.executor.lock() = Some(Arc::new(pool));
        self.set_state(LifecycleState::Initialized);
        Ok(())
    }

    /// Starts the container and, in parallel, all of its children.
    pub fn start(&self) -> Result<(), LifecycleError> {
        let _guard = self.inner.lifecycle_lock.lock();
        match self.state() {
            s if s.is_available() => {
                debug!("{self} is already started");
                return Ok(());
            }
            LifecycleState::New => self.init_locked()?,
            LifecycleState::Initialized | LifecycleState::Stopped => {}
            _ => return Err(self.invalid("start")),
        }
        self.set_state(LifecycleState::StartingPrep);
        self.reset_log_name();
        let span = self.span();
        let _enter = span.enter();
        match self.start_internal() {
            Ok(()) => {
                self.set_state(LifecycleState::Started);
                info!("{self} started");
                Ok(())
            }
            Err(e) => {
                self.set_state(LifecycleState::Failed);
                error!("{self} failed to start: {e}");
                Err(e)
            }
        }
    }

    fn start_internal(&self) -> Result<(), LifecycleError> {
        if let Some(cluster) = self.local_cluster() {
            start_component(cluster.lifecycle())?;
        }
        if let Some(realm) = self.local_realm() {
            start_component(realm.lifecycle())?;
        }
        self.fan_out("start", self.find_children(), Container::start)?;
        self.inner.pipeline.start()?;
        self.set_state(LifecycleState::Starting);
        self.thread_start()
    }

    /// Stops the container and, in parallel, all of its running children.
    pub fn stop(&self) -> Result<(), LifecycleError> {
        let _guard = self.inner.lifecycle_lock.lock();
        self.stop_locked()
    }

    fn stop_locked(&self) -> Result<(), LifecycleError> {
        match self.state() {
            LifecycleState::StoppingPrep | LifecycleState::Stopping | LifecycleState::Stopped => {
                debug!("{self} is already stopped");
                return Ok(());
            }
            LifecycleState::New => {
                self.set_state(LifecycleState::Stopped);
                return Ok(());
            }
            LifecycleState::Failed => {}
            s if s.is_available() => self.set_state(LifecycleState::StoppingPrep),
            _ => return Err(self.invalid("stop")),
        }
        let span = self.span();
        let _enter = span.enter();
        match self.stop_internal() {
            Ok(()) => {
                self.set_state(LifecycleState::Stopped);
                info!("{self} stopped");
                Ok(())
            }
            Err(e) => {
                self.set_state(LifecycleState::Failed);
                error!("{self} failed to stop cleanly: {e}");
                Err(e)
            }
        }
    }

    fn stop_internal(&self) -> Result<(), LifecycleError> {
        self.thread_stop();
        self.set_state(LifecycleState::Stopping);

        let mut first_error: Option<LifecycleError> = None;
        let mut record = |result: Result<(), LifecycleError>| {
            if let Err(e) = result {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    error!("{self}: {e}");
                }
            }
        };
        record(self.inner.pipeline.stop());
        let running: Vec<_> = self
            .find_children()
            .into_iter()
            .filter(|c| c.is_available() || c.state() == LifecycleState::Failed)
            .collect();
        record(self.fan_out("stop", running, Container::stop));
        if let Some(realm) = self.local_realm() {
            record(stop_component(realm.lifecycle()));
        }
        if let Some(cluster) = self.local_cluster() {
            record(stop_component(cluster.lifecycle()));
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Tears the container down. A failed container is stopped first.
    pub fn destroy(&self) -> Result<(), LifecycleError> {
        let _guard = self.inner.lifecycle_lock.lock();
        if self.state() == LifecycleState::Failed {
            if let Err(e) = self.stop_locked() {
                warn!("{self}: stop before destroy failed: {e}");
            }
        }
        match self.state() {
            LifecycleState::Destroying | LifecycleState::Destroyed => return Ok(()),
            LifecycleState::New
            | LifecycleState::Initialized
            | LifecycleState::Stopped
            | LifecycleState::Failed => {}
            _ => return Err(self.invalid("destroy")),
        }
        self.set_state(LifecycleState::Destroying);

        let mut result = Ok(());
        if let Some(realm) = self.local_realm() {
            if let Some(Err(e)) = realm.lifecycle().map(|l| l.destroy()) {
                warn!("{self}: destroying realm failed: {e}");
                result = Err(e);
            }
        }
        if let Some(cluster) = self.local_cluster() {
            if let Some(Err(e)) = cluster.lifecycle().map(|l| l.destroy()) {
                warn!("{self}: destroying cluster failed: {e}");
                result = result.and(Err(e));
            }
        }
        if let Err(e) = self.inner.pipeline.destroy() {
            warn!("{self}: destroying pipeline failed: {e}");
            result = result.and(Err(e));
        }
        for child in self.find_children() {
            self.remove_child(&child);
        }
        if let Some(parent) = self.parent() {
            parent.remove_child(self);
        }
        if let Some(pool) = self.inner.executor.lock().take() {
            let cancelled = pool.shutdown_now();
            if cancelled > 0 {
                debug!("{self}: cancelled {cancelled} pending start/stop task(s)");
            }
        }
        self.set_state(LifecycleState::Destroyed);
        result
    }

    /// Runs `op` on every container in `children` on the start/stop pool and
    /// waits for all of them.
    fn fan_out(
        &self,
        operation: &'static str,
        children: Vec<Container>,
        op: fn(&Container) -> Result<(), LifecycleError>,
    ) -> Result<(), LifecycleError> {
        if children.is_empty() {
            return Ok(());
        }
        let pool = self.executor().ok_or_else(|| self.invalid(operation))?;
        let pending = children
            .into_iter()
            .map(|child| {
                let name = child.name();
                (name, pool.submit(move || op(&child)))
            })
            .collect();
        ResultGroup::<(), LifecycleError>::join(pending).err(operation)?;
        Ok(())
    }

    // ===== background processing =====

    fn thread_start(&self) -> Result<(), LifecycleError> {
        let delay = self.background_processor_delay();
        if delay <= 0 {
            return Ok(());
        }
        let mut slot = self.inner.background.lock();
        if slot.is_none() {
            let processor = BackgroundProcessor::spawn(self, Duration::from_secs(delay as u64))
                .map_err(LifecycleError::Spawn)?;
            *slot = Some(processor);
        }
        Ok(())
    }

    fn thread_stop(&self) {
        let processor = self.inner.background.lock().take();
        if let Some(processor) = processor {
            processor.stop();
        }
    }

    /// One round of periodic work for this container alone.
    ///
    /// Cluster, realm, valves and the `Periodic` event each run isolated: a
    /// failure is logged and the remaining steps still run.
    pub fn background_process(&self) {
        if !self.is_available() {
            return;
        }
        if let Some(cluster) = self.local_cluster() {
            isolate("cluster", self, || cluster.background_process());
        }
        if let Some(realm) = self.local_realm() {
            isolate("realm", self, || realm.background_process());
        }
        isolate("pipeline", self, || {
            self.inner.pipeline.background_process();
            Ok(())
        });
        isolate("periodic event", self, || {
            self.fire(ContainerEventKind::Periodic, EventData::None);
            Ok(())
        });
    }
}

fn same_component<T: ?Sized>(a: Option<&Arc<T>>, b: Option<&Arc<T>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)),
        (None, None) => true,
        _ => false,
    }
}

fn start_component(lifecycle: Option<&dyn Lifecycle>) -> Result<(), LifecycleError> {
    match lifecycle {
        Some(l) if !l.state().is_available() => l.start(),
        _ => Ok(()),
    }
}

fn stop_component(lifecycle: Option<&dyn Lifecycle>) -> Result<(), LifecycleError> {
    match lifecycle {
        Some(l) => l.stop(),
        None => Ok(()),
    }
}

impl Lifecycle for Container {
    fn init(&self) -> Result<(), LifecycleError> {
        Container::init(self)
    }

    fn start(&self) -> Result<(), LifecycleError> {
        Container::start(self)
    }

    fn stop(&self) -> Result<(), LifecycleError> {
        Container::stop(self)
    }

    fn destroy(&self) -> Result<(), LifecycleError> {
        Container::destroy(self)
    }

    fn state(&self) -> LifecycleState {
        Container::state(self)
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = self.parent() {
            write!(f, "{parent}.")?;
        }
        write!(f, "{}[{}]", self.kind(), self.inner.name.read())
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("kind", &self.kind())
            .field("name", &*self.inner.name.read())
            .field("state", &self.state())
            .field("children", &self.inner.children.lock().len())
            .finish()
    }
}
