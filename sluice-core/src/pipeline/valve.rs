use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::{
    container::{AccessLog, Container, ContainerInner},
    lifecycle::Lifecycle,
    AnyResult,
};

pub type Request = http::Request<Bytes>;
pub type Response = http::Response<Bytes>;

/// One stage of a [`Pipeline`](super::Pipeline).
///
/// A valve receives the request and response by mutable reference along with a
/// [`Next`] cursor over the remaining stages. Forwarding is explicit: a valve
/// that returns without calling [`Next::invoke`] ends the traversal, and the
/// response it leaves behind is what the caller sees.
///
/// ```ignore
/// impl Valve for Audit {
///     fn contained(&self) -> &Contained {
///         &self.contained
///     }
///
///     fn invoke(&self, req: &mut Request, resp: &mut Response, next: Next<'_>) -> AnyResult<()> {
///         tracing::info!("{} {}", req.method(), req.uri());
///         next.invoke(req, resp)
///     }
/// }
/// ```
pub trait Valve: Send + Sync + 'static {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// The slot binding this valve to the container whose pipeline holds it.
    fn contained(&self) -> &Contained;

    fn invoke(&self, req: &mut Request, resp: &mut Response, next: Next<'_>) -> AnyResult<()>;

    /// Periodic work, run from the background processor.
    fn background_process(&self) -> AnyResult<()> {
        Ok(())
    }

    fn lifecycle(&self) -> Option<&dyn Lifecycle> {
        None
    }

    fn access_log(&self) -> Option<&dyn AccessLog> {
        None
    }
}

/// Back-reference from a valve to its container.
///
/// Valves embed one and hand it out through [`Valve::contained`]; the pipeline
/// fills it on attach and clears it on removal.
#[derive(Default)]
pub struct Contained {
    owner: RwLock<Weak<ContainerInner>>,
}

impl Contained {
    pub fn new() -> Self {
        Self::default()
    }

    /// The container this valve is attached to, if any.
    pub fn container(&self) -> Option<Container> {
        self.owner.read().upgrade().map(Container::from_inner)
    }

    pub fn is_attached(&self) -> bool {
        self.owner.read().strong_count() > 0
    }

    /// Binds the valve to `container`; `false` if it already has a live owner.
    pub(crate) fn attach(&self, container: &Container) -> bool {
        let mut owner = self.owner.write();
        if owner.strong_count() > 0 {
            return false;
        }
        *owner = Arc::downgrade(container.inner());
        true
    }

    pub(crate) fn detach(&self) {
        *self.owner.write() = Weak::new();
    }
}

impl std::fmt::Debug for Contained {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.container() {
            Some(container) => write!(f, "Contained({container})"),
            None => f.write_str("Contained(detached)"),
        }
    }
}

/// One-shot cursor over the stages after the current valve.
pub struct Next<'a> {
    rest: &'a [Arc<dyn Valve>],
}

impl<'a> Next<'a> {
    pub fn new(rest: &'a [Arc<dyn Valve>]) -> Self {
        Self { rest }
    }

    /// A cursor with no stages left.
    pub fn end() -> Next<'static> {
        Next { rest: &[] }
    }

    /// Hands the request to the next stage. Past the last stage this is a no-op.
    pub fn invoke(self, req: &mut Request, resp: &mut Response) -> AnyResult<()> {
        match self.rest.split_first() {
            Some((valve, rest)) => valve.invoke(req, resp, Next { rest }),
            None => Ok(()),
        }
    }

    /// The stage `invoke` would run.
    pub fn valve(&self) -> Option<&Arc<dyn Valve>> {
        self.rest.first()
    }

    pub fn is_end(&self) -> bool {
        self.rest.is_empty()
    }
}
