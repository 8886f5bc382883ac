//! Runtime core of a hierarchical request-processing container.
//!
//! - [`container`]: the engine → host → context → wrapper tree and its lifecycle.
//! - [`pipeline`]: the valve chain every container runs requests through.
//! - [`orchestrator`]: the worker pool and admission-controlled queue that
//!   containers fan lifecycle work out to.
//! - [`config`]: serde description of a tree.
mod error;
pub use error::{
    AnyError, AnyResult, ContainerError, LifecycleError, MultiError, PipelineError,
};

pub mod config;
pub mod container;
pub mod lifecycle;
pub mod orchestrator;
pub mod pipeline;
pub mod util;

pub use container::{Container, ContainerKind, WeakContainer};
pub use lifecycle::{Lifecycle, LifecycleCell, LifecycleState};
