use std::fmt;

use thiserror::Error;

use crate::{lifecycle::LifecycleState, orchestrator::PoolError};

pub type AnyError = anyhow::Error;
pub type AnyResult<T> = std::result::Result<T, AnyError>;

/// Errors returned by lifecycle operations (`init`, `start`, `stop`, `destroy`).
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// The operation is not legal in the component's current state. Nothing changed.
    #[error("{component}: cannot {operation} while in state {state}")]
    InvalidTransition {
        component: String,
        operation: &'static str,
        state: LifecycleState,
    },
    /// One or more children failed during a fan-out.
    #[error(transparent)]
    Children(#[from] MultiError),
    #[error("start/stop executor: {0}")]
    Executor(#[from] PoolError),
    #[error("unable to spawn background processor: {0}")]
    Spawn(#[source] std::io::Error),
    #[error(transparent)]
    Other(#[from] AnyError),
}

/// Rejected structural operations on a container. Nothing changed.
#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("{parent} already has a child named {name:?}")]
    DuplicateChild { parent: String, name: String },
    #[error("{container} cannot be renamed once it has a parent")]
    NameFrozen { container: String },
    #[error("{child} refused the new parent: {reason}")]
    ParentRefused { child: String, reason: String },
    #[error("{parent} is {state} and cannot take children")]
    ParentClosed {
        parent: String,
        state: LifecycleState,
    },
    /// The child was added, but starting it failed.
    #[error("child {child} was added but failed to start: {source}")]
    ChildStart {
        child: String,
        #[source]
        source: Box<LifecycleError>,
    },
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no basic valve is set in the pipeline of {container}")]
    NoBasicValve { container: String },
    #[error("valve {valve} is already attached to a container")]
    ValveAlreadyAttached { valve: String },
    #[error("valve {valve} failed to start: {source}")]
    ValveStart {
        valve: String,
        #[source]
        source: LifecycleError,
    },
    #[error("the pipeline's container is gone")]
    Orphaned,
}

impl LifecycleError {
    pub(crate) fn invalid(
        component: impl Into<String>,
        operation: &'static str,
        state: LifecycleState,
    ) -> Self {
        Self::InvalidTransition {
            component: component.into(),
            operation,
            state,
        }
    }
}

/// Every failure of a child fan-out, keyed by child name.
///
/// No cause is ever dropped: a start or stop that touches `n` children and sees
/// `k` of them fail carries exactly `k` entries.
#[derive(Debug)]
pub struct MultiError {
    operation: &'static str,
    attempted: usize,
    causes: Vec<(String, LifecycleError)>,
}

impl MultiError {
    pub(crate) fn new(
        operation: &'static str,
        attempted: usize,
        causes: Vec<(String, LifecycleError)>,
    ) -> Self {
        Self {
            operation,
            attempted,
            causes,
        }
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Number of children the operation was applied to.
    pub fn attempted(&self) -> usize {
        self.attempted
    }

    pub fn len(&self) -> usize {
        self.causes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.causes.is_empty()
    }

    pub fn causes(&self) -> &[(String, LifecycleError)] {
        &self.causes
    }

    pub fn failed_children(&self) -> impl Iterator<Item = &str> {
        self.causes.iter().map(|(name, _)| name.as_str())
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} child container(s) failed to {}",
            self.causes.len(),
            self.attempted,
            self.operation
        )?;
        for (name, cause) in self.causes.iter() {
            write!(f, "; [{name}] {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}
