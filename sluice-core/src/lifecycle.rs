//! Lifecycle states shared by containers, pipelines and pluggable components.
//!
//! A component moves through
//!
//! ```text
//! NEW -> INITIALIZING -> INITIALIZED -> STARTING_PREP -> STARTING -> STARTED
//!   STARTED -> STOPPING_PREP -> STOPPING -> STOPPED -> DESTROYING -> DESTROYED
//! ```
//!
//! with `FAILED` reachable from any step that can fail. A component is
//! *available* while it is `STARTING_PREP`, `STARTING` or `STARTED`.
//!
//! Components that only need the plain start/stop/destroy flow can embed a
//! [`LifecycleCell`] and implement [`Lifecycle`] on top of it.
use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{AnyResult, LifecycleError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    New,
    Initializing,
    Initialized,
    StartingPrep,
    Starting,
    Started,
    StoppingPrep,
    Stopping,
    Stopped,
    Destroying,
    Destroyed,
    Failed,
}

impl LifecycleState {
    #[inline]
    pub const fn is_available(self) -> bool {
        matches!(
            self,
            LifecycleState::StartingPrep | LifecycleState::Starting | LifecycleState::Started
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            LifecycleState::New => "NEW",
            LifecycleState::Initializing => "INITIALIZING",
            LifecycleState::Initialized => "INITIALIZED",
            LifecycleState::StartingPrep => "STARTING_PREP",
            LifecycleState::Starting => "STARTING",
            LifecycleState::Started => "STARTED",
            LifecycleState::StoppingPrep => "STOPPING_PREP",
            LifecycleState::Stopping => "STOPPING",
            LifecycleState::Stopped => "STOPPED",
            LifecycleState::Destroying => "DESTROYING",
            LifecycleState::Destroyed => "DESTROYED",
            LifecycleState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Start/stop/destroy capability.
///
/// Valves, realms and clusters expose it optionally (see `Valve::lifecycle`);
/// containers and pipelines always have it.
pub trait Lifecycle: Send + Sync {
    fn init(&self) -> Result<(), LifecycleError> {
        Ok(())
    }

    fn start(&self) -> Result<(), LifecycleError>;

    fn stop(&self) -> Result<(), LifecycleError>;

    fn destroy(&self) -> Result<(), LifecycleError> {
        Ok(())
    }

    fn state(&self) -> LifecycleState;
}

/// Thread-safe lifecycle state with the plain start/stop/destroy rules.
#[derive(Debug)]
pub struct LifecycleCell {
    state: Mutex<LifecycleState>,
}

impl Default for LifecycleCell {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleCell {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(LifecycleState::New),
        }
    }

    #[inline]
    pub fn get(&self) -> LifecycleState {
        *self.state.lock()
    }

    pub fn set(&self, state: LifecycleState) {
        *self.state.lock() = state;
    }

    /// Runs `f` and marks the component `STARTED`.
    ///
    /// Already available components are left alone. `NEW`, `INITIALIZED` and
    /// `STOPPED` may start, anything else is rejected. A failing `f` leaves
    /// the component `FAILED`.
    pub fn start_with(
        &self,
        component: &str,
        f: impl FnOnce() -> AnyResult<()>,
    ) -> Result<(), LifecycleError> {
        {
            let mut state = self.state.lock();
            match *state {
                s if s.is_available() => return Ok(()),
                LifecycleState::New | LifecycleState::Initialized | LifecycleState::Stopped => {
                    *state = LifecycleState::StartingPrep;
                }
                s => return Err(LifecycleError::invalid(component, "start", s)),
            }
        }
        self.finish(f(), LifecycleState::Started)
    }

    /// Runs `f` and marks the component `STOPPED`.
    ///
    /// Stopping an already stopped (or never started) component is a no-op.
    pub fn stop_with(
        &self,
        component: &str,
        f: impl FnOnce() -> AnyResult<()>,
    ) -> Result<(), LifecycleError> {
        {
            let mut state = self.state.lock();
            match *state {
                LifecycleState::New
                | LifecycleState::Initialized
                | LifecycleState::StoppingPrep
                | LifecycleState::Stopping
                | LifecycleState::Stopped => return Ok(()),
                s if s.is_available() || s == LifecycleState::Failed => {
                    *state = LifecycleState::Stopping;
                }
                s => return Err(LifecycleError::invalid(component, "stop", s)),
            }
        }
        self.finish(f(), LifecycleState::Stopped)
    }

    /// Runs `f` and marks the component `DESTROYED`.
    pub fn destroy_with(
        &self,
        component: &str,
        f: impl FnOnce() -> AnyResult<()>,
    ) -> Result<(), LifecycleError> {
        {
            let mut state = self.state.lock();
            match *state {
                LifecycleState::Destroying | LifecycleState::Destroyed => return Ok(()),
                LifecycleState::New
                | LifecycleState::Initialized
                | LifecycleState::Stopped
                | LifecycleState::Failed => *state = LifecycleState::Destroying,
                s => return Err(LifecycleError::invalid(component, "destroy", s)),
            }
        }
        self.finish(f(), LifecycleState::Destroyed)
    }

    fn finish(&self, result: AnyResult<()>, on_success: LifecycleState) -> Result<(), LifecycleError> {
        match result {
            Ok(()) => {
                self.set(on_success);
                Ok(())
            }
            Err(e) => {
                self.set(LifecycleState::Failed);
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_states() {
        let available: Vec<_> = [
            LifecycleState::New,
            LifecycleState::Initializing,
            LifecycleState::Initialized,
            LifecycleState::StartingPrep,
            LifecycleState::Starting,
            LifecycleState::Started,
            LifecycleState::StoppingPrep,
            LifecycleState::Stopping,
            LifecycleState::Stopped,
            LifecycleState::Destroying,
            LifecycleState::Destroyed,
            LifecycleState::Failed,
        ]
        .into_iter()
        .filter(|s| s.is_available())
        .collect();
        assert_eq!(
            available,
            vec![
                LifecycleState::StartingPrep,
                LifecycleState::Starting,
                LifecycleState::Started
            ]
        );
    }

    #[test]
    fn test_cell_flow() {
        let cell = LifecycleCell::new();
        cell.start_with("valve", || Ok(())).unwrap();
        assert_eq!(cell.get(), LifecycleState::Started);
        // starting twice is harmless
        cell.start_with("valve", || panic!("must not rerun")).unwrap();
        // destroying a started component is illegal
        assert!(matches!(
            cell.destroy_with("valve", || Ok(())),
            Err(LifecycleError::InvalidTransition {
                state: LifecycleState::Started,
                ..
            })
        ));
        cell.stop_with("valve", || Ok(())).unwrap();
        cell.destroy_with("valve", || Ok(())).unwrap();
        assert_eq!(cell.get(), LifecycleState::Destroyed);
        assert!(cell.start_with("valve", || Ok(())).is_err());
    }

    #[test]
    fn test_cell_failure() {
        let cell = LifecycleCell::new();
        let err = cell
            .start_with("realm", || Err(anyhow::anyhow!("no database")))
            .unwrap_err();
        assert_eq!(err.to_string(), "no database");
        assert_eq!(cell.get(), LifecycleState::Failed);
        // a failed component can still be stopped and destroyed
        cell.stop_with("realm", || Ok(())).unwrap();
        cell.destroy_with("realm", || Ok(())).unwrap();
    }
}
