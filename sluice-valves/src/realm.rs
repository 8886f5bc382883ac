use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sluice_core::{
    container::Realm, Lifecycle, LifecycleCell, LifecycleError, LifecycleState, WeakContainer,
};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUser {
    pub name: String,
    pub password: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// A realm backed by a fixed user table.
pub struct MemoryRealm {
    name: String,
    users: HashMap<String, MemoryUser>,
    container: RwLock<Option<WeakContainer>>,
    state: LifecycleCell,
}

impl MemoryRealm {
    pub fn new(name: impl Into<String>, users: impl IntoIterator<Item = MemoryUser>) -> Self {
        Self {
            name: name.into(),
            users: users.into_iter().map(|u| (u.name.clone(), u)).collect(),
            container: RwLock::new(None),
            state: LifecycleCell::new(),
        }
    }

    pub fn roles(&self, user: &str) -> &[String] {
        self.users.get(user).map_or(&[], |u| u.roles.as_slice())
    }

    /// Whether the realm is installed on a container that still exists.
    pub fn is_bound(&self) -> bool {
        self.container
            .read()
            .as_ref()
            .and_then(WeakContainer::upgrade)
            .is_some()
    }
}

impl Realm for MemoryRealm {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_container(&self, container: WeakContainer) {
        *self.container.write() = Some(container);
    }

    fn authenticate(&self, user: &str, credentials: &str) -> Option<String> {
        match self.users.get(user) {
            Some(u) if u.password == credentials => Some(u.name.clone()),
            _ => {
                debug!("realm {}: rejected credentials for {user:?}", self.name);
                None
            }
        }
    }

    fn lifecycle(&self) -> Option<&dyn Lifecycle> {
        Some(self)
    }
}

impl Lifecycle for MemoryRealm {
    fn start(&self) -> Result<(), LifecycleError> {
        self.state.start_with(&self.name, || {
            debug!("realm {} started with {} users", self.name, self.users.len());
            Ok(())
        })
    }

    fn stop(&self) -> Result<(), LifecycleError> {
        self.state.stop_with(&self.name, || Ok(()))
    }

    fn destroy(&self) -> Result<(), LifecycleError> {
        self.state.destroy_with(&self.name, || Ok(()))
    }

    fn state(&self) -> LifecycleState {
        self.state.get()
    }
}

impl std::fmt::Debug for MemoryRealm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRealm")
            .field("name", &self.name)
            .field("users", &self.users.len())
            .field("state", &self.state.get())
            .finish()
    }
}
