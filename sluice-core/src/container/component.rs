//! Collaborators a container delegates to: authentication, clustering and the
//! execution context used for background work.
use super::WeakContainer;
use crate::{lifecycle::Lifecycle, AnyResult};

/// Authentication source shared by a container and, unless they set their
/// own, all of its descendants.
pub trait Realm: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Called when the realm is installed on a container.
    fn set_container(&self, _container: WeakContainer) {}

    /// Returns the principal name when `credentials` are valid for `user`.
    fn authenticate(&self, user: &str, credentials: &str) -> Option<String>;

    fn background_process(&self) -> AnyResult<()> {
        Ok(())
    }

    fn lifecycle(&self) -> Option<&dyn Lifecycle> {
        None
    }
}

/// Session replication hook. Only the container binding and the periodic
/// callback are used here.
pub trait Cluster: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn set_container(&self, _container: WeakContainer) {}

    fn background_process(&self) -> AnyResult<()> {
        Ok(())
    }

    fn lifecycle(&self) -> Option<&dyn Lifecycle> {
        None
    }
}

/// Activates a container's execution context on the current thread.
pub trait Loader: Send + Sync {
    fn bind(&self);

    fn unbind(&self);
}

/// Keeps a loader bound until dropped.
#[must_use]
pub struct ContextBinding<'a> {
    loader: Option<&'a dyn Loader>,
}

impl<'a> ContextBinding<'a> {
    pub fn bind(loader: Option<&'a dyn Loader>) -> Self {
        if let Some(loader) = loader {
            loader.bind();
        }
        Self { loader }
    }
}

impl Drop for ContextBinding<'_> {
    fn drop(&mut self) {
        if let Some(loader) = self.loader {
            loader.unbind();
        }
    }
}
