use std::{fmt, sync::Arc};

use super::Container;
use crate::pipeline::Valve;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerEventKind {
    AddChild,
    RemoveChild,
    AddValve,
    RemoveValve,
    Start,
    Stop,
    Destroy,
    /// Fired once per background sweep of the container.
    Periodic,
    /// Name, parent, realm, cluster, loader or a tuning knob changed.
    PropertyChange,
}

pub enum EventData {
    None,
    Child(Container),
    Valve(Arc<dyn Valve>),
    /// Name of the changed property.
    Property(&'static str),
}

impl fmt::Debug for EventData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventData::None => f.write_str("None"),
            EventData::Child(child) => write!(f, "Child({child})"),
            EventData::Valve(valve) => write!(f, "Valve({})", valve.name()),
            EventData::Property(name) => write!(f, "Property({name})"),
        }
    }
}

/// A structural or lifecycle change of a container.
#[derive(Debug)]
pub struct ContainerEvent {
    container: Container,
    kind: ContainerEventKind,
    data: EventData,
}

impl ContainerEvent {
    pub(crate) fn new(container: Container, kind: ContainerEventKind, data: EventData) -> Self {
        Self {
            container,
            kind,
            data,
        }
    }

    /// The container that fired the event.
    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn kind(&self) -> ContainerEventKind {
        self.kind
    }

    pub fn data(&self) -> &EventData {
        &self.data
    }
}

/// Receives container events synchronously, on the thread that caused them.
///
/// Listeners must not call lifecycle operations on the container that is
/// notifying them.
pub trait ContainerListener: Send + Sync {
    fn container_event(&self, event: &ContainerEvent);
}

impl<F> ContainerListener for F
where
    F: Fn(&ContainerEvent) + Send + Sync,
{
    fn container_event(&self, event: &ContainerEvent) {
        self(event)
    }
}
