//! Declarative description of a container tree.
//!
//! The tree is generic over the valve configuration `V` and the realm
//! configuration `R`, so that crates providing valves and realms can plug in
//! their own (usually `type`-tagged) enums.
use std::{path::Path, time::Duration};

use anyhow::bail;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    container::{Container, ContainerKind},
    util::file_read_sync,
};

// MAX configuration file size: 16 MB
const MAX_CONFIG_FILE_SIZE: usize = 16 * 1024 * 1024;

pub const DEFAULT_BACKGROUND_PROCESSOR_DELAY: i64 = -1;
pub const DEFAULT_START_STOP_THREADS: i32 = 1;
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 10;

macro_rules! define_const {
    ($name: ident, $val: expr, $type: ty) => {
        const fn $name() -> $type {
            $val
        }
    };
}

define_const!(
    default_background_processor_delay,
    DEFAULT_BACKGROUND_PROCESSOR_DELAY,
    i64
);
define_const!(default_start_stop_threads, DEFAULT_START_STOP_THREADS, i32);
define_const!(default_start_children, true, bool);
define_const!(default_keep_alive_secs, DEFAULT_KEEP_ALIVE_SECS, u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config<V, R> {
    pub engine: ContainerConfig<V, R>,
}

/// One container and, recursively, its children.
///
/// The kind of each node follows from its depth: the root is the engine, then
/// hosts, contexts and wrappers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig<V, R> {
    #[serde(default)]
    pub name: String,
    /// Seconds between background sweeps; zero or less leaves the node to its
    /// nearest ancestor's timer.
    #[serde(default = "default_background_processor_delay")]
    pub background_processor_delay: i64,
    /// Start/stop pool size; zero or less is relative to the processor count.
    #[serde(default = "default_start_stop_threads")]
    pub start_stop_threads: i32,
    #[serde(default = "default_start_children")]
    pub start_children: bool,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "Vec::new")]
    pub valves: Vec<V>,
    pub basic: Option<V>,
    pub realm: Option<R>,
    #[serde(default = "Vec::new")]
    pub children: Vec<ContainerConfig<V, R>>,
}

impl<V, R> ContainerConfig<V, R> {
    /// A bare container of `kind` with this node's scalar settings applied.
    ///
    /// Valves, realm and children are left to the caller.
    pub fn container(&self, kind: ContainerKind) -> Container {
        let container = Container::new(kind, self.name.clone());
        container.set_background_processor_delay(self.background_processor_delay);
        container.set_start_stop_threads(self.start_stop_threads);
        container.set_start_children(self.start_children);
        container.set_keep_alive(Duration::from_secs(self.keep_alive_secs));
        container
    }

    /// Number of containers in this subtree, this one included.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(ContainerConfig::count).sum::<usize>()
    }
}

impl<V, R> Config<V, R>
where
    V: DeserializeOwned,
    R: DeserializeOwned,
{
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = match file_read_sync(path) {
            Ok(content) => content,
            Err(e) => bail!("Config: error reading {}: {e:?}", path.display()),
        };
        if content.len() > MAX_CONFIG_FILE_SIZE {
            bail!("Config: max file size: {}", MAX_CONFIG_FILE_SIZE);
        }
        Self::from_slice(&content)
    }

    pub fn from_slice(content: &[u8]) -> anyhow::Result<Self> {
        // read first non-space u8
        let is_json = match content
            .iter()
            .find(|&&b| b != b' ' && b != b'\r' && b != b'\n' && b != b'\t')
        {
            Some(first) => *first == b'{',
            None => false,
        };
        match is_json {
            true => serde_json::from_slice::<Self>(content).map_err(Into::into),
            false => toml::from_str::<Self>(&String::from_utf8_lossy(content)).map_err(Into::into),
        }
    }
}
