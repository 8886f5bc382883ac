//! Serde descriptions of the valves and realms in this crate.
//!
//! Both enums are internally tagged by `type`, so a node of a
//! [`ContainerConfig`](sluice_core::config::ContainerConfig) reads
//!
//! ```toml
//! [[engine.valves]]
//! type = "access_log"
//! prefix = "engine"
//! ```
use std::sync::Arc;

use http::{HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use sluice_core::{container::Realm, pipeline::Valve, ContainerKind};

use crate::{
    AccessLogValve, AuthValve, ChildRouterValve, ErrorReportValve, MemoryRealm, MemoryUser,
    RequestLogValve, ResponderValve,
};

pub type Config = sluice_core::config::Config<ValveConfig, RealmConfig>;
pub type ContainerConfig = sluice_core::config::ContainerConfig<ValveConfig, RealmConfig>;

const fn default_status() -> u16 {
    200
}

fn default_auth_realm() -> String {
    "sluice".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValveConfig {
    AccessLog {
        #[serde(default)]
        prefix: String,
    },
    RequestLog {
        #[serde(default)]
        prefix: String,
    },
    Auth {
        #[serde(default = "default_auth_realm")]
        realm_name: String,
    },
    ErrorReport,
    HostRouter {
        default_host: Option<String>,
    },
    PathRouter {
        fallback: Option<String>,
    },
    Responder {
        #[serde(default = "default_status")]
        status: u16,
        #[serde(default)]
        body: String,
        content_type: Option<String>,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    #[error("invalid status code {0}")]
    InvalidStatus(u16),
    #[error("invalid content type {0:?}")]
    InvalidContentType(String),
}

impl ValveConfig {
    /// The basic valve a container of `kind` gets when none is configured.
    pub fn default_basic(kind: ContainerKind) -> Self {
        match kind {
            ContainerKind::Engine => ValveConfig::HostRouter { default_host: None },
            ContainerKind::Host => ValveConfig::PathRouter { fallback: None },
            ContainerKind::Context => ValveConfig::PathRouter {
                fallback: Some("default".to_string()),
            },
            ContainerKind::Wrapper => ValveConfig::Responder {
                status: default_status(),
                body: String::new(),
                content_type: None,
            },
        }
    }

    pub fn build(&self) -> Result<Arc<dyn Valve>, BuildError> {
        let valve: Arc<dyn Valve> = match self {
            ValveConfig::AccessLog { prefix } => Arc::new(AccessLogValve::new(prefix.clone())),
            ValveConfig::RequestLog { prefix } => Arc::new(RequestLogValve::new(prefix.clone())),
            ValveConfig::Auth { realm_name } => Arc::new(AuthValve::new(realm_name)),
            ValveConfig::ErrorReport => Arc::new(ErrorReportValve::new()),
            ValveConfig::HostRouter { default_host } => {
                Arc::new(ChildRouterValve::by_host(default_host.clone()))
            }
            ValveConfig::PathRouter { fallback } => {
                Arc::new(ChildRouterValve::by_path(fallback.clone()))
            }
            ValveConfig::Responder {
                status,
                body,
                content_type,
            } => {
                let status =
                    StatusCode::from_u16(*status).map_err(|_| BuildError::InvalidStatus(*status))?;
                let mut responder = ResponderValve::new(status, body.clone());
                if let Some(content_type) = content_type {
                    let value = HeaderValue::from_str(content_type)
                        .map_err(|_| BuildError::InvalidContentType(content_type.clone()))?;
                    responder = responder.with_content_type(value);
                }
                Arc::new(responder)
            }
        };
        Ok(valve)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealmConfig {
    Memory {
        #[serde(default = "default_auth_realm")]
        name: String,
        #[serde(default)]
        users: Vec<MemoryUser>,
    },
}

impl RealmConfig {
    pub fn build(&self) -> Arc<dyn Realm> {
        match self {
            RealmConfig::Memory { name, users } => {
                Arc::new(MemoryRealm::new(name.clone(), users.iter().cloned()))
            }
        }
    }
}
