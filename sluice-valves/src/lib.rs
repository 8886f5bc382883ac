//! Valves, routers and realms for a sluice container tree.
//!
//! Request-time valves:
//! - [`RequestLogValve`], [`AccessLogValve`]: logging, the latter through the
//!   container's access-log capability.
//! - [`AuthValve`]: HTTP basic authentication against the inherited realm.
//! - [`ErrorReportValve`]: turns errors and panics further down into a 500.
//!
//! Basic valves, which end a pipeline:
//! - [`ChildRouterValve`]: hands the request to a child container, by `Host`
//!   header or by path prefix.
//! - [`ResponderValve`]: writes a fixed response from a wrapper.
//!
//! [`dispatch`] runs a request through a started engine and logs access.
mod access_log;
mod auth;
pub mod config;
mod error_report;
mod loader;
mod realm;
mod request_log;
mod responder;
mod route;
mod serve;
mod util;

pub use access_log::AccessLogValve;
pub use auth::{AuthValve, Principal};
pub use error_report::ErrorReportValve;
pub use loader::{current_context, ContextLoader};
pub use realm::{MemoryRealm, MemoryUser};
pub use request_log::RequestLogValve;
pub use responder::ResponderValve;
pub use route::{ChildRouterValve, MappedContainer, RemainingPath, RouteStrategy};
pub use serve::dispatch;
pub use util::respond;
