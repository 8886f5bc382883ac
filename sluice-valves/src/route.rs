//! Basic valves handing a request to a child container.
//!
//! An engine routes to hosts by the `Host` header. Hosts route to contexts and
//! contexts to wrappers by the longest path prefix matching a child name; the
//! part of the path left over is passed down as [`RemainingPath`]. Each hop
//! records the selected container as [`MappedContainer`].
use http::{header, StatusCode};
use parking_lot::RwLock;
use sluice_core::{
    pipeline::{Contained, Next, Request, Response, Valve},
    AnyResult, Container,
};
use tracing::{debug, warn};

use crate::util::{respond, status_text};

/// The deepest container a request has been routed to so far.
#[derive(Debug, Clone)]
pub struct MappedContainer(pub Container);

/// The request path below the containers it has been routed through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemainingPath(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteStrategy {
    /// Child named after the request host, else `default_host`.
    Host { default_host: Option<String> },
    /// Child whose name is the longest prefix of the path, else the child
    /// named `""` or `/`, else `fallback`.
    PathPrefix { fallback: Option<String> },
}

pub struct ChildRouterValve {
    contained: Contained,
    strategy: RouteStrategy,
    table: RwLock<Option<PathTable>>,
}

impl ChildRouterValve {
    pub fn new(strategy: RouteStrategy) -> Self {
        Self {
            contained: Contained::new(),
            strategy,
            table: RwLock::new(None),
        }
    }

    pub fn by_host(default_host: Option<String>) -> Self {
        Self::new(RouteStrategy::Host { default_host })
    }

    pub fn by_path(fallback: Option<String>) -> Self {
        Self::new(RouteStrategy::PathPrefix { fallback })
    }

    pub fn strategy(&self) -> &RouteStrategy {
        &self.strategy
    }

    fn select_host(&self, container: &Container, req: &Request) -> Option<Container> {
        let RouteStrategy::Host { default_host } = &self.strategy else {
            return None;
        };
        let host = request_host(req);
        if let Some(child) = host.as_deref().and_then(|h| container.find_child(h)) {
            return Some(child);
        }
        debug!("no host matches {host:?}, using default {default_host:?}");
        default_host.as_deref().and_then(|h| container.find_child(h))
    }

    fn select_path(&self, container: &Container, path: &str) -> Option<(Container, String)> {
        let RouteStrategy::PathPrefix { fallback } = &self.strategy else {
            return None;
        };
        let names: Vec<String> = container.find_children().iter().map(Container::name).collect();
        let cached = {
            let table = self.table.read();
            table
                .as_ref()
                .filter(|t| t.children == names)
                .map(|t| t.select(path))
        };
        let selected = match cached {
            Some(selected) => selected,
            None => {
                let table = PathTable::build(names);
                let selected = table.select(path);
                *self.table.write() = Some(table);
                selected
            }
        };
        let (name, remaining) = match selected {
            Some(selected) => selected,
            None => (fallback.clone()?, path.to_string()),
        };
        container.find_child(&name).map(|child| (child, remaining))
    }
}

impl Valve for ChildRouterValve {
    fn name(&self) -> &str {
        "ChildRouterValve"
    }

    fn contained(&self) -> &Contained {
        &self.contained
    }

    fn invoke(&self, req: &mut Request, resp: &mut Response, _next: Next<'_>) -> AnyResult<()> {
        let Some(container) = self.contained.container() else {
            anyhow::bail!("router is not attached to a container");
        };
        let selected = match &self.strategy {
            RouteStrategy::Host { .. } => self.select_host(&container, req).map(|c| (c, None)),
            RouteStrategy::PathPrefix { .. } => {
                let path = match req.extensions().get::<RemainingPath>() {
                    Some(remaining) => remaining.0.clone(),
                    None => req.uri().path().to_string(),
                };
                self.select_path(&container, &path)
                    .map(|(c, remaining)| (c, Some(remaining)))
            }
        };
        let Some((child, remaining)) = selected else {
            debug!("{container}: no child for {}", req.uri());
            respond(resp, StatusCode::NOT_FOUND, status_text(StatusCode::NOT_FOUND));
            return Ok(());
        };
        if !child.is_available() {
            debug!("{child} is {}", child.state());
            let status = StatusCode::SERVICE_UNAVAILABLE;
            respond(resp, status, status_text(status));
            return Ok(());
        }
        req.extensions_mut().insert(MappedContainer(child.clone()));
        if let Some(remaining) = remaining {
            req.extensions_mut().insert(RemainingPath(remaining));
        }
        child.pipeline().invoke(req, resp)
    }
}

impl std::fmt::Debug for ChildRouterValve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildRouterValve")
            .field("contained", &self.contained)
            .field("strategy", &self.strategy)
            .finish()
    }
}

/// Path routes for one set of child names.
struct PathTable {
    children: Vec<String>,
    router: matchit::Router<String>,
    // child named "" or "/"
    root: Option<String>,
}

impl PathTable {
    fn build(children: Vec<String>) -> Self {
        let mut router = matchit::Router::new();
        let mut root = None;
        for name in &children {
            let prefix = name.trim_matches('/');
            if prefix.is_empty() {
                root = Some(name.clone());
                continue;
            }
            let prefix = format!("/{}", prefix.replace('{', "{{").replace('}', "}}"));
            for route in [prefix.clone(), format!("{prefix}/{{*rest}}")] {
                if let Err(e) = router.insert(route, name.clone()) {
                    warn!("child {name:?} is not routable: {e}");
                }
            }
        }
        Self {
            children,
            router,
            root,
        }
    }

    /// `(child name, remaining path)` for `path`.
    fn select(&self, path: &str) -> Option<(String, String)> {
        let trimmed = path.trim_end_matches('/');
        if !trimmed.is_empty() {
            if let Ok(matched) = self.router.at(trimmed) {
                let remaining = match matched.params.get("rest") {
                    Some(rest) => format!("/{rest}"),
                    None => "/".to_string(),
                };
                return Some((matched.value.clone(), remaining));
            }
        }
        let remaining = if path.is_empty() { "/" } else { path };
        self.root
            .as_ref()
            .map(|root| (root.clone(), remaining.to_string()))
    }
}

/// Lowercased host of the request, without port.
fn request_host(req: &Request) -> Option<String> {
    let host = match req.headers().get(header::HOST) {
        Some(value) => value.to_str().ok()?,
        None => req.uri().host()?,
    };
    let host = if let Some(bracketed) = host.strip_prefix('[') {
        // [v6]:port
        bracketed.split(']').next()?
    } else {
        host.split(':').next()?
    };
    Some(host.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;

    use super::*;
    use crate::ResponderValve;

    fn wrapper(name: &str, body: &'static str) -> Container {
        let wrapper = Container::wrapper(name);
        wrapper
            .pipeline()
            .set_basic(Arc::new(ResponderValve::new(StatusCode::OK, body)))
            .unwrap();
        wrapper
    }

    fn context(name: &str, wrappers: &[(&str, &'static str)]) -> Container {
        let ctx = Container::context(name);
        ctx.pipeline()
            .set_basic(Arc::new(ChildRouterValve::by_path(Some("default".to_string()))))
            .unwrap();
        for (name, body) in wrappers {
            ctx.add_child(wrapper(name, body)).unwrap();
        }
        ctx
    }

    fn tree() -> Container {
        let engine = Container::engine("engine");
        engine
            .pipeline()
            .set_basic(Arc::new(ChildRouterValve::by_host(Some("localhost".to_string()))))
            .unwrap();
        let host = Container::host("localhost");
        host.pipeline()
            .set_basic(Arc::new(ChildRouterValve::by_path(None)))
            .unwrap();
        host.add_child(context("", &[("default", "root")])).unwrap();
        host.add_child(context("/app", &[("default", "app"), ("hello", "hello")]))
            .unwrap();
        engine.add_child(host).unwrap();
        let other = Container::host("example.com");
        other
            .pipeline()
            .set_basic(Arc::new(ChildRouterValve::by_path(None)))
            .unwrap();
        other.add_child(context("/shop", &[("default", "shop")])).unwrap();
        engine.add_child(other).unwrap();
        engine
    }

    fn get(engine: &Container, host: &str, path: &str) -> (Request, Response) {
        let mut req = http::Request::builder()
            .uri(path)
            .header(header::HOST, host)
            .body(Bytes::new())
            .unwrap();
        let mut resp = Response::new(Bytes::new());
        engine.pipeline().invoke(&mut req, &mut resp).unwrap();
        (req, resp)
    }

    fn body(resp: &Response) -> &str {
        std::str::from_utf8(resp.body()).unwrap()
    }

    #[test]
    fn test_routes_through_tree() {
        let engine = tree();
        engine.start().unwrap();

        let (req, resp) = get(&engine, "localhost:8080", "/app/hello");
        assert_eq!(body(&resp), "hello");
        let mapped = &req.extensions().get::<MappedContainer>().unwrap().0;
        assert_eq!(mapped.name(), "hello");
        assert_eq!(mapped.log_name(), "[engine].[localhost].[/app].[hello]");
        assert_eq!(
            req.extensions().get::<RemainingPath>(),
            Some(&RemainingPath("/".to_string()))
        );

        assert_eq!(body(&get(&engine, "LOCALHOST", "/app/missing/page").1), "app");
        assert_eq!(body(&get(&engine, "localhost", "/app/").1), "app");
        assert_eq!(body(&get(&engine, "localhost", "/apple").1), "root");
        assert_eq!(body(&get(&engine, "localhost", "/").1), "root");
        assert_eq!(body(&get(&engine, "example.com", "/shop/cart").1), "shop");
        // unknown host falls back to the default host
        assert_eq!(body(&get(&engine, "unknown.org", "/app").1), "app");

        // no root context on example.com
        let (_, resp) = get(&engine, "example.com", "/");
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        engine.stop().unwrap();
        engine.destroy().unwrap();
    }

    #[test]
    fn test_unavailable_child() {
        let engine = tree();
        engine.start().unwrap();
        let host = engine.find_child("localhost").unwrap();
        let app = host.find_child("/app").unwrap();
        app.stop().unwrap();
        let (_, resp) = get(&engine, "localhost", "/app/hello");
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        engine.stop().unwrap();
    }

    #[test]
    fn test_table_follows_children() {
        let engine = tree();
        engine.start().unwrap();
        let host = engine.find_child("localhost").unwrap();
        assert_eq!(body(&get(&engine, "localhost", "/docs/index").1), "root");

        host.add_child(context("/docs", &[("default", "docs")])).unwrap();
        assert_eq!(body(&get(&engine, "localhost", "/docs/index").1), "docs");

        let docs = host.find_child("/docs").unwrap();
        assert!(host.remove_child(&docs));
        assert_eq!(body(&get(&engine, "localhost", "/docs/index").1), "root");
        engine.stop().unwrap();
    }

    #[test]
    fn test_host_without_default() {
        let engine = Container::engine("e");
        engine
            .pipeline()
            .set_basic(Arc::new(ChildRouterValve::by_host(None)))
            .unwrap();
        engine.start().unwrap();
        let (_, resp) = get(&engine, "nowhere", "/");
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        engine.stop().unwrap();
    }

    #[test]
    fn test_detached_router_fails() {
        let router = ChildRouterValve::by_path(None);
        let mut req = Request::new(Bytes::new());
        let mut resp = Response::new(Bytes::new());
        assert!(router.invoke(&mut req, &mut resp, Next::end()).is_err());
    }

    #[test]
    fn test_request_host() {
        let req = |host: &str| {
            http::Request::builder()
                .header(header::HOST, host)
                .body(Bytes::new())
                .unwrap()
        };
        assert_eq!(request_host(&req("Example.COM:80")).as_deref(), Some("example.com"));
        assert_eq!(request_host(&req("[::1]:8080")).as_deref(), Some("::1"));
        let absolute = http::Request::builder()
            .uri("http://shop.local/cart")
            .body(Bytes::new())
            .unwrap();
        assert_eq!(request_host(&absolute).as_deref(), Some("shop.local"));
    }

    #[test]
    fn test_path_table() {
        let table = PathTable::build(vec!["".to_string(), "/a".to_string(), "b/".to_string()]);
        assert_eq!(table.select("/a"), Some(("/a".to_string(), "/".to_string())));
        assert_eq!(table.select("/a/x/y"), Some(("/a".to_string(), "/x/y".to_string())));
        assert_eq!(table.select("/b/z"), Some(("b/".to_string(), "/z".to_string())));
        assert_eq!(table.select("/ab"), Some(("".to_string(), "/ab".to_string())));
        assert_eq!(table.select(""), Some(("".to_string(), "/".to_string())));

        let table = PathTable::build(vec!["/a".to_string()]);
        assert_eq!(table.select("/c"), None);
    }
}
