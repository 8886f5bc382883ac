//! Builds a container tree from its configuration.
use std::sync::Arc;

use anyhow::{bail, Context as _};
use sluice_core::{Container, ContainerKind};
use sluice_valves::{
    config::{ContainerConfig, ValveConfig},
    ContextLoader,
};

/// Builds the engine described by `config` and, recursively, its children.
pub fn build(config: &ContainerConfig) -> anyhow::Result<Container> {
    build_node(config, ContainerKind::Engine)
}

fn build_node(config: &ContainerConfig, kind: ContainerKind) -> anyhow::Result<Container> {
    let container = config.container(kind);
    let basic = match &config.basic {
        Some(basic) => basic.build(),
        None => ValveConfig::default_basic(kind).build(),
    }
    .with_context(|| format!("building the basic valve of {container}"))?;
    container.pipeline().set_basic(basic)?;
    for valve in &config.valves {
        let valve = valve
            .build()
            .with_context(|| format!("building a valve of {container}"))?;
        container.pipeline().add_valve(valve)?;
    }
    if let Some(realm) = &config.realm {
        container.set_realm(Some(realm.build()))?;
    }
    if kind == ContainerKind::Context {
        container.set_loader(Some(Arc::new(ContextLoader::new(config.name.clone()))));
    }

    match kind.child_kind() {
        Some(child_kind) => {
            for child in &config.children {
                container.add_child(build_node(child, child_kind)?)?;
            }
        }
        None if !config.children.is_empty() => {
            bail!("{container}: a {kind} cannot have children")
        }
        None => {}
    }
    Ok(container)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::{header, StatusCode};
    use sluice_core::LifecycleState;
    use sluice_valves::{config::Config, current_context, dispatch};

    use super::*;

    const TEST_CONFIG: &str = r#"
        [engine]
        name = "engine"

        [[engine.valves]]
        type = "access_log"
        prefix = "engine"

        [[engine.children]]
        name = "localhost"

        [[engine.children.children]]
        name = "/app"

        [[engine.children.children.children]]
        name = "default"
        basic = { type = "responder", status = 200, body = "hello" }

        [[engine.children.children.children]]
        name = "teapot"
        basic = { type = "responder", status = 418 }
    "#;

    fn get(engine: &Container, path: &str) -> sluice_core::pipeline::Response {
        let req = http::Request::builder()
            .uri(path)
            .header(header::HOST, "localhost")
            .body(Bytes::new())
            .unwrap();
        dispatch(engine, req)
    }

    #[test]
    fn test_build_and_serve() {
        let config = Config::from_slice(TEST_CONFIG.as_bytes()).unwrap();
        let engine = build(&config.engine).unwrap();
        let host = engine.find_child("localhost").unwrap();
        assert_eq!(host.kind(), ContainerKind::Host);
        let app = host.find_child("/app").unwrap();
        assert_eq!(app.kind(), ContainerKind::Context);
        assert!(app.loader().is_some());
        assert_eq!(app.find_children().len(), 2);

        engine.start().unwrap();
        let resp = get(&engine, "/app/index.html");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.body(), &Bytes::from_static(b"hello"));
        assert_eq!(get(&engine, "/app/teapot").status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(get(&engine, "/other").status(), StatusCode::NOT_FOUND);

        // contexts get a loader named after them
        let loader = app.loader().unwrap();
        let binding = sluice_core::container::ContextBinding::bind(Some(loader.as_ref()));
        assert_eq!(current_context().as_deref(), Some("/app"));
        drop(binding);

        engine.stop().unwrap();
        engine.destroy().unwrap();
        assert_eq!(engine.state(), LifecycleState::Destroyed);
    }

    #[test]
    fn test_sample_config() {
        let config =
            Config::load(concat!(env!("CARGO_MANIFEST_DIR"), "/config.example.toml")).unwrap();
        let engine = build(&config.engine).unwrap();
        engine.start().unwrap();
        assert_eq!(get(&engine, "/").body(), &Bytes::from_static(b"welcome\n"));
        assert_eq!(get(&engine, "/admin/").status(), StatusCode::UNAUTHORIZED);
        engine.stop().unwrap();
        engine.destroy().unwrap();
    }

    #[test]
    fn test_wrapper_children_rejected() {
        let config = Config::from_slice(
            br#"
            [engine]
            [[engine.children]]
            [[engine.children.children]]
            [[engine.children.children.children]]
            name = "w"
            [[engine.children.children.children.children]]
            name = "too-deep"
            "#,
        )
        .unwrap();
        assert!(build(&config.engine).is_err());
    }

    #[test]
    fn test_invalid_valve_rejected() {
        let config = Config::from_slice(
            br#"
            [engine]
            basic = { type = "responder", status = 42 }
            "#,
        )
        .unwrap();
        let err = build(&config.engine).unwrap_err();
        assert!(format!("{err:#}").contains("invalid status code 42"), "{err:#}");
    }
}
