use std::{thread, time::Duration};

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use clap::Parser;
use http::header;
use sluice_core::pipeline::Request;
use sluice_valves::{config::Config, dispatch};
use tracing::{error, info};
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

mod tree;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path of the config file
    #[clap(short, long, value_parser)]
    config: String,

    /// Request to dispatch once the tree is started, e.g.
    /// `http://localhost/app/index.html`; may be repeated
    #[clap(short, long, value_parser)]
    request: Vec<String>,

    /// `user:password` sent as basic authorization with every request
    #[clap(long, value_parser)]
    auth: Option<String>,

    /// Seconds to keep the tree running before shutting it down
    #[clap(long, value_parser, default_value_t = 0)]
    hold_secs: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)?;
    let engine = tree::build(&config.engine)?;
    info!(
        "built {} containers from {}",
        config.engine.count(),
        args.config
    );

    if let Err(e) = engine.start() {
        error!("{engine} failed to start: {e}");
        engine.destroy()?;
        return Err(e.into());
    }
    info!("{engine} started");

    for target in &args.request {
        let request = build_request(target, args.auth.as_deref())?;
        let uri = request.uri().clone();
        let response = dispatch(&engine, request);
        info!(
            "{uri} -> {} {}",
            response.status(),
            String::from_utf8_lossy(response.body())
        );
    }

    if args.hold_secs > 0 {
        info!("holding for {}s", args.hold_secs);
        thread::sleep(Duration::from_secs(args.hold_secs));
    }

    if let Err(e) = engine.stop() {
        error!("{engine} did not stop cleanly: {e}");
    }
    engine.destroy()?;
    info!("{engine} destroyed");
    Ok(())
}

/// A `GET` for `target`; the `Host` header comes from its authority.
fn build_request(target: &str, auth: Option<&str>) -> Result<Request> {
    let uri: http::Uri = target.parse()?;
    let host = uri
        .authority()
        .map_or_else(|| "localhost".to_string(), |a| a.to_string());
    let path = uri.path_and_query().map_or("/", |p| p.as_str());
    let mut builder = http::Request::builder()
        .uri(path)
        .header(header::HOST, host);
    if let Some(credentials) = auth {
        builder = builder.header(
            header::AUTHORIZATION,
            format!("Basic {}", STANDARD.encode(credentials)),
        );
    }
    Ok(builder.body(Bytes::new())?)
}
