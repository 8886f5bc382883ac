use std::time::Instant;

use bytes::Bytes;
use http::StatusCode;
use sluice_core::{
    pipeline::{Request, Response},
    Container,
};
use tracing::{debug, error};

use crate::{
    route::MappedContainer,
    util::{respond, status_text},
};

/// Runs `request` through the pipeline of `engine` and logs access.
///
/// Access is logged by the deepest container the request was routed to, or
/// the nearest ancestor of it with an access log. Errors escaping the pipeline
/// become a `500`.
pub fn dispatch(engine: &Container, mut request: Request) -> Response {
    let begin = Instant::now();
    let mut response = Response::new(Bytes::new());
    if !engine.is_available() {
        let status = StatusCode::SERVICE_UNAVAILABLE;
        respond(&mut response, status, status_text(status));
        return response;
    }
    if let Err(e) = engine.pipeline().invoke(&mut request, &mut response) {
        error!("{} {} failed: {e:#}", request.method(), request.uri());
        let status = StatusCode::INTERNAL_SERVER_ERROR;
        respond(&mut response, status, status_text(status));
    }
    let elapsed = begin.elapsed();
    let mapped = match request.extensions().get::<MappedContainer>() {
        Some(mapped) => mapped.0.clone(),
        None => engine.clone(),
    };
    if !mapped.log_access(&request, &response, elapsed) {
        debug!("{mapped}: no access log for {}", request.uri());
    }
    response
}
