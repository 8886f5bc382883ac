use bytes::Bytes;
use http::{header, HeaderValue, StatusCode};
use sluice_core::{
    pipeline::{Contained, Next, Request, Response, Valve},
    AnyResult,
};

use crate::util::respond;

/// Basic valve of a wrapper: answers every request with a fixed response.
#[derive(Debug)]
pub struct ResponderValve {
    contained: Contained,
    status: StatusCode,
    body: Bytes,
    content_type: Option<HeaderValue>,
}

impl ResponderValve {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            contained: Contained::new(),
            status,
            body: body.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: HeaderValue) -> Self {
        self.content_type = Some(content_type);
        self
    }
}

impl Valve for ResponderValve {
    fn name(&self) -> &str {
        "ResponderValve"
    }

    fn contained(&self) -> &Contained {
        &self.contained
    }

    fn invoke(&self, _req: &mut Request, resp: &mut Response, _next: Next<'_>) -> AnyResult<()> {
        if let Some(content_type) = &self.content_type {
            resp.headers_mut()
                .insert(header::CONTENT_TYPE, content_type.clone());
        }
        respond(resp, self.status, self.body.clone());
        Ok(())
    }
}
