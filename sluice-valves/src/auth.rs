use base64::{engine::general_purpose::STANDARD, Engine as _};
use http::{header, HeaderValue, StatusCode};
use sluice_core::{
    pipeline::{Contained, Next, Request, Response, Valve},
    AnyResult,
};
use tracing::{debug, warn};

use crate::util::{respond, status_text};

/// The authenticated user, stored in the request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal(pub String);

/// HTTP basic authentication against the container's realm.
///
/// Requests without valid credentials are answered with `401` and never reach
/// the rest of the pipeline. The realm is looked up on each request, so it
/// follows whatever the container (or an ancestor) currently has installed.
#[derive(Debug)]
pub struct AuthValve {
    contained: Contained,
    challenge: HeaderValue,
}

impl AuthValve {
    pub fn new(realm_name: &str) -> Self {
        let challenge = HeaderValue::from_str(&format!("Basic realm=\"{realm_name}\""))
            .unwrap_or_else(|_| HeaderValue::from_static("Basic"));
        Self {
            contained: Contained::new(),
            challenge,
        }
    }

    fn principal(&self, req: &Request) -> Option<String> {
        let realm = self.contained.container().and_then(|c| c.realm());
        let Some(realm) = realm else {
            warn!("authentication requested but no realm is installed");
            return None;
        };
        let (user, password) = basic_credentials(req)?;
        realm.authenticate(&user, &password)
    }
}

impl Valve for AuthValve {
    fn name(&self) -> &str {
        "AuthValve"
    }

    fn contained(&self) -> &Contained {
        &self.contained
    }

    fn invoke(&self, req: &mut Request, resp: &mut Response, next: Next<'_>) -> AnyResult<()> {
        match self.principal(req) {
            Some(name) => {
                debug!("authenticated {name}");
                req.extensions_mut().insert(Principal(name));
                next.invoke(req, resp)
            }
            None => {
                respond(
                    resp,
                    StatusCode::UNAUTHORIZED,
                    status_text(StatusCode::UNAUTHORIZED),
                );
                resp.headers_mut()
                    .insert(header::WWW_AUTHENTICATE, self.challenge.clone());
                Ok(())
            }
        }
    }
}

/// `(user, password)` from an `Authorization: Basic ...` header.
fn basic_credentials(req: &Request) -> Option<(String, String)> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}
