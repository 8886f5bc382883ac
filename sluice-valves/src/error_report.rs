use std::panic::{self, AssertUnwindSafe};

use bytes::Bytes;
use http::StatusCode;
use sluice_core::{
    pipeline::{Contained, Next, Request, Response, Valve},
    util::panic_message,
    AnyResult,
};
use tracing::error;

use crate::util::{respond, status_text};

/// Reports failures of the stages after it as a response.
///
/// An error or a panic further down becomes a `500`. An error status left
/// with an empty body gets its status line as body.
///
/// The inner stages must tolerate being unwound; state they leave behind
/// after a panic is not repaired.
#[derive(Debug, Default)]
pub struct ErrorReportValve {
    contained: Contained,
}

impl ErrorReportValve {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Valve for ErrorReportValve {
    fn name(&self) -> &str {
        "ErrorReportValve"
    }

    fn contained(&self) -> &Contained {
        &self.contained
    }

    fn invoke(&self, req: &mut Request, resp: &mut Response, next: Next<'_>) -> AnyResult<()> {
        let failure = match panic::catch_unwind(AssertUnwindSafe(|| next.invoke(req, resp))) {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{e:#}")),
            Err(payload) => Some(format!("panic: {}", panic_message(payload.as_ref()))),
        };
        if let Some(failure) = failure {
            error!("{} {} failed: {failure}", req.method(), req.uri());
            let status = StatusCode::INTERNAL_SERVER_ERROR;
            respond(resp, status, format!("{}\n{failure}\n", status_text(status)));
            return Ok(());
        }
        let status = resp.status();
        if (status.is_client_error() || status.is_server_error()) && resp.body().is_empty() {
            respond(resp, status, Bytes::from(status_text(status)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sluice_core::Container;

    use super::*;

    enum Outcome {
        Fail,
        Panic,
        Status(StatusCode),
    }

    struct Faulty {
        contained: Contained,
        outcome: Outcome,
    }

    impl Valve for Faulty {
        fn contained(&self) -> &Contained {
            &self.contained
        }

        fn invoke(&self, _req: &mut Request, resp: &mut Response, _next: Next<'_>) -> AnyResult<()> {
            match self.outcome {
                Outcome::Fail => anyhow::bail!("backend unavailable"),
                Outcome::Panic => panic!("index out of range"),
                Outcome::Status(status) => {
                    *resp.status_mut() = status;
                    Ok(())
                }
            }
        }
    }

    fn run(outcome: Outcome) -> Response {
        let wrapper = Container::wrapper("w");
        wrapper
            .pipeline()
            .set_basic(Arc::new(Faulty {
                contained: Contained::new(),
                outcome,
            }))
            .unwrap();
        wrapper
            .pipeline()
            .add_valve(Arc::new(ErrorReportValve::new()))
            .unwrap();
        let mut req = Request::new(Bytes::new());
        let mut resp = Response::new(Bytes::new());
        wrapper.pipeline().invoke(&mut req, &mut resp).unwrap();
        resp
    }

    #[test]
    fn test_error_becomes_500() {
        let resp = run(Outcome::Fail);
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = String::from_utf8_lossy(resp.body());
        assert!(body.contains("backend unavailable"), "{body}");
    }

    #[test]
    fn test_panic_becomes_500() {
        let resp = run(Outcome::Panic);
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = String::from_utf8_lossy(resp.body());
        assert!(body.contains("index out of range"), "{body}");
    }

    #[test]
    fn test_empty_error_status_gets_body() {
        let resp = run(Outcome::Status(StatusCode::FORBIDDEN));
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(resp.body(), &Bytes::from_static(b"403 Forbidden"));

        let resp = run(Outcome::Status(StatusCode::ACCEPTED));
        assert!(resp.body().is_empty());
    }
}
