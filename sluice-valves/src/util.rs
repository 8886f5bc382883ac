use bytes::Bytes;
use http::{header, HeaderValue, StatusCode};
use sluice_core::pipeline::Response;

/// Overwrites `resp` with `status` and `body`, keeping unrelated headers.
pub fn respond(resp: &mut Response, status: StatusCode, body: impl Into<Bytes>) {
    let body = body.into();
    *resp.status_mut() = status;
    let headers = resp.headers_mut();
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
    if !body.is_empty() && !headers.contains_key(header::CONTENT_TYPE) {
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
    }
    *resp.body_mut() = body;
}

/// Plain-text body for an error status: `404 Not Found`.
pub(crate) fn status_text(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {reason}", status.as_u16()),
        None => status.as_u16().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_respond_sets_length() {
        let mut resp = Response::new(Bytes::new());
        respond(&mut resp, StatusCode::NOT_FOUND, "missing");
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(resp.headers()[header::CONTENT_LENGTH], "7");
        assert_eq!(resp.body(), &Bytes::from_static(b"missing"));

        respond(&mut resp, StatusCode::NO_CONTENT, Bytes::new());
        assert_eq!(resp.headers()[header::CONTENT_LENGTH], "0");
        assert!(resp.body().is_empty());
    }

    #[test]
    fn test_status_text() {
        assert_eq!(status_text(StatusCode::UNAUTHORIZED), "401 Unauthorized");
    }
}
