//! Top-level error boundary.
//!
//! The boundary is the only place that turns failures into wire responses:
//!
//! - responses carrying an [`EscapedError`] are rendered from the error
//!   (taxonomy errors with their own status, message and extras; anything
//!   else as a generic 500);
//! - panics, caught further in by `CatchPanicLayer`, become a generic 500;
//! - error responses produced by the framework itself (unmatched routes,
//!   wrong methods, timeouts, body limits, extractor rejections) are
//!   re-rendered as failure envelopes.

use std::any::Any;

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http::{header, HeaderValue, Method, StatusCode};
use http_body::Body as _;
use serde_json::Map;

use crate::config::Mode;
use crate::envelope::{messages, Envelope};
use crate::error::{culprit_of, EscapedError, Error, ErrorKind};

/// Marker left by [`panic_response`] for the boundary.
#[derive(Debug, Clone)]
pub struct Panicked(pub String);

pub async fn error_boundary(State(mode): State<Mode>, req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    let mut resp = next.run(req).await;

    if let Some(EscapedError(err)) = resp.extensions_mut().remove::<EscapedError>() {
        return render_error(&err, mode, &method, &path);
    }

    if let Some(Panicked(msg)) = resp.extensions_mut().remove::<Panicked>() {
        tracing::error!(culprit = "panic", %method, %path, "handler panicked: {msg}");
        return Envelope::generic_failure().into_response();
    }

    let status = resp.status();
    if (status.is_client_error() || status.is_server_error()) && !is_json(&resp) {
        return normalize_framework_error(resp, &method, &path);
    }

    resp
}

fn render_error(err: &Error, mode: Mode, method: &Method, path: &str) -> Response {
    match err {
        Error::Api(e) => {
            if mode.is_development() {
                tracing::error!(
                    tag = %e.tag,
                    location = %e.location(),
                    kind = %e.kind,
                    status = e.status().as_u16(),
                    %method,
                    %path,
                    "(dev-only) {}",
                    e.message
                );
            }
            Envelope::failure(e.status(), &e.message, e.extras.clone()).into_response()
        }
        Error::Unexpected { error, location } => {
            tracing::error!(
                culprit = culprit_of(location),
                location = %location,
                %method,
                %path,
                "unexpected error: {error:#}"
            );
            Envelope::generic_failure().into_response()
        }
    }
}

/// Re-render a framework error as an envelope. Headers other than the body
/// framing ones (such as `Allow` on a 405) are carried over.
fn normalize_framework_error(original: Response, method: &Method, path: &str) -> Response {
    let status = original.status();
    tracing::debug!(status = status.as_u16(), %method, %path, "normalizing framework error response");

    let mut resp = match ErrorKind::from_status(status) {
        Some(kind) if status.is_client_error() => {
            let message = status.canonical_reason().unwrap_or(messages::ERR_GENERIC);
            Envelope::failure(kind.status(), message, Map::new()).into_response()
        }
        // Server-side details never reach the client.
        Some(kind) => Envelope::failure(kind.status(), messages::ERR_GENERIC, Map::new())
            .into_response(),
        None => Envelope::generic_failure().into_response(),
    };

    let headers = resp.headers_mut();
    for (name, value) in original.headers() {
        if name != header::CONTENT_TYPE && name != header::CONTENT_LENGTH {
            headers.append(name.clone(), value.clone());
        }
    }
    resp
}

fn is_json(resp: &Response) -> bool {
    resp.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("application/json"))
        .unwrap_or(false)
}

/// `CatchPanicLayer::custom` callback.
pub fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let msg = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic payload".to_string()
    };

    let mut resp = StatusCode::INTERNAL_SERVER_ERROR.into_response();
    resp.extensions_mut().insert(Panicked(msg));
    resp
}

/// Development-only: a 200 with an empty body is replaced by a reminder that
/// the handler never produced a response.
pub async fn dev_placeholder(req: Request, next: Next) -> Response {
    let is_head = req.method() == Method::HEAD;
    let resp = next.run(req).await;

    if is_head || resp.status() != StatusCode::OK || resp.body().size_hint().exact() != Some(0) {
        return resp;
    }

    let (mut parts, _) = resp.into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    Response::from_parts(parts, Body::from(messages::DEV_NO_BODY))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_are_captured() {
        let resp = panic_response(Box::new("boom"));
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(resp.extensions().get::<Panicked>().unwrap().0, "boom");

        let resp = panic_response(Box::new(String::from("owned")));
        assert_eq!(resp.extensions().get::<Panicked>().unwrap().0, "owned");

        let resp = panic_response(Box::new(7_u8));
        assert_eq!(
            resp.extensions().get::<Panicked>().unwrap().0,
            "unknown panic payload"
        );
    }

    fn normalize(status: StatusCode) -> Response {
        normalize_framework_error(status.into_response(), &Method::GET, "/x")
    }

    #[test]
    fn framework_errors_map_to_kinds() {
        assert_eq!(normalize(StatusCode::NOT_FOUND).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            normalize(StatusCode::REQUEST_TIMEOUT).status(),
            StatusCode::REQUEST_TIMEOUT
        );
        assert_eq!(
            normalize(StatusCode::from_u16(599).unwrap()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn framework_error_headers_survive_except_framing() {
        let original = (
            StatusCode::METHOD_NOT_ALLOWED,
            [
                (header::ALLOW, "GET,HEAD"),
                (header::CONTENT_TYPE, "text/plain"),
            ],
            "method not allowed",
        )
            .into_response();

        let resp = normalize_framework_error(original, &Method::DELETE, "/x");
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(resp.headers()[header::ALLOW], "GET,HEAD");
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(resp.headers().get_all(header::CONTENT_TYPE).iter().count(), 1);
    }
}
