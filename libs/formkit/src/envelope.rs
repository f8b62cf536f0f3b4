//! The uniform `{status, message, ...extras}` response body.

use std::fmt;
use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    response::{IntoResponse, Response},
    Json,
};
use http::{request::Parts, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

/// User-facing message strings.
pub mod messages {
    pub const ERR_GENERIC: &str = "Something went wrong! Please try again later.";
    pub const SUCC_GENERIC: &str = "Operation successful!";
    pub const ERR_INC_BODY: &str = "Incorrect body!";
    pub const ERR_INCM_BODY: &str = "Incomplete or overcomplete body!";
    pub const ERR_BODY_EMPTY: &str = "Empty body provided!";
    pub const ERR_BODY_NOT_PROVIDED: &str = "Body not provided!";
    pub const ERR_UNSUPPORTED_BODY: &str = "Unsupported body encoding!";
    pub const ERR_INV_CREDS: &str = "Invalid credentials!";
    pub const DEV_NO_BODY: &str =
        "No response body was assigned! This is a dev-only message and this route will be a 404 in prod.";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }
}

/// Build an envelope body.
///
/// `status` and `message` are inserted first and `extras` are merged after
/// them, so an extra named `status` or `message` replaces the built-in value
/// (last write wins). Callers should not rely on this.
pub fn build_response(
    outcome: Outcome,
    message: impl fmt::Display,
    extras: Map<String, Value>,
) -> Map<String, Value> {
    let mut body = Map::with_capacity(extras.len() + 2);
    body.insert("status".into(), Value::from(outcome.as_str()));
    body.insert("message".into(), Value::from(message.to_string()));
    body.extend(extras);
    body
}

/// An envelope paired with the HTTP status it is sent with.
#[derive(Debug, Clone)]
pub struct Envelope {
    status: StatusCode,
    body: Map<String, Value>,
}

impl Envelope {
    pub fn success(message: impl fmt::Display, extras: Map<String, Value>) -> Self {
        Self {
            status: StatusCode::OK,
            body: build_response(Outcome::Success, message, extras),
        }
    }

    pub fn failure(
        status: StatusCode,
        message: impl fmt::Display,
        extras: Map<String, Value>,
    ) -> Self {
        Self {
            status,
            body: build_response(Outcome::Failure, message, extras),
        }
    }

    /// 500 with the generic message and nothing else.
    pub fn generic_failure() -> Self {
        Self::failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            messages::ERR_GENERIC,
            Map::new(),
        )
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Response helper attached to every request that went through a formkit
/// pipeline.
#[derive(Debug, Clone)]
pub struct Responder {
    route: Arc<str>,
}

impl Responder {
    pub(crate) fn new(route: Arc<str>) -> Self {
        Self { route }
    }

    /// Path pattern the request was routed to.
    pub fn route(&self) -> &str {
        &self.route
    }

    /// 200 success envelope. `extras` is merged at the top level when it is a
    /// JSON object, dropped when `null`, and placed under `data` otherwise.
    pub fn success(&self, message: impl fmt::Display, extras: impl Into<Value>) -> Envelope {
        let extras = match extras.into() {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".into(), other);
                map
            }
        };
        Envelope::success(message, extras)
    }

    pub fn generic_success(&self) -> Envelope {
        Envelope::success(messages::SUCC_GENERIC, Map::new())
    }
}

impl<S> FromRequestParts<S> for Responder
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<Responder>().cloned().ok_or_else(|| {
            Error::unexpected(anyhow::anyhow!(
                "Responder requested on a route that was not registered through formkit"
            ))
        })
    }
}
