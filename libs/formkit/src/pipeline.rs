//! Per-route request pipelines.
//!
//! Bodied routes run [`run_bodied`]: parse the body, validate it against the
//! declared [`Shape`], attach the results to the request extensions and only
//! then call the next stage. Non-bodied routes run [`attach_responder`].
//! Neither writes a response on failure; errors are returned as
//! [`ApiError`] responses and rendered by the boundary.

use std::fmt;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{FromRequestParts, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http::request::Parts;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::body::{BodyParser, UploadedFiles};
use crate::config::Mode;
use crate::envelope::{messages, Responder};
use crate::error::{ApiError, Error};
use crate::shape::Shape;
use crate::validation::{validate, StructuralValidator, ValidationOutcome};

const TAG: &str = "formkit::pipeline";

/// Body pipeline states. `Failed` is not a state here: any transition may
/// return an [`ApiError`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    BodyExtracted,
    Validated,
    Dispatched,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::NotStarted => "not_started",
            Phase::BodyExtracted => "body_extracted",
            Phase::Validated => "validated",
            Phase::Dispatched => "dispatched",
        };
        f.write_str(s)
    }
}

/// Normalised request body, attached by the body pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedBody(pub Map<String, Value>);

/// Everything the body pipeline needs for one route.
#[derive(Clone)]
pub struct BodiedStage {
    pub(crate) route: Arc<str>,
    pub(crate) shape: Arc<Shape>,
    pub(crate) parser: Arc<dyn BodyParser>,
    pub(crate) validator: Arc<dyn StructuralValidator>,
    pub(crate) mode: Mode,
}

impl BodiedStage {
    pub fn new(
        route: impl Into<Arc<str>>,
        shape: Arc<Shape>,
        parser: Arc<dyn BodyParser>,
        validator: Arc<dyn StructuralValidator>,
        mode: Mode,
    ) -> Self {
        Self {
            route: route.into(),
            shape,
            parser,
            validator,
            mode,
        }
    }

    /// Drive the request from `NotStarted` to `Validated`. The returned request
    /// carries [`ValidatedBody`], [`UploadedFiles`] and a [`Responder`] and has
    /// an empty body.
    pub async fn prepare(&self, req: Request) -> Result<Request, ApiError> {
        self.trace(Phase::NotStarted);
        let (mut parts, body) = req.into_parts();

        let parsed = self.parser.parse(&parts.headers, body).await?;
        self.trace(Phase::BodyExtracted);

        let normalized = match validate(
            self.validator.as_ref(),
            &self.shape,
            &parsed.fields,
            parsed.encoding,
        ) {
            ValidationOutcome::Accepted(normalized) => normalized,
            ValidationOutcome::Rejected { field, message } => {
                return Err(self.reject(field, message));
            }
        };

        parts.extensions.insert(ValidatedBody(normalized));
        parts.extensions.insert(parsed.files);
        parts.extensions.insert(Responder::new(self.route.clone()));
        self.trace(Phase::Validated);

        Ok(Request::from_parts(parts, Body::empty()))
    }

    fn reject(&self, field: Option<String>, message: String) -> ApiError {
        let composite = field
            .as_deref()
            .and_then(|name| self.shape.get(name))
            .is_some_and(|f| f.validator.is_composite());

        tracing::debug!(
            route = %self.route,
            field = field.as_deref().unwrap_or("-"),
            composite,
            "body rejected: {message}"
        );

        if composite {
            ApiError::bad_request(message).with_tag(TAG)
        } else if self.mode.is_development() {
            ApiError::bad_request(messages::ERR_INCM_BODY)
                .with_tag(TAG)
                .with_extra("devNote", message)
                .with_extra("expectedBody", self.shape.describe())
        } else {
            ApiError::bad_request(messages::ERR_GENERIC).with_tag(TAG)
        }
    }

    fn trace(&self, phase: Phase) {
        tracing::debug!(route = %self.route, %phase, "body pipeline");
    }
}

/// Body pipeline as an axum middleware.
pub async fn run_bodied(State(stage): State<BodiedStage>, req: Request, next: Next) -> Response {
    match stage.prepare(req).await {
        Ok(req) => {
            stage.trace(Phase::Dispatched);
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}

/// Non-bodied pipeline: attach a [`Responder`] and continue.
pub async fn attach_responder(
    State(route): State<Arc<str>>,
    mut req: Request,
    next: Next,
) -> Response {
    req.extensions_mut().insert(Responder::new(route));
    next.run(req).await
}

/// The validated body, deserialised into `T` (the raw map by default).
///
/// Failing to deserialise a body that already passed validation means the
/// handler's type disagrees with its declared shape; that is reported as an
/// unexpected error.
#[derive(Debug, Clone)]
pub struct Validated<T = Map<String, Value>>(pub T);

impl<S, T> FromRequestParts<S> for Validated<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ValidatedBody(map) = parts.extensions.get::<ValidatedBody>().ok_or_else(|| {
            Error::unexpected(anyhow::anyhow!(
                "Validated<_> used on a route without a declared body shape"
            ))
        })?;

        serde_json::from_value(Value::Object(map.clone()))
            .map(Validated)
            .map_err(|e| {
                Error::unexpected(
                    anyhow::Error::new(e).context("validated body does not fit the handler type"),
                )
            })
    }
}

/// Uploaded files of a bodied route.
#[derive(Debug, Clone, Default)]
pub struct Files(pub UploadedFiles);

impl<S> FromRequestParts<S> for Files
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<UploadedFiles>()
            .cloned()
            .map(Files)
            .ok_or_else(|| {
                Error::unexpected(anyhow::anyhow!(
                    "Files used on a route without a declared body shape"
                ))
            })
    }
}
