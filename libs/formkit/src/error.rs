//! Error taxonomy and the handler-facing error types.
//!
//! Neither [`ApiError`] nor [`Error`] renders a body on its own: their
//! `IntoResponse` impls produce a bare status response carrying an
//! [`EscapedError`] extension, and the error boundary middleware turns that
//! into the wire envelope. Handlers can therefore use `?` freely and still end
//! up with exactly one response write per request.

use std::fmt;
use std::panic::Location;
use std::path::Path;
use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde_json::{Map, Value};

/// Closed set of failure kinds. Every kind maps to exactly one status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The request is malformed or fails validation.
    BadRequest,
    /// Missing or invalid authentication credentials.
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    NotAcceptable,
    ProxyAuthenticationRequired,
    RequestTimeout,
    Conflict,
    Gone,
    LengthRequired,
    PreconditionFailed,
    /// Request payload exceeds the configured body limit.
    PayloadTooLarge,
    UriTooLong,
    UnsupportedMediaType,
    RangeNotSatisfiable,
    ExpectationFailed,
    UpgradeRequired,
    /// Anything the server did not anticipate.
    InternalServerError,
    NotImplemented,
    BadGateway,
    ServiceUnavailable,
    GatewayTimeout,
    HttpVersionNotSupported,
    UnprocessableEntity,
    Locked,
    FailedDependency,
    PreconditionRequired,
    /// Rate limiting.
    TooManyRequests,
    RequestHeaderFieldsTooLarge,
    UnavailableForLegalReasons,
    VariantAlsoNegotiates,
    InsufficientStorage,
    NetworkAuthenticationRequired,
}

impl ErrorKind {
    /// Every variant, in declaration order.
    pub const ALL: [ErrorKind; 34] = [
        ErrorKind::BadRequest,
        ErrorKind::Unauthorized,
        ErrorKind::Forbidden,
        ErrorKind::NotFound,
        ErrorKind::MethodNotAllowed,
        ErrorKind::NotAcceptable,
        ErrorKind::ProxyAuthenticationRequired,
        ErrorKind::RequestTimeout,
        ErrorKind::Conflict,
        ErrorKind::Gone,
        ErrorKind::LengthRequired,
        ErrorKind::PreconditionFailed,
        ErrorKind::PayloadTooLarge,
        ErrorKind::UriTooLong,
        ErrorKind::UnsupportedMediaType,
        ErrorKind::RangeNotSatisfiable,
        ErrorKind::ExpectationFailed,
        ErrorKind::UpgradeRequired,
        ErrorKind::InternalServerError,
        ErrorKind::NotImplemented,
        ErrorKind::BadGateway,
        ErrorKind::ServiceUnavailable,
        ErrorKind::GatewayTimeout,
        ErrorKind::HttpVersionNotSupported,
        ErrorKind::UnprocessableEntity,
        ErrorKind::Locked,
        ErrorKind::FailedDependency,
        ErrorKind::PreconditionRequired,
        ErrorKind::TooManyRequests,
        ErrorKind::RequestHeaderFieldsTooLarge,
        ErrorKind::UnavailableForLegalReasons,
        ErrorKind::VariantAlsoNegotiates,
        ErrorKind::InsufficientStorage,
        ErrorKind::NetworkAuthenticationRequired,
    ];

    pub const fn status(self) -> StatusCode {
        match self {
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ErrorKind::NotAcceptable => StatusCode::NOT_ACCEPTABLE,
            ErrorKind::ProxyAuthenticationRequired => StatusCode::PROXY_AUTHENTICATION_REQUIRED,
            ErrorKind::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Gone => StatusCode::GONE,
            ErrorKind::LengthRequired => StatusCode::LENGTH_REQUIRED,
            ErrorKind::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            ErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::UriTooLong => StatusCode::URI_TOO_LONG,
            ErrorKind::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ErrorKind::RangeNotSatisfiable => StatusCode::RANGE_NOT_SATISFIABLE,
            ErrorKind::ExpectationFailed => StatusCode::EXPECTATION_FAILED,
            ErrorKind::UpgradeRequired => StatusCode::UPGRADE_REQUIRED,
            ErrorKind::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            ErrorKind::BadGateway => StatusCode::BAD_GATEWAY,
            ErrorKind::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::HttpVersionNotSupported => StatusCode::HTTP_VERSION_NOT_SUPPORTED,
            ErrorKind::UnprocessableEntity => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Locked => StatusCode::LOCKED,
            ErrorKind::FailedDependency => StatusCode::FAILED_DEPENDENCY,
            ErrorKind::PreconditionRequired => StatusCode::PRECONDITION_REQUIRED,
            ErrorKind::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::RequestHeaderFieldsTooLarge => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
            ErrorKind::UnavailableForLegalReasons => StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS,
            ErrorKind::VariantAlsoNegotiates => StatusCode::VARIANT_ALSO_NEGOTIATES,
            ErrorKind::InsufficientStorage => StatusCode::INSUFFICIENT_STORAGE,
            ErrorKind::NetworkAuthenticationRequired => {
                StatusCode::NETWORK_AUTHENTICATION_REQUIRED
            }
        }
    }

    /// Machine-readable snake_case code, used in log fields.
    pub const fn code(self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::MethodNotAllowed => "method_not_allowed",
            ErrorKind::NotAcceptable => "not_acceptable",
            ErrorKind::ProxyAuthenticationRequired => "proxy_authentication_required",
            ErrorKind::RequestTimeout => "request_timeout",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Gone => "gone",
            ErrorKind::LengthRequired => "length_required",
            ErrorKind::PreconditionFailed => "precondition_failed",
            ErrorKind::PayloadTooLarge => "payload_too_large",
            ErrorKind::UriTooLong => "uri_too_long",
            ErrorKind::UnsupportedMediaType => "unsupported_media_type",
            ErrorKind::RangeNotSatisfiable => "range_not_satisfiable",
            ErrorKind::ExpectationFailed => "expectation_failed",
            ErrorKind::UpgradeRequired => "upgrade_required",
            ErrorKind::InternalServerError => "internal_server_error",
            ErrorKind::NotImplemented => "not_implemented",
            ErrorKind::BadGateway => "bad_gateway",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::GatewayTimeout => "gateway_timeout",
            ErrorKind::HttpVersionNotSupported => "http_version_not_supported",
            ErrorKind::UnprocessableEntity => "unprocessable_entity",
            ErrorKind::Locked => "locked",
            ErrorKind::FailedDependency => "failed_dependency",
            ErrorKind::PreconditionRequired => "precondition_required",
            ErrorKind::TooManyRequests => "too_many_requests",
            ErrorKind::RequestHeaderFieldsTooLarge => "request_header_fields_too_large",
            ErrorKind::UnavailableForLegalReasons => "unavailable_for_legal_reasons",
            ErrorKind::VariantAlsoNegotiates => "variant_also_negotiates",
            ErrorKind::InsufficientStorage => "insufficient_storage",
            ErrorKind::NetworkAuthenticationRequired => "network_authentication_required",
        }
    }

    /// Reverse lookup, used when normalising framework-generated responses.
    pub fn from_status(status: StatusCode) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.status() == status)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A taxonomy error: kind, user-facing message, origin tag and extras that
/// are merged into the failure envelope.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    /// Where the error was raised, e.g. `formkit::pipeline`. Logged, never sent.
    pub tag: String,
    pub extras: Map<String, Value>,
    location: &'static Location<'static>,
}

impl ApiError {
    #[track_caller]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            tag: String::new(),
            extras: Map::new(),
            location: Location::caller(),
        }
    }

    #[track_caller]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    #[track_caller]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    #[track_caller]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    #[track_caller]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    #[track_caller]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    #[track_caller]
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalServerError, message)
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }

    pub fn with_extras(mut self, extras: Map<String, Value>) -> Self {
        self.extras.extend(extras);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }

    /// Call site that constructed this error.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }
}

/// Error type returned by handlers and user middleware.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Api(ApiError),
    /// Anything outside the taxonomy. Always rendered as a generic 500.
    #[error("{error:#}")]
    Unexpected {
        error: anyhow::Error,
        location: &'static Location<'static>,
    },
}

impl Error {
    #[track_caller]
    pub fn unexpected(error: impl Into<anyhow::Error>) -> Self {
        Error::Unexpected {
            error: error.into(),
            location: Location::caller(),
        }
    }

    pub fn location(&self) -> &'static Location<'static> {
        match self {
            Error::Api(e) => e.location(),
            Error::Unexpected { location, .. } => location,
        }
    }

    /// Source file name of the call site, e.g. `routes.rs`.
    pub fn culprit(&self) -> &'static str {
        culprit_of(self.location())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::Api(e) => e.status(),
            Error::Unexpected { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub(crate) fn culprit_of(location: &'static Location<'static>) -> &'static str {
    Path::new(location.file())
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("Unknown")
}

impl From<ApiError> for Error {
    fn from(e: ApiError) -> Self {
        Error::Api(e)
    }
}

impl From<anyhow::Error> for Error {
    #[track_caller]
    fn from(error: anyhow::Error) -> Self {
        Error::Unexpected {
            error,
            location: Location::caller(),
        }
    }
}

impl From<std::io::Error> for Error {
    #[track_caller]
    fn from(error: std::io::Error) -> Self {
        Error::unexpected(error)
    }
}

impl From<serde_json::Error> for Error {
    #[track_caller]
    fn from(error: serde_json::Error) -> Self {
        Error::unexpected(error)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Response extension marking an error that still has to be rendered by the
/// boundary.
#[derive(Debug, Clone)]
pub struct EscapedError(pub Arc<Error>);

impl EscapedError {
    pub fn error(&self) -> &Error {
        &self.0
    }
}

fn escaped(error: Error) -> Response {
    let mut resp = error.status().into_response();
    resp.extensions_mut().insert(EscapedError(Arc::new(error)));
    resp
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        escaped(Error::Api(self))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        escaped(self)
    }
}
