//! # Formkit - validated routes and uniform responses for axum
//!
//! Every route is registered through one of two pipelines:
//!
//! - **Bodied** (`POST`, `PUT`, `PATCH`, `DELETE`): the body is parsed (JSON,
//!   urlencoded or multipart), checked against a declared [`Shape`] and only
//!   then handed to the route's middleware and handler.
//! - **Non-bodied** (`GET`, `HEAD`, `OPTIONS`): a [`Responder`] is attached
//!   and the chain continues.
//!
//! Every response leaves as `{"status": "success" | "failure", "message", ...}`.
//! Failures are raised as [`ApiError`] (or any error convertible to
//! [`Error`]) and rendered once, by the top-level boundary.
//!
//! ## Example
//!
//! ```rust,ignore
//! use formkit::prelude::*;
//!
//! let mut app = App::new(AppOptions::development());
//! app.post(
//!     "/testPost",
//!     Shape::new().required("username", Validator::String),
//!     |res: Responder, Validated(body): Validated| async move {
//!         res.success(format!("hi {}", body["username"]), serde_json::json!({}))
//!     },
//! );
//! app.listen(8040, |bound| { let _ = bound.save_api_doc(); }).await?;
//! ```

pub mod app;
pub mod body;
pub mod boundary;
pub mod chain;
pub mod compose;
pub mod config;
pub mod docs;
pub mod envelope;
pub mod error;
pub mod pipeline;
pub mod request_id;
pub mod shape;
pub mod validation;

pub use app::{App, Bound, Routes, ServeError};
pub use body::{BodyError, BodyParser, FormParser, ParsedBody, UploadedFile, UploadedFiles};
pub use chain::{middleware, Middleware, Verb};
pub use compose::{join, Scope};
pub use config::{AppOptions, Mode};
pub use docs::{DocError, RouteEntry, RouteRegistry};
pub use envelope::{build_response, messages, Envelope, Outcome, Responder};
pub use error::{ApiError, Error, ErrorKind, Result};
pub use pipeline::{Files, Validated};
pub use request_id::RequestId;
pub use shape::{Field, Shape, Validator};
pub use validation::{Encoding, ExactValidator, Mismatch, StructuralValidator, ValidationOutcome};

pub mod prelude {
    pub use crate::{
        middleware, ApiError, App, AppOptions, Envelope, Error, ErrorKind, Files, Middleware,
        Mode, Responder, Routes, Shape, Validated, Validator,
    };
    pub use axum::{extract::Request, middleware::Next, response::IntoResponse};
}
