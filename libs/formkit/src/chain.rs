//! Ordered stage lists and type-erased user middleware.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::MethodFilter,
};
use http::Method;

/// Verbs a route can be registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Head,
    Options,
    Post,
    Put,
    Patch,
    Delete,
}

impl Verb {
    pub const ALL: [Verb; 7] = [
        Verb::Get,
        Verb::Head,
        Verb::Options,
        Verb::Post,
        Verb::Put,
        Verb::Patch,
        Verb::Delete,
    ];

    /// Bodied verbs take a declared shape and run the body pipeline.
    pub fn is_bodied(self) -> bool {
        matches!(self, Verb::Post | Verb::Put | Verb::Patch | Verb::Delete)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Head => "HEAD",
            Verb::Options => "OPTIONS",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Patch => "PATCH",
            Verb::Delete => "DELETE",
        }
    }

    pub fn method(self) -> Method {
        match self {
            Verb::Get => Method::GET,
            Verb::Head => Method::HEAD,
            Verb::Options => Method::OPTIONS,
            Verb::Post => Method::POST,
            Verb::Put => Method::PUT,
            Verb::Patch => Method::PATCH,
            Verb::Delete => Method::DELETE,
        }
    }

    pub(crate) fn filter(self) -> MethodFilter {
        match self {
            Verb::Get => MethodFilter::GET,
            Verb::Head => MethodFilter::HEAD,
            Verb::Options => MethodFilter::OPTIONS,
            Verb::Post => MethodFilter::POST,
            Verb::Put => MethodFilter::PUT,
            Verb::Patch => MethodFilter::PATCH,
            Verb::Delete => MethodFilter::DELETE,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stage of a route's request chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    BodyParser,
    Validation,
    ResponseHelper,
    /// Scope middleware, by index into the shared list.
    Shared(usize),
    /// Route middleware, by index into the route's own list.
    Route(usize),
    Handler,
}

/// What [`assemble`] needs to know about a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteSpec {
    pub verb: Verb,
    pub shared: usize,
    pub route: usize,
}

/// Execution order for a route, first stage first.
///
/// Bodied routes parse then validate; non-bodied routes only attach the
/// response helper. Scope middleware precedes route middleware and the
/// handler always runs last.
pub fn assemble(spec: &RouteSpec) -> Vec<StageKind> {
    let mut stages = Vec::with_capacity(spec.shared + spec.route + 3);
    if spec.verb.is_bodied() {
        stages.extend([StageKind::BodyParser, StageKind::Validation]);
    } else {
        stages.push(StageKind::ResponseHelper);
    }
    stages.extend((0..spec.shared).map(StageKind::Shared));
    stages.extend((0..spec.route).map(StageKind::Route));
    stages.push(StageKind::Handler);
    stages
}

type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send>>;
type MiddlewareFn = dyn Fn(Request, Next) -> BoxFuture + Send + Sync;

/// Type-erased user middleware. Build one with [`middleware`].
#[derive(Clone)]
pub struct Middleware(Arc<MiddlewareFn>);

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Middleware")
    }
}

/// Wrap an `async fn(Request, Next) -> impl IntoResponse`.
///
/// Returning `Err(formkit::Error)` short-circuits the chain; the error is
/// rendered by the boundary.
pub fn middleware<F, Fut, R>(f: F) -> Middleware
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse,
{
    Middleware(Arc::new(move |req: Request, next: Next| -> BoxFuture {
        let fut = f(req, next);
        Box::pin(async move { fut.await.into_response() })
    }))
}

impl Middleware {
    pub async fn call(&self, req: Request, next: Next) -> Response {
        (self.0)(req, next).await
    }
}

/// Adapter for `axum::middleware::from_fn_with_state`.
pub(crate) async fn run_middleware(
    State(mw): State<Middleware>,
    req: Request,
    next: Next,
) -> Response {
    mw.call(req, next).await
}
