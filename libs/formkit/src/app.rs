//! Route registration and the assembled router.
//!
//! [`App`] owns an `axum::Router` and registers every route through one of the
//! two pipelines, records it for documentation and, once finished, wraps the
//! whole router in the global layer stack (outermost first):
//!
//! `SetRequestId -> PropagateRequestId -> Trace -> push_req_id -> CORS ->
//! error_boundary -> dev_placeholder -> CatchPanic -> Timeout -> BodyLimit`

use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    handler::Handler,
    middleware::{from_fn, from_fn_with_state},
    routing::{on, MethodRouter},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::CorsLayer,
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
};

use crate::body::{BodyParser, FormParser};
use crate::boundary::{dev_placeholder, error_boundary, panic_response};
use crate::chain::{assemble, run_middleware, Middleware, RouteSpec, StageKind, Verb};
use crate::compose::{join, Scope};
use crate::config::{AppOptions, Mode};
use crate::docs::{DocError, RouteRegistry};
use crate::pipeline::{attach_responder, run_bodied, BodiedStage};
use crate::request_id;
use crate::shape::Shape;
use crate::validation::{ExactValidator, StructuralValidator};

/// Verb-level registration shared by [`App`] and [`Scope`].
pub trait Routes<S>: Sized
where
    S: Clone + Send + Sync + 'static,
{
    /// Register `handler` under `verb` and `path`. Bodied verbs validate the
    /// request body against `shape` (an empty, closed shape when `None`).
    fn register<H, T>(
        &mut self,
        verb: Verb,
        path: &str,
        shape: Option<Shape>,
        middleware: Vec<Middleware>,
        handler: H,
    ) -> &mut Self
    where
        H: Handler<T, S>,
        T: 'static;

    fn get<H, T>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.register(Verb::Get, path, None, Vec::new(), handler)
    }

    fn get_with<H, T>(&mut self, path: &str, middleware: Vec<Middleware>, handler: H) -> &mut Self
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.register(Verb::Get, path, None, middleware, handler)
    }

    fn head<H, T>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.register(Verb::Head, path, None, Vec::new(), handler)
    }

    fn head_with<H, T>(&mut self, path: &str, middleware: Vec<Middleware>, handler: H) -> &mut Self
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.register(Verb::Head, path, None, middleware, handler)
    }

    fn options<H, T>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.register(Verb::Options, path, None, Vec::new(), handler)
    }

    fn options_with<H, T>(
        &mut self,
        path: &str,
        middleware: Vec<Middleware>,
        handler: H,
    ) -> &mut Self
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.register(Verb::Options, path, None, middleware, handler)
    }

    fn post<H, T>(&mut self, path: &str, shape: Shape, handler: H) -> &mut Self
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.register(Verb::Post, path, Some(shape), Vec::new(), handler)
    }

    fn post_with<H, T>(
        &mut self,
        path: &str,
        shape: Shape,
        middleware: Vec<Middleware>,
        handler: H,
    ) -> &mut Self
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.register(Verb::Post, path, Some(shape), middleware, handler)
    }

    fn put<H, T>(&mut self, path: &str, shape: Shape, handler: H) -> &mut Self
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.register(Verb::Put, path, Some(shape), Vec::new(), handler)
    }

    fn put_with<H, T>(
        &mut self,
        path: &str,
        shape: Shape,
        middleware: Vec<Middleware>,
        handler: H,
    ) -> &mut Self
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.register(Verb::Put, path, Some(shape), middleware, handler)
    }

    fn patch<H, T>(&mut self, path: &str, shape: Shape, handler: H) -> &mut Self
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.register(Verb::Patch, path, Some(shape), Vec::new(), handler)
    }

    fn patch_with<H, T>(
        &mut self,
        path: &str,
        shape: Shape,
        middleware: Vec<Middleware>,
        handler: H,
    ) -> &mut Self
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.register(Verb::Patch, path, Some(shape), middleware, handler)
    }

    fn delete<H, T>(&mut self, path: &str, shape: Shape, handler: H) -> &mut Self
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.register(Verb::Delete, path, Some(shape), Vec::new(), handler)
    }

    fn delete_with<H, T>(
        &mut self,
        path: &str,
        shape: Shape,
        middleware: Vec<Middleware>,
        handler: H,
    ) -> &mut Self
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.register(Verb::Delete, path, Some(shape), middleware, handler)
    }
}

pub struct App<S = ()> {
    router: Router<S>,
    options: AppOptions,
    registry: Arc<RouteRegistry>,
    parser: Arc<dyn BodyParser>,
    validator: Arc<dyn StructuralValidator>,
    // Duplicate detection per (verb, path); first registration wins.
    registered: HashSet<(Verb, String)>,
}

impl<S> App<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new(options: AppOptions) -> Self {
        Self {
            router: Router::new(),
            registry: Arc::new(RouteRegistry::for_mode(options.mode)),
            parser: Arc::new(FormParser::new(options.body_limit)),
            validator: Arc::new(ExactValidator),
            registered: HashSet::new(),
            options,
        }
    }

    /// Replace the body parser for routes registered from now on.
    pub fn with_parser(mut self, parser: impl BodyParser + 'static) -> Self {
        self.parser = Arc::new(parser);
        self
    }

    /// Replace the structural validator for routes registered from now on.
    pub fn with_validator(mut self, validator: impl StructuralValidator + 'static) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    /// The options the app was built with. Named apart from the `OPTIONS`
    /// verb registration on [`Routes`].
    pub fn settings(&self) -> &AppOptions {
        &self.options
    }

    pub fn mode(&self) -> Mode {
        self.options.mode
    }

    pub fn registry(&self) -> Arc<RouteRegistry> {
        self.registry.clone()
    }

    /// A view that prefixes every path with `root` and runs `shared` ahead of
    /// each route's own middleware.
    pub fn scope(&mut self, root: &str, shared: Vec<Middleware>) -> Scope<'_, S> {
        Scope::new(self, join("", root), shared)
    }

    /// Write the route document to the configured doc path.
    pub fn save_api_doc(&self) -> Result<PathBuf, DocError> {
        save_doc(&self.registry, &self.options)
    }

    pub(crate) fn add_route<H, T>(
        &mut self,
        verb: Verb,
        path: &str,
        shape: Option<Shape>,
        shared: &[Middleware],
        route: Vec<Middleware>,
        handler: H,
    ) where
        H: Handler<T, S>,
        T: 'static,
    {
        let path = join("", path);

        if !self.registered.insert((verb, path.clone())) {
            tracing::error!(
                method = verb.as_str(),
                path = %path,
                "Duplicate (method, path) detected; ignoring subsequent registration"
            );
            return;
        }

        let shape = verb.is_bodied().then(|| shape.unwrap_or_default());
        self.registry.record(verb.as_str(), &path, shape.as_ref());

        let route_path: Arc<str> = Arc::from(path.as_str());
        let stages = assemble(&RouteSpec {
            verb,
            shared: shared.len(),
            route: route.len(),
        });

        let bodied = shape.map(|shape| {
            BodiedStage::new(
                route_path.clone(),
                Arc::new(shape),
                self.parser.clone(),
                self.validator.clone(),
                self.options.mode,
            )
        });

        // Layers wrap, so the chain is built from the handler outwards.
        let mut method_router: MethodRouter<S> = on(verb.filter(), handler);
        for stage in stages.iter().rev() {
            method_router = match *stage {
                StageKind::Handler | StageKind::Validation => method_router,
                StageKind::Route(i) => match route.get(i) {
                    Some(mw) => method_router.route_layer(from_fn_with_state(mw.clone(), run_middleware)),
                    None => method_router,
                },
                StageKind::Shared(i) => match shared.get(i) {
                    Some(mw) => method_router.route_layer(from_fn_with_state(mw.clone(), run_middleware)),
                    None => method_router,
                },
                // Parsing and validation run inside one middleware, in that order.
                StageKind::BodyParser => match &bodied {
                    Some(stage) => method_router.route_layer(from_fn_with_state(stage.clone(), run_bodied)),
                    None => method_router,
                },
                StageKind::ResponseHelper => method_router
                    .route_layer(from_fn_with_state(route_path.clone(), attach_responder)),
            };
        }

        tracing::debug!(method = verb.as_str(), path = %path, stages = stages.len(), "registered route");
        self.router = std::mem::take(&mut self.router).route(&path, method_router);
    }

    /// Freeze the registry and install the global layers. The returned router
    /// still needs `with_state` when `S` is not `()`.
    pub fn finish(self) -> Router<S> {
        self.registry.freeze();
        let opts = &self.options;
        let x_request_id = request_id::header();

        let mut router = self
            .router
            .layer(RequestBodyLimitLayer::new(opts.body_limit));

        if let Some(timeout) = opts.request_timeout {
            router = router.layer(TimeoutLayer::new(timeout));
        }

        router = router.layer(CatchPanicLayer::custom(panic_response));

        if opts.mode.is_development() {
            router = router.layer(from_fn(dev_placeholder));
        }

        router = router.layer(from_fn_with_state(opts.mode, error_boundary));

        if opts.cors_enabled {
            router = router.layer(CorsLayer::permissive());
        }

        router
            .layer(from_fn(request_id::push_req_id_to_extensions))
            .layer(request_id::create_trace_layer())
            .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
            .layer(SetRequestIdLayer::new(x_request_id, request_id::MakeReqId))
    }
}

impl<S> Routes<S> for App<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn register<H, T>(
        &mut self,
        verb: Verb,
        path: &str,
        shape: Option<Shape>,
        middleware: Vec<Middleware>,
        handler: H,
    ) -> &mut Self
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.add_route(verb, path, shape, &[], middleware, handler);
        self
    }
}

impl Default for App<()> {
    fn default() -> Self {
        Self::new(AppOptions::default())
    }
}

/// Handed to the `listen` callback once the socket is bound.
#[derive(Debug, Clone)]
pub struct Bound {
    addr: SocketAddr,
    registry: Arc<RouteRegistry>,
    options: AppOptions,
}

impl Bound {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn save_api_doc(&self) -> Result<PathBuf, DocError> {
        save_doc(&self.registry, &self.options)
    }
}

fn save_doc(registry: &RouteRegistry, options: &AppOptions) -> Result<PathBuf, DocError> {
    registry.flush(&options.doc_path).inspect_err(|e| match e {
        DocError::Disabled => tracing::error!(tag = "formkit::docs", "{e}"),
        DocError::Io { .. } => tracing::error!(tag = "formkit::docs", error = %e, "failed to save API doc"),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("HTTP server failed: {0}")]
    Serve(#[from] io::Error),
}

impl App<()> {
    pub fn into_router(self) -> Router {
        self.finish()
    }

    /// Serve on `0.0.0.0:port` until Ctrl-C.
    pub async fn listen<F>(self, port: u16, on_bound: F) -> Result<(), ServeError>
    where
        F: FnOnce(&Bound),
    {
        self.listen_on(SocketAddr::from(([0, 0, 0, 0], port)), on_bound)
            .await
    }

    /// Serve on `addr` until Ctrl-C.
    pub async fn listen_on<F>(self, addr: SocketAddr, on_bound: F) -> Result<(), ServeError>
    where
        F: FnOnce(&Bound),
    {
        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Ctrl-C received");
            }
            on_signal.cancel();
        });

        self.serve(addr, cancel, on_bound).await
    }

    /// Bind `addr`, call `on_bound`, then serve until `cancel` fires.
    pub async fn serve<F>(
        self,
        addr: SocketAddr,
        cancel: CancellationToken,
        on_bound: F,
    ) -> Result<(), ServeError>
    where
        F: FnOnce(&Bound),
    {
        let registry = self.registry.clone();
        let options = self.options.clone();
        let router = self.finish();

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| ServeError::Bind { addr, source })?;
        let addr = listener.local_addr()?;
        tracing::info!("HTTP server bound on {}", addr);

        on_bound(&Bound {
            addr,
            registry,
            options,
        });

        let shutdown = async move {
            cancel.cancelled().await;
            tracing::info!("HTTP server shutting down gracefully (cancellation)");
        };

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}
