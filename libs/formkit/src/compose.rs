//! Route groups under a common prefix.

use axum::handler::Handler;

use crate::app::{App, Routes};
use crate::chain::{Middleware, Verb};
use crate::shape::Shape;

/// Join a scope root and a route path.
///
/// Segments are joined with `/`, repeated slashes collapse, the result always
/// starts with `/` and never ends with one unless it is the root itself.
pub fn join(root: &str, path: &str) -> String {
    let raw = format!("{root}/{path}");
    let mut out = String::with_capacity(raw.len() + 1);
    out.push('/');
    for segment in raw.split('/').filter(|s| !s.is_empty()) {
        if !out.ends_with('/') {
            out.push('/');
        }
        out.push_str(segment);
    }
    out
}

/// Registers routes on an [`App`] under `root`, running the scope's shared
/// middleware before each route's own.
pub struct Scope<'a, S> {
    app: &'a mut App<S>,
    root: String,
    shared: Vec<Middleware>,
}

impl<'a, S> Scope<'a, S>
where
    S: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(app: &'a mut App<S>, root: String, shared: Vec<Middleware>) -> Self {
        Self { app, root, shared }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Nested scope; the parent's shared middleware runs first.
    pub fn scope(&mut self, root: &str, shared: Vec<Middleware>) -> Scope<'_, S> {
        let mut all = self.shared.clone();
        all.extend(shared);
        Scope::new(self.app, join(&self.root, root), all)
    }
}

impl<S> Routes<S> for Scope<'_, S>
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
        let path = join(&self.root, path);
        self.app
            .add_route(verb, &path, shape, &self.shared, middleware, handler);
        self
    }
}
