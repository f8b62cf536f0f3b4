//! Route documentation registry.
//!
//! Routes are recorded while the app is being assembled and the registry is
//! frozen once the router is built; after that it is only read. Recording is
//! a no-op outside development mode.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::config::Mode;
use crate::shape::Shape;

const TAG: &str = "formkit::docs";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub method: String,
    pub path: String,
    /// Rendered [`Shape::describe`] for bodied routes.
    pub shape: Option<String>,
}

impl RouteEntry {
    fn line(&self) -> String {
        match &self.shape {
            Some(shape) if !shape.is_empty() => {
                format!("* **{}** {}: {}", self.method, self.path, shape)
            }
            _ => format!("* **{}** {}", self.method, self.path),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DocError {
    #[error("Cannot save documentation in production env. Ignoring.")]
    Disabled,
    #[error("failed to write route documentation to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug)]
pub struct RouteRegistry {
    enabled: bool,
    frozen: AtomicBool,
    routes: RwLock<IndexMap<String, Vec<RouteEntry>>>,
}

impl RouteRegistry {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            frozen: AtomicBool::new(false),
            routes: RwLock::new(IndexMap::new()),
        }
    }

    pub fn for_mode(mode: Mode) -> Self {
        Self::new(mode.is_development())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Append a route under its method. Returns whether it was recorded.
    pub fn record(&self, method: &str, path: &str, shape: Option<&Shape>) -> bool {
        if !self.enabled {
            return false;
        }
        if self.is_frozen() {
            tracing::warn!(tag = TAG, %method, %path, "route recorded after registry freeze; ignoring");
            return false;
        }

        let method = method.to_ascii_uppercase();
        let entry = RouteEntry {
            method: method.clone(),
            path: path.to_string(),
            shape: shape.map(Shape::describe),
        };
        self.routes.write().entry(method).or_default().push(entry);
        true
    }

    /// End of the registration phase.
    pub fn freeze(&self) {
        if !self.frozen.swap(true, Ordering::AcqRel) {
            tracing::debug!(tag = TAG, routes = self.len(), "route registry frozen");
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.routes.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries grouped by method, methods in first-registration order.
    pub fn entries(&self) -> Vec<RouteEntry> {
        self.routes.read().values().flatten().cloned().collect()
    }

    pub fn render(&self) -> String {
        let routes = self.routes.read();
        let mut out = String::new();
        for (method, entries) in routes.iter() {
            out.push_str(&format!("# {method} routes\n"));
            for entry in entries {
                out.push_str(&entry.line());
                out.push_str("\n\n");
            }
        }
        out
    }

    /// Write [`render`](Self::render) to `path`, replacing the file.
    pub fn flush(&self, path: impl AsRef<Path>) -> Result<PathBuf, DocError> {
        if !self.enabled {
            return Err(DocError::Disabled);
        }

        let path = path.as_ref().to_path_buf();
        let io_err = |source: io::Error| DocError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(&path, self.render()).map_err(io_err)?;

        tracing::info!(tag = TAG, path = %path.display(), routes = self.len(), "API doc saved");
        Ok(path)
    }
}
