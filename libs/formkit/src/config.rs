use std::path::PathBuf;
use std::time::Duration;

pub use runtime::Mode;
use runtime::ServerConfig;

/// Library-side options for an [`App`](crate::App).
#[derive(Debug, Clone)]
pub struct AppOptions {
    pub mode: Mode,
    /// Target of [`App::save_api_doc`](crate::App::save_api_doc).
    pub doc_path: PathBuf,
    pub body_limit: usize,
    /// `None` disables the handler timeout.
    pub request_timeout: Option<Duration>,
    pub cors_enabled: bool,
}

impl AppOptions {
    pub fn development() -> Self {
        Self {
            mode: Mode::Development,
            ..Self::default()
        }
    }

    pub fn production() -> Self {
        Self::default()
    }

    pub fn with_doc_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.doc_path = path.into();
        self
    }

    pub fn with_body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for AppOptions {
    fn from(cfg: &ServerConfig) -> Self {
        Self {
            mode: cfg.mode,
            doc_path: PathBuf::from(&cfg.doc_path),
            body_limit: cfg.body_limit_bytes,
            request_timeout: (cfg.timeout_sec > 0).then(|| Duration::from_secs(cfg.timeout_sec)),
            cors_enabled: cfg.cors_enabled,
        }
    }
}
