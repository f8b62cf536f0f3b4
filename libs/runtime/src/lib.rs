//! Process-level plumbing shared by formkit applications: layered
//! configuration loading and `tracing` subscriber setup.

pub mod config;
pub mod logging;

pub use config::{
    default_logging_config, AppConfig, CliArgs, LoggingConfig, Mode, ParseModeError, Section,
    ServerConfig,
};
