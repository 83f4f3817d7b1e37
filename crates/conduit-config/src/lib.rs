#![allow(clippy::must_use_candidate)]

pub mod backend;
mod duration;
mod env;
mod loader;
pub mod middleware;
pub mod router;
pub mod telemetry;

use indexmap::IndexMap;
use serde::Deserialize;

pub use backend::*;
pub use middleware::*;
pub use router::*;
pub use telemetry::{LogFormat, TelemetryConfig};

/// Top-level conduit configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Backends keyed by name, in declaration order
    #[serde(default)]
    pub backends: IndexMap<String, BackendConfig>,
    /// Optional multi-backend router
    #[serde(default)]
    pub router: Option<RouterConfig>,
    /// Middleware wrapped around every backend call
    #[serde(default)]
    pub middleware: MiddlewareConfig,
}
