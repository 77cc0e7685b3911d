//! Configuration structures.
//!
//! Configuration is supplied by the embedding application; every section has
//! serde defaults so a zero-config kernel is always valid.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Global kernel configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Kernel service start/stop behavior.
    #[serde(default)]
    pub services: ServiceConfig,
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Kernel service registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Grace period for a single service stop. Stops that take longer are
    /// logged at warn level; the registry does not abort them.
    #[serde(with = "humantime_serde")]
    pub stop_grace: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_secs(5),
        }
    }
}
