//! Observability utilities.
//!
//! Tracing initialization plus the logging collaborator seam: dispatch-path
//! errors are reported through the [`LoggingService`] trait so embedders can
//! redirect them without touching the global subscriber.

use std::fmt;
use std::sync::OnceLock;
use tracing::Level;
use tracing_subscriber::{fmt as sub_fmt, prelude::*, EnvFilter};

use crate::types::ObservabilityConfig;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Initialize tracing subscriber once for the process.
///
/// Log format defaults to plain text and can be switched to JSON via
/// `HIVE_LOG_FORMAT=json`. Filter defaults to `info` if `RUST_LOG` is unset.
pub fn init_tracing() {
    init_tracing_with(&ObservabilityConfig::default());
}

/// Initialize tracing with explicit configuration.
///
/// `RUST_LOG` and `HIVE_LOG_FORMAT` still win over the config values, so a
/// deployed kernel can be re-leveled without a rebuild.
pub fn init_tracing_with(config: &ObservabilityConfig) {
    let fallback_level = config.log_level.clone();
    let json_default = config.json_logs;
    TRACING_INIT.get_or_init(move || {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(fallback_level));
        let json = std::env::var("HIVE_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(json_default);

        let result = if json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(sub_fmt::layer().json())
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(sub_fmt::layer().compact())
                .try_init()
        };

        if let Err(err) = result {
            eprintln!("tracing init skipped: {err}");
        }
    });
}

/// Logging collaborator consumed by the dispatch path.
///
/// `log` is fire-and-forget and must never block: the dispatcher calls it
/// inline while isolating guard and behavior-unit failures.
pub trait LoggingService: Send + Sync + fmt::Debug {
    fn log(&self, level: Level, message: &str);
}

/// Default logging collaborator backed by the `tracing` macros.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl LoggingService for TracingLogger {
    fn log(&self, level: Level, message: &str) {
        match level {
            Level::ERROR => tracing::error!("{message}"),
            Level::WARN => tracing::warn!("{message}"),
            Level::INFO => tracing::info!("{message}"),
            Level::DEBUG => tracing::debug!("{message}"),
            Level::TRACE => tracing::trace!("{message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
    }

    #[test]
    fn tracing_logger_accepts_all_levels() {
        let logger = TracingLogger;
        for level in [
            Level::ERROR,
            Level::WARN,
            Level::INFO,
            Level::DEBUG,
            Level::TRACE,
        ] {
            logger.log(level, "probe");
        }
    }
}
