//! Global tracing subscriber setup for the `triggers` binary and worker.

use std::any::type_name_of_val;
use std::sync::atomic::{AtomicBool, Ordering};

use log::LevelFilter;
use thiserror::Error;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::Layer,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

use crate::config::AppConfig;

/// Errors that can occur while initializing global telemetry.
#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("failed to install log tracer bridge: {0}")]
    LogTracer(#[from] log::SetLoggerError),
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

static TELEMETRY_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Statement logging from sqlx is only useful when chasing a query problem.
const QUIET_TARGETS: &[&str] = &["sqlx=warn", "sea_orm_migration=info"];

/// Filter used when `RUST_LOG` is unset: the configured level for everything,
/// with database statement noise capped unless the level is `trace`.
pub fn default_filter(log_level: &str) -> String {
    let level = log_level.trim().to_ascii_lowercase();
    if level == "trace" {
        return level;
    }
    std::iter::once(level.as_str())
        .chain(QUIET_TARGETS.iter().copied())
        .collect::<Vec<_>>()
        .join(",")
}

/// Initialize global tracing exactly once. `log::` records from sqlx and the
/// pool setup are bridged into the same pipeline.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryInitError> {
    if TELEMETRY_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Ok(());
    }

    if let Err(err) = LogTracer::builder()
        .with_max_level(LevelFilter::Trace)
        .init()
    {
        let logger_type = type_name_of_val(log::logger());
        if !logger_type.contains("LogTracer") {
            eprintln!("Warning: log bridge not installed ({err}); sqlx records will be lost.");
        }
    }

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(&config.log_level)));

    let fmt_layer = match config.log_format.as_str() {
        "pretty" => fmt::layer().pretty().boxed(),
        "compact" => fmt::layer().compact().with_target(false).boxed(),
        _ => fmt::layer().json().with_current_span(true).boxed(),
    };

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        TELEMETRY_INITIALIZED.store(false, Ordering::SeqCst);
        eprintln!("Warning: tracing subscriber not installed ({err}); keeping the default.");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_quiets_sqlx_below_trace() {
        assert_eq!(default_filter("INFO"), "info,sqlx=warn,sea_orm_migration=info");
        assert_eq!(default_filter("trace"), "trace");
    }

    #[test]
    fn init_is_idempotent() {
        let mut config = AppConfig::default();
        config.log_format = "compact".to_string();
        assert!(init_tracing(&config).is_ok());
        assert!(init_tracing(&config).is_ok());
    }
}
