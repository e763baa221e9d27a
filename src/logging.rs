/*!
 * Logging and tracing initialization
 */

use std::fs::File;
use std::path::Path;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LoggingConfig;
use crate::error::{Result, TripwireError};

/// Initialize structured logging based on configuration
///
/// `RUST_LOG` takes precedence over the configured level. Fails with
/// [`TripwireError::Logging`] if a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = build_filter(config)?;

    match config.log_file {
        Some(ref log_path) => init_file_logging(log_path, config.json, env_filter),
        None => init_stdout_logging(env_filter),
    }
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let level = config.level.to_tracing_level();
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("tripwire={level},tripwire_core_breaker={level}")))
        .map_err(|e| TripwireError::Logging(format!("Failed to create log filter: {}", e)))
}

/// Initialize logging to stdout
fn init_stdout_logging(env_filter: EnvFilter) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_span_events(FmtSpan::NONE)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| TripwireError::Logging(e.to_string()))
}

/// Initialize logging to a file, as JSON lines or plain text
fn init_file_logging(log_path: &Path, json: bool, env_filter: EnvFilter) -> Result<()> {
    let file = File::create(log_path)
        .map_err(|e| TripwireError::Logging(format!("Failed to create log file: {}", e)))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = if json {
        registry
            .with(
                fmt::layer()
                    .with_writer(file)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_ansi(false)
                    .json(),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(file)
                    .with_thread_ids(true)
                    .with_ansi(false)
                    .compact(),
            )
            .try_init()
    };

    installed.map_err(|e| TripwireError::Logging(e.to_string()))
}

/// Initialize logging for tests; safe to call from every test
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("tripwire=debug,tripwire_core_breaker=debug"));

        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok(); // Ignore error if already initialized
    });
}
