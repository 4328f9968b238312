//! Structured telemetry initialisation for the supervisor.
//!
//! Boot diagnostics are the only output the supervisor produces before it
//! hands off, so a bare level such as `debug` is scoped to the supervisor's
//! own targets while everything else stays at `warn` or quieter. Full
//! directive expressions are used as given.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, level_filters::LevelFilter, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use bootgate_config::{Config, LogFormat};

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

const SUPERVISOR_TARGET: &str = env!("CARGO_PKG_NAME");

/// Handle returned when telemetry has been initialised.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Configures the global tracing subscriber when invoked for the first time.
///
/// Only the first call installs a subscriber; later calls return a fresh
/// [`TelemetryHandle`] without touching global state. Events are written to
/// stderr so the worker's stdout stays untouched before handoff.
///
/// # Errors
///
/// Returns [`TelemetryError`] when the filter expression is invalid or another
/// global subscriber is already installed.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(config))
        .map(|_| TelemetryHandle)
}

fn install_subscriber(config: &Config) -> Result<(), TelemetryError> {
    let filter = supervisor_filter(config.log_filter())?;

    let builder = |filter: EnvFilter| {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(io::stderr)
            .with_ansi(io::stderr().is_terminal())
            .with_timer(fmt::time::UtcTime::rfc_3339())
    };

    let subscriber: Box<dyn Subscriber + Send + Sync> = match config.log_format() {
        LogFormat::Json => Box::new(builder(filter).json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder(filter).compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}

fn supervisor_filter(expression: &str) -> Result<EnvFilter, TelemetryError> {
    let expression = match expression.trim().parse::<LevelFilter>() {
        Ok(level) => format!(
            "{},{SUPERVISOR_TARGET}={level}",
            level.min(LevelFilter::WARN)
        ),
        Err(_) => expression.to_owned(),
    };
    EnvFilter::try_new(expression).map_err(|error| TelemetryError::Filter(error.to_string()))
}
