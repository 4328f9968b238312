//! Errors surfaced at the binary boundary.

use std::ffi::OsString;

use bootgate_config::ConfigError;
use thiserror::Error;

use crate::sequencer::BootstrapError;
use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] ConfigError),
    #[error("worker argument is not valid UTF-8: {0:?}")]
    NonUtf8Argument(OsString),
    #[error("failed to initialise telemetry: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
}
