//! Shared configuration for the bootgate container supervisor.
//!
//! The container environment is read exactly once, at process start, into an
//! immutable [`Config`]. Every later stage (launcher, readiness prober,
//! sequencer, handoff) receives the value by reference instead of consulting
//! the environment itself, so the whole boot sequence observes a single
//! consistent snapshot of its settings.
//!
//! Variable names follow the container's conventions (`TOR_PORT`,
//! `TOR_CONTROL_PORT`, `DISPLAY`); supervisor-specific knobs use the
//! `BOOTGATE_` prefix. The control endpoint used for readiness gating is
//! derived from `TOR_CONTROL_PORT` unless `TOR_CONTROL_SOCKET` overrides it.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;
use thiserror::Error;

mod endpoint;
mod logging;

pub use endpoint::{ControlEndpoint, EndpointParseError};
pub use logging::{LogFormat, LogFormatParseError};

/// Immutable supervisor configuration resolved from the container environment.
#[derive(Envconfig, Debug, Clone)]
pub struct Config {
    #[envconfig(from = "TOR_PORT", default = "9050")]
    tor_port: u16,

    #[envconfig(from = "TOR_CONTROL_PORT", default = "9051")]
    tor_control_port: u16,

    #[envconfig(from = "TOR_CONTROL_HOST", default = "127.0.0.1")]
    tor_control_host: String,

    #[envconfig(from = "TOR_CONTROL_SOCKET", default = "")]
    tor_control_socket: EnvEndpoint,

    #[envconfig(from = "TOR_BINARY", default = "tor")]
    tor_binary: String,

    #[envconfig(from = "DISPLAY", default = ":99")]
    display: String,

    #[envconfig(from = "XVFB_BINARY", default = "Xvfb")]
    xvfb_binary: String,

    #[envconfig(from = "XVFB_SCREEN", default = "1920x1080x24")]
    xvfb_screen: String,

    #[envconfig(from = "BOOTGATE_READINESS_TIMEOUT_SECS", default = "60")]
    readiness_timeout: EnvSecsDuration,

    #[envconfig(from = "BOOTGATE_POLL_INTERVAL_MS", default = "1000")]
    poll_interval: EnvMsDuration,

    #[envconfig(from = "BOOTGATE_PROGRESS_EVERY", default = "10")]
    progress_every: NonZeroU32,

    #[envconfig(from = "BOOTGATE_PROBE_TIMEOUT_MS", default = "1000")]
    probe_timeout: EnvMsDuration,

    #[envconfig(from = "BOOTGATE_WORKER_COMMAND", default = "python github_generator.py")]
    worker_command: CommandLine,

    #[envconfig(from = "BOOTGATE_LOG_FILTER", default = "info")]
    log_filter: String,

    #[envconfig(from = "BOOTGATE_LOG_FORMAT", default = "compact")]
    log_format: LogFormat,
}

impl Config {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a variable fails to parse or a value is
    /// outside its permitted range.
    pub fn load() -> Result<Self, ConfigError> {
        Self::init_from_env()
            .map_err(ConfigError::Environment)?
            .validated()
    }

    /// Reads the configuration from an explicit variable map.
    ///
    /// Variables absent from `vars` take their built-in defaults, exactly as
    /// [`Config::load`] does for unset environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] under the same conditions as [`Config::load`].
    pub fn from_env_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::init_from_hashmap(vars)
            .map_err(ConfigError::Environment)?
            .validated()
    }

    fn validated(self) -> Result<Self, ConfigError> {
        if self.poll_interval.0.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.probe_timeout.0.is_zero() {
            return Err(ConfigError::ZeroProbeTimeout);
        }
        Ok(self)
    }

    /// Replaces the worker command, e.g. with positional arguments supplied
    /// by the container runtime.
    #[must_use]
    pub fn with_worker_command(mut self, command: Vec<String>) -> Self {
        let mut words = command.into_iter();
        if let Some(program) = words.next() {
            self.worker_command = CommandLine {
                program,
                args: words.collect(),
            };
        }
        self
    }

    /// SOCKS port the anonymising daemon is asked to listen on.
    #[must_use]
    pub const fn tor_port(&self) -> u16 {
        self.tor_port
    }

    /// Declared control port of the anonymising daemon.
    #[must_use]
    pub const fn tor_control_port(&self) -> u16 {
        self.tor_control_port
    }

    /// Endpoint probed to decide whether the anonymising daemon is ready.
    ///
    /// A non-blank `TOR_CONTROL_SOCKET` wins; otherwise the endpoint is the
    /// declared control port on `TOR_CONTROL_HOST`.
    #[must_use]
    pub fn control_endpoint(&self) -> ControlEndpoint {
        self.tor_control_socket.0.clone().unwrap_or_else(|| {
            ControlEndpoint::tcp(self.tor_control_host.clone(), self.tor_control_port)
        })
    }

    /// Executable launched as the anonymising daemon.
    #[must_use]
    pub fn tor_binary(&self) -> &str {
        &self.tor_binary
    }

    /// Virtual display identifier, e.g. `:99`.
    #[must_use]
    pub fn display(&self) -> &str {
        &self.display
    }

    /// Executable launched as the virtual display server.
    #[must_use]
    pub fn xvfb_binary(&self) -> &str {
        &self.xvfb_binary
    }

    /// Geometry of the virtual display's first screen.
    #[must_use]
    pub fn xvfb_screen(&self) -> &str {
        &self.xvfb_screen
    }

    /// Maximum cumulative wait for a gated subsystem.
    #[must_use]
    pub const fn readiness_timeout(&self) -> Duration {
        self.readiness_timeout.0
    }

    /// Delay between two readiness attempts. Never zero.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval.0
    }

    /// Number of poll intervals between two progress lines.
    #[must_use]
    pub const fn progress_every(&self) -> NonZeroU32 {
        self.progress_every
    }

    /// Connect timeout for a single readiness attempt.
    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        self.probe_timeout.0
    }

    /// Program executed as the primary worker.
    #[must_use]
    pub fn worker_program(&self) -> &str {
        &self.worker_command.program
    }

    /// Arguments passed to the worker program.
    #[must_use]
    pub fn worker_args(&self) -> &[String] {
        &self.worker_command.args
    }

    /// Log filter expression understood by `tracing_subscriber::EnvFilter`.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

/// Errors raised while resolving the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable could not be parsed into its expected type.
    #[error("invalid container environment: {0}")]
    Environment(#[source] envconfig::Error),
    /// The poll interval must be strictly positive.
    #[error("BOOTGATE_POLL_INTERVAL_MS must be greater than zero")]
    ZeroPollInterval,
    /// The per-attempt connect timeout must be strictly positive.
    #[error("BOOTGATE_PROBE_TIMEOUT_MS must be greater than zero")]
    ZeroProbeTimeout,
}

/// Duration parsed from a whole number of seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvSecsDuration(pub Duration);

/// Duration parsed from a whole number of milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvMsDuration(pub Duration);

/// Error returned when a duration variable is not a whole number.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expected a whole number, got '{0}'")]
pub struct ParseEnvDurationError(String);

impl FromStr for EnvSecsDuration {
    type Err = ParseEnvDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let secs = s
            .trim()
            .parse::<u64>()
            .map_err(|_| ParseEnvDurationError(s.to_owned()))?;
        Ok(Self(Duration::from_secs(secs)))
    }
}

impl FromStr for EnvMsDuration {
    type Err = ParseEnvDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s
            .trim()
            .parse::<u64>()
            .map_err(|_| ParseEnvDurationError(s.to_owned()))?;
        Ok(Self(Duration::from_millis(ms)))
    }
}

/// Optional control endpoint where a blank value means "not set".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvEndpoint(pub Option<ControlEndpoint>);

impl FromStr for EnvEndpoint {
    type Err = EndpointParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(Self(None));
        }
        trimmed.parse().map(|endpoint| Self(Some(endpoint)))
    }
}

/// Whitespace-separated command line: a program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
}

/// Error returned when a command line contains no program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("command line must name a program")]
pub struct EmptyCommandLineError;

impl FromStr for CommandLine {
    type Err = EmptyCommandLineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace().map(str::to_owned);
        let program = words.next().ok_or(EmptyCommandLineError)?;
        Ok(Self {
            program,
            args: words.collect(),
        })
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.program)?;
        for arg in &self.args {
            write!(formatter, " {arg}")?;
        }
        Ok(())
    }
}
