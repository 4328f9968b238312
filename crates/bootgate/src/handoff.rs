//! Irreversible transfer of control to the worker process.
//!
//! On Unix the supervisor's process image is replaced with the worker's, so the
//! worker inherits the supervisor's PID (PID 1 inside a container) and receives
//! the container runtime's signals directly. A successful `exec` never
//! returns. Elsewhere the worker runs as a child and its exit status becomes
//! the supervisor's.

use std::io;
use std::process::{ExitCode, Stdio};

use thiserror::Error;

use crate::launcher::LaunchCommand;

/// Errors raised when control cannot be handed to the worker.
#[derive(Debug, Error)]
pub enum HandoffError {
    /// Replacing the process image failed.
    #[error("failed to exec worker '{program}': {source}")]
    Exec {
        /// Worker program.
        program: String,
        /// Error returned by `exec`.
        #[source]
        source: io::Error,
    },
    /// Spawning the worker as a child failed.
    #[cfg(not(unix))]
    #[error("failed to spawn worker '{program}': {source}")]
    Spawn {
        /// Worker program.
        program: String,
        /// Spawn error.
        #[source]
        source: io::Error,
    },
    /// Waiting for the worker child failed.
    #[cfg(not(unix))]
    #[error("failed to wait for worker '{program}': {source}")]
    Wait {
        /// Worker program.
        program: String,
        /// Wait error.
        #[source]
        source: io::Error,
    },
}

/// Hands control to the worker.
pub trait Handoff {
    /// Runs `worker` in place of the supervisor.
    ///
    /// Implementations that replace the process image only return on failure.
    /// The returned [`ExitCode`] is the worker's own exit status.
    ///
    /// # Errors
    ///
    /// Returns [`HandoffError`] when the worker cannot be started.
    fn hand_off(&self, worker: &LaunchCommand) -> Result<ExitCode, HandoffError>;
}

/// Production handoff: `exec` on Unix, spawn-and-wait elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExecHandoff;

impl Handoff for ExecHandoff {
    #[cfg(unix)]
    fn hand_off(&self, worker: &LaunchCommand) -> Result<ExitCode, HandoffError> {
        use std::os::unix::process::CommandExt;

        let source = worker.to_command().stdin(Stdio::inherit()).exec();
        Err(HandoffError::Exec {
            program: worker.program().to_owned(),
            source,
        })
    }

    #[cfg(not(unix))]
    fn hand_off(&self, worker: &LaunchCommand) -> Result<ExitCode, HandoffError> {
        let program = worker.program().to_owned();
        let mut child = match worker.to_command().stdin(Stdio::inherit()).spawn() {
            Ok(child) => child,
            Err(source) => return Err(HandoffError::Spawn { program, source }),
        };
        let status = child
            .wait()
            .map_err(|source| HandoffError::Wait { program, source })?;
        Ok(status
            .code()
            .and_then(|code| u8::try_from(code).ok())
            .map_or(ExitCode::FAILURE, ExitCode::from))
    }
}
