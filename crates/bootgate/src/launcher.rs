//! Subsystem process spawning.
//!
//! Launching is thin: the command is spawned with the container's environment
//! plus any explicit overrides, and control returns as soon as the OS reports a
//! new process. The supervisor never waits on, reaps,
//! or restarts what it launches; the returned [`ProcessHandle`] exists only so
//! the launch can be identified in logs.

use std::fmt;
use std::io;
use std::process::{Command, Stdio};

use thiserror::Error;

/// Program, arguments, and environment overrides for one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl LaunchCommand {
    /// Builds a command with no arguments or environment overrides.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Appends arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds an environment override on top of the inherited environment.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Executable name or path.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments passed to the program.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Environment overrides applied on top of the inherited environment.
    #[must_use]
    pub fn env_overrides(&self) -> &[(String, String)] {
        &self.env
    }

    /// Converts the value into a [`Command`] wired to the container's stdio.
    pub(crate) fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.env.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        command
    }
}

impl fmt::Display for LaunchCommand {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.program)?;
        for arg in &self.args {
            write!(formatter, " {arg}")?;
        }
        Ok(())
    }
}

/// Identifies a launched subsystem process. Used for logging only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    /// Descriptor name of the subsystem.
    pub name: String,
    /// OS process identifier.
    pub pid: u32,
}

/// Raised when a subsystem executable cannot be found or spawned.
#[derive(Debug, Error)]
#[error("launch failure: {name} ('{program}'): {source}")]
pub struct LaunchError {
    /// Descriptor name of the subsystem.
    pub name: String,
    /// Program that failed to start.
    pub program: String,
    /// Underlying spawn error.
    #[source]
    pub source: io::Error,
}

/// Starts subsystem processes without waiting for them to initialise.
pub trait Launcher {
    /// Spawns `command` as an independent background process.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError`] when the executable is missing or the OS
    /// refuses to create the process. The launch is never retried.
    fn launch(&self, name: &str, command: &LaunchCommand) -> Result<ProcessHandle, LaunchError>;
}

/// Launcher backed by [`std::process::Command`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    fn launch(&self, name: &str, command: &LaunchCommand) -> Result<ProcessHandle, LaunchError> {
        let child = command
            .to_command()
            .spawn()
            .map_err(|source| LaunchError {
                name: name.to_owned(),
                program: command.program().to_owned(),
                source,
            })?;
        // Dropping the `Child` leaves the process running; it is not reaped.
        Ok(ProcessHandle {
            name: name.to_owned(),
            pid: child.id(),
        })
    }
}
