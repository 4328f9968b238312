//! Container bootstrap supervisor.
//!
//! `bootgate` is the entry point of a multi-process container. It launches the
//! anonymising network daemon, blocks until the daemon's control endpoint
//! accepts connections, starts the virtual display server on a best-effort
//! basis, and finally replaces itself with the long-running worker process.
//!
//! The sequence is fail-fast. A gated subsystem that cannot be spawned or that
//! misses its readiness deadline aborts the container with exit status `1`
//! before any later subsystem starts, and the worker is never launched. There
//! is no supervision after handoff: once the worker takes over, nothing of the
//! supervisor remains.
//!
//! Configuration is resolved once from the environment via
//! [`bootgate_config::Config`] and passed by reference to every stage. Each
//! stage reports through a [`BootReporter`] so operators can tell a slow start
//! from a stuck one.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use bootgate_config::Config;

mod descriptor;
mod errors;
mod handoff;
mod launcher;
mod probe;
mod reporter;
mod sequencer;
mod telemetry;

pub use descriptor::{
    BootPlan, CheckFactory, ReadinessGate, SocketCheckFactory, SubsystemDescriptor, TOR, XVFB,
};
use errors::AppError;
pub use handoff::{ExecHandoff, Handoff, HandoffError};
pub use launcher::{LaunchCommand, LaunchError, Launcher, ProcessHandle, SystemLauncher};
pub use probe::{
    Clock, ProbeEvent, ProbePhase, ProbePolicy, ProbeProgress, ReadinessCheck, ReadinessOutcome,
    SocketCheck, SystemClock, await_ready,
};
pub use reporter::{BootReporter, StructuredBootReporter};
pub use sequencer::{BootstrapError, Sequencer};
pub use telemetry::{TelemetryError, TelemetryHandle};

/// Runs the supervisor with the process arguments and environment.
///
/// Arguments after the program name, when present, replace the configured
/// worker command. Fatal errors are written to `stderr` and mapped to
/// [`ExitCode::FAILURE`]. On Unix a successful run never returns because the
/// worker replaces the process image.
#[must_use]
pub fn run<I, E>(args: I, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    E: Write,
{
    match bootstrap(args) {
        Ok(code) => code,
        Err(error) => {
            let _ = writeln!(stderr, "bootgate: {error}");
            ExitCode::FAILURE
        }
    }
}

fn bootstrap<I>(args: I) -> Result<ExitCode, AppError>
where
    I: IntoIterator<Item = OsString>,
{
    let worker_override = worker_arguments(args)?;
    let config = Config::load()?.with_worker_command(worker_override);
    telemetry::initialise(&config)?;

    let reporter: Arc<dyn BootReporter> = Arc::new(StructuredBootReporter::new());
    reporter.sequence_starting(&config);
    let plan = BootPlan::from_config(&config);
    let sequencer = Sequencer::new(
        SystemLauncher,
        SocketCheckFactory,
        SystemClock,
        ExecHandoff,
        reporter,
    );
    Ok(sequencer.run(&plan)?)
}

fn worker_arguments<I>(args: I) -> Result<Vec<String>, AppError>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .skip(1)
        .map(|arg| arg.into_string().map_err(AppError::NonUtf8Argument))
        .collect()
}

#[cfg(test)]
mod tests;
