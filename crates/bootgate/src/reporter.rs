//! Structured reporting for boot sequence events.

use std::sync::Arc;
use std::time::Duration;

use bootgate_config::Config;

use crate::descriptor::SubsystemDescriptor;
use crate::launcher::{LaunchCommand, LaunchError, ProcessHandle};
use crate::probe::ProbeProgress;
use crate::sequencer::BootstrapError;

const BOOT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::boot");

/// Observer trait used to surface boot sequence events to telemetry sinks.
pub trait BootReporter: Send + Sync {
    /// Invoked once, before the first subsystem is launched.
    fn sequence_starting(&self, config: &Config);

    /// Invoked before a subsystem is launched.
    fn subsystem_launching(&self, descriptor: &SubsystemDescriptor);

    /// Invoked after a subsystem process has been spawned.
    fn subsystem_launched(&self, handle: &ProcessHandle);

    /// Invoked when an ungated subsystem fails to launch. The sequence
    /// continues.
    fn launch_failed_nonfatal(&self, error: &LaunchError);

    /// Invoked periodically while a gated subsystem is not yet ready.
    fn readiness_progress(&self, name: &str, progress: &ProbeProgress);

    /// Invoked when a gated subsystem passes its readiness check.
    fn subsystem_ready(&self, name: &str, attempts: u32, waited: Duration);

    /// Invoked when the sequence aborts.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked immediately before control passes to the worker.
    fn handoff_starting(&self, worker: &LaunchCommand);
}

impl<T> BootReporter for Arc<T>
where
    T: BootReporter + ?Sized,
{
    fn sequence_starting(&self, config: &Config) {
        (**self).sequence_starting(config);
    }

    fn subsystem_launching(&self, descriptor: &SubsystemDescriptor) {
        (**self).subsystem_launching(descriptor);
    }

    fn subsystem_launched(&self, handle: &ProcessHandle) {
        (**self).subsystem_launched(handle);
    }

    fn launch_failed_nonfatal(&self, error: &LaunchError) {
        (**self).launch_failed_nonfatal(error);
    }

    fn readiness_progress(&self, name: &str, progress: &ProbeProgress) {
        (**self).readiness_progress(name, progress);
    }

    fn subsystem_ready(&self, name: &str, attempts: u32, waited: Duration) {
        (**self).subsystem_ready(name, attempts, waited);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn handoff_starting(&self, worker: &LaunchCommand) {
        (**self).handoff_starting(worker);
    }
}

/// Default reporter that records boot events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredBootReporter;

impl StructuredBootReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl BootReporter for StructuredBootReporter {
    fn sequence_starting(&self, config: &Config) {
        tracing::info!(
            target: BOOT_TARGET,
            event = "sequence_starting",
            tor_port = config.tor_port(),
            tor_control_port = config.tor_control_port(),
            control_endpoint = %config.control_endpoint(),
            display = %config.display(),
            "starting container boot sequence"
        );
    }

    fn subsystem_launching(&self, descriptor: &SubsystemDescriptor) {
        tracing::info!(
            target: BOOT_TARGET,
            event = "subsystem_launching",
            subsystem = %descriptor.name(),
            command = %descriptor.command(),
            gated = descriptor.is_gated(),
            "launching subsystem"
        );
    }

    fn subsystem_launched(&self, handle: &ProcessHandle) {
        tracing::info!(
            target: BOOT_TARGET,
            event = "subsystem_launched",
            subsystem = %handle.name,
            pid = handle.pid,
            "subsystem launched"
        );
    }

    fn launch_failed_nonfatal(&self, error: &LaunchError) {
        tracing::warn!(
            target: BOOT_TARGET,
            event = "launch_failed_nonfatal",
            subsystem = %error.name,
            program = %error.program,
            error = %error.source,
            "best-effort subsystem failed to launch; continuing"
        );
    }

    fn readiness_progress(&self, name: &str, progress: &ProbeProgress) {
        tracing::info!(
            target: BOOT_TARGET,
            event = "readiness_progress",
            subsystem = %name,
            elapsed_secs = progress.elapsed.as_secs(),
            deadline_secs = progress.deadline.as_secs(),
            attempts = progress.attempts,
            "still waiting for {name} ({progress})"
        );
    }

    fn subsystem_ready(&self, name: &str, attempts: u32, waited: Duration) {
        tracing::info!(
            target: BOOT_TARGET,
            event = "subsystem_ready",
            subsystem = %name,
            attempts,
            waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
            "subsystem ready"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: BOOT_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "container boot sequence failed"
        );
    }

    fn handoff_starting(&self, worker: &LaunchCommand) {
        tracing::info!(
            target: BOOT_TARGET,
            event = "handoff_starting",
            worker = %worker,
            "handing control to worker"
        );
    }
}
