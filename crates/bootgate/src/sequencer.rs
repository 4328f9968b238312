//! The bootstrap sequencer.
//!
//! Subsystems are launched strictly in plan order. After launching a gated
//! subsystem the sequencer blocks until its readiness check passes, and any
//! fatal failure stops the sequence before a later subsystem is touched. The
//! worker is handed control only once every gated subsystem is ready.

use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use bootgate_config::ControlEndpoint;
use thiserror::Error;

use crate::descriptor::{BootPlan, CheckFactory, ReadinessGate, SubsystemDescriptor};
use crate::handoff::{Handoff, HandoffError};
use crate::launcher::{LaunchError, Launcher};
use crate::probe::{Clock, ReadinessOutcome, await_ready};
use crate::reporter::BootReporter;

/// Fatal outcomes of the boot sequence.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// A gated subsystem could not be launched.
    #[error(transparent)]
    Launch(#[from] LaunchError),
    /// A gated subsystem never became reachable.
    #[error(
        "readiness timeout: {name} not reachable at {endpoint} after {}s/{}s ({attempts} attempts)",
        .waited.as_secs(),
        .deadline.as_secs()
    )]
    ReadinessTimeout {
        /// Descriptor name.
        name: String,
        /// Endpoint that was probed.
        endpoint: ControlEndpoint,
        /// Time spent waiting.
        waited: Duration,
        /// Maximum permitted wait.
        deadline: Duration,
        /// Attempts made.
        attempts: u32,
        /// Error reported by the final attempt.
        #[source]
        last_failure: Option<io::Error>,
    },
    /// Control could not be handed to the worker.
    #[error("handoff failed: {0}")]
    Handoff(#[source] HandoffError),
}

/// Drives a [`BootPlan`] using the supplied collaborators.
pub struct Sequencer<L, F, C, H> {
    launcher: L,
    checks: F,
    clock: C,
    handoff: H,
    reporter: Arc<dyn BootReporter>,
}

impl<L, F, C, H> Sequencer<L, F, C, H>
where
    L: Launcher,
    F: CheckFactory,
    C: Clock,
    H: Handoff,
{
    /// Assembles a sequencer.
    #[must_use]
    pub const fn new(
        launcher: L,
        checks: F,
        clock: C,
        handoff: H,
        reporter: Arc<dyn BootReporter>,
    ) -> Self {
        Self {
            launcher,
            checks,
            clock,
            handoff,
            reporter,
        }
    }

    /// Launches every subsystem in order, waiting on gated ones.
    ///
    /// Returns `Ok(())` only when every gated subsystem reported ready.
    /// Failures of ungated subsystems are reported and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Launch`] when a gated subsystem cannot be
    /// spawned and [`BootstrapError::ReadinessTimeout`] when one never
    /// becomes reachable. No later subsystem is launched in either case.
    pub fn boot(&self, plan: &BootPlan) -> Result<(), BootstrapError> {
        for descriptor in plan.subsystems() {
            if let Err(error) = self.start(descriptor) {
                self.reporter.bootstrap_failed(&error);
                return Err(error);
            }
        }
        Ok(())
    }

    /// Boots the plan and hands control to its worker.
    ///
    /// With the production [`crate::ExecHandoff`] on Unix this only returns on
    /// failure; otherwise the worker's exit status is returned.
    ///
    /// # Errors
    ///
    /// Returns any [`BootstrapError`] raised by [`Sequencer::boot`], or
    /// [`BootstrapError::Handoff`] when the worker cannot be started.
    pub fn run(&self, plan: &BootPlan) -> Result<ExitCode, BootstrapError> {
        self.boot(plan)?;
        self.reporter.handoff_starting(plan.worker());
        self.handoff.hand_off(plan.worker()).map_err(|source| {
            let error = BootstrapError::Handoff(source);
            self.reporter.bootstrap_failed(&error);
            error
        })
    }

    fn start(&self, descriptor: &SubsystemDescriptor) -> Result<(), BootstrapError> {
        self.reporter.subsystem_launching(descriptor);
        match self.launcher.launch(descriptor.name(), descriptor.command()) {
            Ok(handle) => self.reporter.subsystem_launched(&handle),
            Err(error) if !descriptor.is_gated() => {
                self.reporter.launch_failed_nonfatal(&error);
                return Ok(());
            }
            Err(error) => return Err(error.into()),
        }
        match descriptor.readiness() {
            Some(gate) => self.await_gate(descriptor.name(), gate),
            None => Ok(()),
        }
    }

    fn await_gate(&self, name: &str, gate: &ReadinessGate) -> Result<(), BootstrapError> {
        let check = self.checks.check_for(gate);
        let outcome = await_ready(&check, gate.policy(), &self.clock, |progress| {
            self.reporter.readiness_progress(name, &progress);
        });
        match outcome {
            ReadinessOutcome::Ready { attempts, waited } => {
                self.reporter.subsystem_ready(name, attempts, waited);
                Ok(())
            }
            ReadinessOutcome::TimedOut {
                attempts,
                waited,
                deadline,
                last_failure,
            } => Err(BootstrapError::ReadinessTimeout {
                name: name.to_owned(),
                endpoint: gate.endpoint().clone(),
                waited,
                deadline,
                attempts,
                last_failure,
            }),
        }
    }
}
