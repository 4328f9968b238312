//! Test doubles for the sequencer's collaborators.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::process::ExitCode;
use std::rc::Rc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use bootgate_config::Config;

use crate::descriptor::{BootPlan, CheckFactory, ReadinessGate, SubsystemDescriptor};
use crate::handoff::{Handoff, HandoffError};
use crate::launcher::{LaunchCommand, LaunchError, Launcher, ProcessHandle};
use crate::probe::{Clock, ProbeProgress, ReadinessCheck};
use crate::reporter::BootReporter;
use crate::sequencer::BootstrapError;

/// Clock whose time only moves when the code under test sleeps.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Rc::new(Cell::new(Duration::ZERO)),
        }
    }

    /// Virtual time elapsed since construction.
    pub fn elapsed(&self) -> Duration {
        self.offset.get()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.offset.get()
    }

    fn sleep(&self, duration: Duration) {
        self.offset.set(self.offset.get() + duration);
    }
}

/// Check that passes once the manual clock reaches `ready_at`.
///
/// Each attempt advances the clock by `cost`, or by the attempt's budget when
/// that is shorter, in which case the attempt gives up as a connect would.
#[derive(Debug, Clone)]
pub struct ScriptedCheck {
    clock: ManualClock,
    ready_at: Option<Duration>,
    cost: Duration,
    attempts: Rc<Cell<u32>>,
}

impl ScriptedCheck {
    pub fn new(clock: ManualClock, ready_at: Option<Duration>) -> Self {
        Self {
            clock,
            ready_at,
            cost: Duration::ZERO,
            attempts: Rc::new(Cell::new(0)),
        }
    }

    /// Makes every attempt take `cost` of clock time.
    pub fn with_cost(mut self, cost: Duration) -> Self {
        self.cost = cost;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.get()
    }
}

impl ReadinessCheck for ScriptedCheck {
    fn check(&self, budget: Duration) -> io::Result<()> {
        self.attempts.set(self.attempts.get() + 1);
        let started = self.clock.elapsed();
        self.clock.sleep(self.cost.min(budget));
        if self.cost > budget {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out"));
        }
        match self.ready_at {
            Some(ready_at) if started >= ready_at => Ok(()),
            _ => Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "control port closed",
            )),
        }
    }
}

/// Factory handing out [`ScriptedCheck`]s and counting how many were built.
#[derive(Debug, Clone)]
pub struct ScriptedChecks {
    check: ScriptedCheck,
    built: Rc<Cell<u32>>,
}

impl ScriptedChecks {
    pub fn new(clock: ManualClock, ready_at: Option<Duration>) -> Self {
        Self {
            check: ScriptedCheck::new(clock, ready_at),
            built: Rc::new(Cell::new(0)),
        }
    }

    /// Makes every attempt of the handed-out check take `cost`.
    pub fn with_cost(mut self, cost: Duration) -> Self {
        self.check = self.check.with_cost(cost);
        self
    }

    pub fn built(&self) -> u32 {
        self.built.get()
    }

    pub fn attempts(&self) -> u32 {
        self.check.attempts()
    }
}

impl CheckFactory for ScriptedChecks {
    type Check = ScriptedCheck;

    fn check_for(&self, _gate: &ReadinessGate) -> ScriptedCheck {
        self.built.set(self.built.get() + 1);
        self.check.clone()
    }
}

/// Launcher that records launch attempts and fails for selected programs.
#[derive(Debug, Clone, Default)]
pub struct RecordingLauncher {
    attempts: Rc<RefCell<Vec<String>>>,
    missing: Rc<RefCell<Vec<String>>>,
}

impl RecordingLauncher {
    /// Makes launches of subsystem `name` fail as if the executable were absent.
    pub fn fail_for(&self, name: &str) {
        self.missing.borrow_mut().push(name.to_owned());
    }

    /// Names of subsystems whose launch was attempted, in order.
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.borrow().clone()
    }
}

impl Launcher for RecordingLauncher {
    fn launch(&self, name: &str, command: &LaunchCommand) -> Result<ProcessHandle, LaunchError> {
        let mut attempts = self.attempts.borrow_mut();
        attempts.push(name.to_owned());
        if self.missing.borrow().iter().any(|missing| missing == name) {
            return Err(LaunchError {
                name: name.to_owned(),
                program: command.program().to_owned(),
                source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
            });
        }
        let pid = 1000 + u32::try_from(attempts.len()).expect("few launches");
        Ok(ProcessHandle {
            name: name.to_owned(),
            pid,
        })
    }
}

/// Handoff that records the worker instead of replacing the process.
#[derive(Debug, Clone, Default)]
pub struct RecordingHandoff {
    workers: Rc<RefCell<Vec<LaunchCommand>>>,
}

impl RecordingHandoff {
    pub fn workers(&self) -> Vec<LaunchCommand> {
        self.workers.borrow().clone()
    }
}

impl Handoff for RecordingHandoff {
    fn hand_off(&self, worker: &LaunchCommand) -> Result<ExitCode, HandoffError> {
        self.workers.borrow_mut().push(worker.clone());
        Ok(ExitCode::SUCCESS)
    }
}

/// Boot events tracked during tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootEvent {
    SequenceStarting,
    Launching(String),
    Launched(String),
    LaunchFailedNonfatal(String),
    Progress { name: String, elapsed: Duration },
    Ready {
        name: String,
        attempts: u32,
        waited: Duration,
    },
    Failed(String),
    HandoffStarting(String),
}

/// Records boot events for assertions.
#[derive(Debug, Default)]
pub struct RecordingBootReporter {
    events: Mutex<Vec<BootEvent>>,
}

impl RecordingBootReporter {
    pub fn events(&self) -> Vec<BootEvent> {
        self.events
            .lock()
            .expect("boot reporter mutex poisoned")
            .clone()
    }

    /// Elapsed times at which progress was reported.
    pub fn progress_marks(&self) -> Vec<Duration> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                BootEvent::Progress { elapsed, .. } => Some(elapsed),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: BootEvent) {
        self.events
            .lock()
            .expect("boot reporter mutex poisoned")
            .push(event);
    }
}

impl BootReporter for RecordingBootReporter {
    fn sequence_starting(&self, _config: &Config) {
        self.record(BootEvent::SequenceStarting);
    }

    fn subsystem_launching(&self, descriptor: &SubsystemDescriptor) {
        self.record(BootEvent::Launching(descriptor.name().to_owned()));
    }

    fn subsystem_launched(&self, handle: &ProcessHandle) {
        self.record(BootEvent::Launched(handle.name.clone()));
    }

    fn launch_failed_nonfatal(&self, error: &LaunchError) {
        self.record(BootEvent::LaunchFailedNonfatal(error.name.clone()));
    }

    fn readiness_progress(&self, name: &str, progress: &ProbeProgress) {
        self.record(BootEvent::Progress {
            name: name.to_owned(),
            elapsed: progress.elapsed,
        });
    }

    fn subsystem_ready(&self, name: &str, attempts: u32, waited: Duration) {
        self.record(BootEvent::Ready {
            name: name.to_owned(),
            attempts,
            waited,
        });
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(BootEvent::Failed(error.to_string()));
    }

    fn handoff_starting(&self, worker: &LaunchCommand) {
        self.record(BootEvent::HandoffStarting(worker.to_string()));
    }
}

/// Builds a configuration from explicit variables on top of the defaults.
pub fn config_from(pairs: &[(&str, &str)]) -> Config {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
        .collect();
    Config::from_env_map(&vars).expect("test configuration loads")
}

/// Container plan with the given deadline and poll interval.
pub fn plan_with_timing(deadline_secs: u64, interval_ms: u64) -> BootPlan {
    let deadline = deadline_secs.to_string();
    let interval = interval_ms.to_string();
    BootPlan::from_config(&config_from(&[
        ("BOOTGATE_READINESS_TIMEOUT_SECS", deadline.as_str()),
        ("BOOTGATE_POLL_INTERVAL_MS", interval.as_str()),
    ]))
}
