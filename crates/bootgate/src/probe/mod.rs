//! Readiness polling for gated subsystems.
//!
//! The prober answers one question: did a subsystem's readiness check pass
//! before its deadline? Attempts run on a fixed grid of poll ticks measured
//! from the start of the wait, so a slow attempt shortens the following sleep
//! instead of stretching the schedule. An instant check that passes on
//! attempt `k` has waited exactly `(k - 1)` intervals. A check that never
//! passes times out on the first attempt at or after the deadline; every
//! attempt is given a time budget so that this always happens less than one
//! interval past it.
//!
//! The prober never terminates anything itself. A timeout is returned as a
//! [`ReadinessOutcome::TimedOut`] value and the sequencer decides what to do
//! with it.
//!
//! [`Clock`] abstracts time so the polling arithmetic can be driven by tests,
//! and [`SocketCheck`] is the production check for control endpoint
//! reachability.

use std::fmt;
use std::io;
use std::num::NonZeroU32;
use std::time::Duration;

mod clock;
mod socket;

pub use clock::{Clock, SystemClock};
pub use socket::SocketCheck;

/// A side-effect free readiness probe.
///
/// `Ok(())` means the subsystem is usable. Any error means "not yet" and is
/// kept as the probe's last failure for diagnostics.
pub trait ReadinessCheck {
    /// Performs one independent attempt that must give up within `budget`.
    ///
    /// A zero `budget` means no time is left; implementations should fail
    /// without blocking.
    ///
    /// # Errors
    ///
    /// Returns the reason the subsystem is not reachable yet.
    fn check(&self, budget: Duration) -> io::Result<()>;
}

impl<F> ReadinessCheck for F
where
    F: Fn(Duration) -> io::Result<()>,
{
    fn check(&self, budget: Duration) -> io::Result<()> {
        self(budget)
    }
}

/// Timing parameters for one readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePolicy {
    /// Maximum cumulative wait before the subsystem is declared unreachable.
    pub deadline: Duration,
    /// Delay between two attempts.
    pub poll_interval: Duration,
    /// A progress line is reported every this many poll intervals.
    pub progress_every: NonZeroU32,
}

impl ProbePolicy {
    /// Time an attempt starting `started` into the wait may take.
    ///
    /// Attempts before the deadline must finish by it. The attempt at or after
    /// the deadline must finish strictly before one further interval elapses.
    #[must_use]
    pub fn attempt_budget(&self, started: Duration) -> Duration {
        if started < self.deadline {
            self.deadline.saturating_sub(started)
        } else {
            self.deadline
                .saturating_add(self.poll_interval)
                .saturating_sub(started)
                .saturating_sub(Duration::from_nanos(1))
        }
    }

    /// Offset of the first poll tick strictly after `elapsed`.
    #[must_use]
    pub fn next_tick(&self, elapsed: Duration) -> Duration {
        let interval = self.poll_interval.as_nanos();
        let ticks = elapsed.as_nanos().checked_div(interval).unwrap_or_default();
        let next = ticks.saturating_add(1).saturating_mul(interval);
        u64::try_from(next).map_or(Duration::MAX, Duration::from_nanos)
    }

    /// Number of whole progress spans contained in `elapsed`.
    fn progress_marks(&self, elapsed: Duration) -> u128 {
        let span = self
            .poll_interval
            .as_nanos()
            .saturating_mul(u128::from(self.progress_every.get()));
        elapsed.as_nanos().checked_div(span).unwrap_or_default()
    }
}

/// Phases of a readiness wait.
///
/// `Ready` and `TimedOut` are terminal: [`ProbePhase::on`] returns them
/// unchanged for every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbePhase {
    /// No attempt has been made yet.
    NotStarted,
    /// At least one attempt failed and time remains.
    Polling,
    /// An attempt passed.
    Ready,
    /// The deadline elapsed without a passing attempt.
    TimedOut,
}

/// Inputs that drive [`ProbePhase`] transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeEvent {
    /// The first attempt is about to run.
    Started,
    /// An attempt passed.
    CheckPassed,
    /// An attempt failed; `deadline_reached` records whether elapsed time is
    /// at or beyond the deadline.
    CheckFailed {
        /// Whether the deadline has been reached.
        deadline_reached: bool,
    },
}

impl ProbePhase {
    /// Applies `event`, returning the next phase.
    #[must_use]
    pub const fn on(self, event: ProbeEvent) -> Self {
        match (self, event) {
            (Self::NotStarted, ProbeEvent::Started) => Self::Polling,
            (Self::Polling, ProbeEvent::CheckPassed) => Self::Ready,
            (Self::Polling, ProbeEvent::CheckFailed { deadline_reached }) => {
                if deadline_reached {
                    Self::TimedOut
                } else {
                    Self::Polling
                }
            }
            (phase, _) => phase,
        }
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::TimedOut)
    }
}

/// Mutable bookkeeping for one readiness wait. Discarded once terminal.
#[derive(Debug)]
struct ProbeState {
    phase: ProbePhase,
    attempts: u32,
    marks_reported: u128,
    elapsed: Duration,
    last_failure: Option<io::Error>,
}

impl ProbeState {
    const fn new() -> Self {
        Self {
            phase: ProbePhase::NotStarted,
            attempts: 0,
            marks_reported: 0,
            elapsed: Duration::ZERO,
            last_failure: None,
        }
    }

    fn apply(&mut self, event: ProbeEvent) {
        self.phase = self.phase.on(event);
    }
}

/// Snapshot reported while a readiness wait is still in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeProgress {
    /// Attempts made so far.
    pub attempts: u32,
    /// Time spent waiting so far.
    pub elapsed: Duration,
    /// Maximum wait.
    pub deadline: Duration,
}

impl fmt::Display for ProbeProgress {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{}s/{}s elapsed, {} attempts",
            self.elapsed.as_secs(),
            self.deadline.as_secs(),
            self.attempts
        )
    }
}

/// Terminal result of a readiness wait.
#[derive(Debug)]
pub enum ReadinessOutcome {
    /// The check passed.
    Ready {
        /// Attempts made, including the passing one.
        attempts: u32,
        /// Time spent waiting before the passing attempt.
        waited: Duration,
    },
    /// The deadline elapsed first.
    TimedOut {
        /// Attempts made.
        attempts: u32,
        /// Time spent waiting.
        waited: Duration,
        /// Maximum wait that was exceeded.
        deadline: Duration,
        /// Error reported by the final attempt.
        last_failure: Option<io::Error>,
    },
}

impl ReadinessOutcome {
    /// Whether the check passed.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// Polls `check` until it passes or `policy.deadline` elapses.
///
/// `on_progress` receives a snapshot after the first failed attempt to end
/// past each multiple of `policy.progress_every` poll intervals, provided the
/// deadline has not been reached at that point. Blocks the calling thread;
/// already launched processes keep running independently.
pub fn await_ready<K, C, P>(
    check: &K,
    policy: ProbePolicy,
    clock: &C,
    mut on_progress: P,
) -> ReadinessOutcome
where
    K: ReadinessCheck + ?Sized,
    C: Clock + ?Sized,
    P: FnMut(ProbeProgress),
{
    let started_at = clock.now();
    let mut state = ProbeState::new();
    state.apply(ProbeEvent::Started);
    loop {
        state.attempts = state.attempts.saturating_add(1);
        let budget = policy.attempt_budget(state.elapsed);
        let result = check.check(budget);
        state.elapsed = clock.now().saturating_duration_since(started_at);
        match result {
            Ok(()) => {
                state.apply(ProbeEvent::CheckPassed);
                return ReadinessOutcome::Ready {
                    attempts: state.attempts,
                    waited: state.elapsed,
                };
            }
            Err(error) => {
                state.last_failure = Some(error);
                state.apply(ProbeEvent::CheckFailed {
                    deadline_reached: state.elapsed >= policy.deadline,
                });
            }
        }
        if state.phase == ProbePhase::TimedOut {
            return ReadinessOutcome::TimedOut {
                attempts: state.attempts,
                waited: state.elapsed,
                deadline: policy.deadline,
                last_failure: state.last_failure.take(),
            };
        }
        let marks = policy.progress_marks(state.elapsed);
        if marks > state.marks_reported {
            state.marks_reported = marks;
            on_progress(ProbeProgress {
                attempts: state.attempts,
                elapsed: state.elapsed,
                deadline: policy.deadline,
            });
        }
        let wake = policy.next_tick(state.elapsed);
        clock.sleep(wake.saturating_sub(state.elapsed));
        state.elapsed = clock.now().saturating_duration_since(started_at);
    }
}
