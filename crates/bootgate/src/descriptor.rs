//! Ordered subsystem descriptors derived from the configuration.

use std::time::Duration;

use bootgate_config::{Config, ControlEndpoint};

use crate::launcher::LaunchCommand;
use crate::probe::{ProbePolicy, ReadinessCheck, SocketCheck};

/// Name of the anonymising network daemon descriptor.
pub const TOR: &str = "tor";
/// Name of the virtual display server descriptor.
pub const XVFB: &str = "xvfb";

/// Readiness requirement of a gated subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessGate {
    endpoint: ControlEndpoint,
    policy: ProbePolicy,
    probe_timeout: Duration,
}

impl ReadinessGate {
    /// Builds a gate that waits for `endpoint` under `policy`.
    #[must_use]
    pub const fn new(
        endpoint: ControlEndpoint,
        policy: ProbePolicy,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            endpoint,
            policy,
            probe_timeout,
        }
    }

    /// Endpoint that must accept connections.
    #[must_use]
    pub const fn endpoint(&self) -> &ControlEndpoint {
        &self.endpoint
    }

    /// Deadline and polling cadence.
    #[must_use]
    pub const fn policy(&self) -> ProbePolicy {
        self.policy
    }

    /// Connect timeout for one attempt.
    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }
}

/// One subsystem launched by the sequencer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubsystemDescriptor {
    name: String,
    command: LaunchCommand,
    readiness: Option<ReadinessGate>,
}

impl SubsystemDescriptor {
    /// Describes a subsystem that must become ready before later stages run.
    #[must_use]
    pub fn gated(name: impl Into<String>, command: LaunchCommand, gate: ReadinessGate) -> Self {
        Self {
            name: name.into(),
            command,
            readiness: Some(gate),
        }
    }

    /// Describes a best-effort subsystem with no readiness check.
    #[must_use]
    pub fn ungated(name: impl Into<String>, command: LaunchCommand) -> Self {
        Self {
            name: name.into(),
            command,
            readiness: None,
        }
    }

    /// Descriptor name used in logs and diagnostics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Command used to start the subsystem.
    #[must_use]
    pub const fn command(&self) -> &LaunchCommand {
        &self.command
    }

    /// Readiness requirement, if the subsystem is gated.
    #[must_use]
    pub const fn readiness(&self) -> Option<&ReadinessGate> {
        self.readiness.as_ref()
    }

    /// Whether later stages wait for this subsystem.
    #[must_use]
    pub const fn is_gated(&self) -> bool {
        self.readiness.is_some()
    }
}

/// Everything the sequencer needs: subsystems in launch order and the worker
/// that replaces the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootPlan {
    subsystems: Vec<SubsystemDescriptor>,
    worker: LaunchCommand,
}

impl BootPlan {
    /// Builds a plan from explicit parts.
    #[must_use]
    pub const fn new(subsystems: Vec<SubsystemDescriptor>, worker: LaunchCommand) -> Self {
        Self { subsystems, worker }
    }

    /// Derives the container's plan: the gated anonymising daemon, then the
    /// ungated display server, then the worker with `DISPLAY` exported.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let endpoint = config.control_endpoint();
        let mut tor_args = vec![String::from("--SocksPort"), config.tor_port().to_string()];
        tor_args.extend(control_flag(&endpoint));
        let policy = ProbePolicy {
            deadline: config.readiness_timeout(),
            poll_interval: config.poll_interval(),
            progress_every: config.progress_every(),
        };
        let tor = SubsystemDescriptor::gated(
            TOR,
            LaunchCommand::new(config.tor_binary()).args(tor_args),
            ReadinessGate::new(endpoint, policy, config.probe_timeout()),
        );

        let xvfb = SubsystemDescriptor::ungated(
            XVFB,
            LaunchCommand::new(config.xvfb_binary()).args([
                config.display(),
                "-screen",
                "0",
                config.xvfb_screen(),
            ]),
        );

        let worker = LaunchCommand::new(config.worker_program())
            .args(config.worker_args().iter().cloned())
            .env("DISPLAY", config.display());

        Self::new(vec![tor, xvfb], worker)
    }

    /// Subsystems in launch order.
    #[must_use]
    pub fn subsystems(&self) -> &[SubsystemDescriptor] {
        &self.subsystems
    }

    /// Worker command executed at handoff.
    #[must_use]
    pub const fn worker(&self) -> &LaunchCommand {
        &self.worker
    }
}

/// Tor flag binding its control interface to exactly the probed endpoint.
fn control_flag(endpoint: &ControlEndpoint) -> [String; 2] {
    let flag = match endpoint {
        ControlEndpoint::Tcp { .. } => "--ControlPort",
        ControlEndpoint::Unix { .. } => "--ControlSocket",
    };
    [String::from(flag), endpoint.address()]
}

/// Produces the readiness check for a gate.
pub trait CheckFactory {
    /// Check type produced.
    type Check: ReadinessCheck;

    /// Builds a fresh check for `gate`.
    fn check_for(&self, gate: &ReadinessGate) -> Self::Check;
}

/// Factory producing [`SocketCheck`]s against the gate's endpoint.
#[derive(Debug, Default, Clone, Copy)]
pub struct SocketCheckFactory;

impl CheckFactory for SocketCheckFactory {
    type Check = SocketCheck;

    fn check_for(&self, gate: &ReadinessGate) -> SocketCheck {
        SocketCheck::new(gate.endpoint().clone(), gate.probe_timeout())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rstest::rstest;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect();
        Config::from_env_map(&vars).expect("configuration loads")
    }

    #[test]
    fn default_plan_orders_tor_before_xvfb() {
        let plan = BootPlan::from_config(&config(&[]));
        let names: Vec<&str> = plan.subsystems().iter().map(SubsystemDescriptor::name).collect();
        assert_eq!(names, [TOR, XVFB]);

        let tor = plan.subsystems().first().expect("tor descriptor");
        assert!(tor.is_gated());
        assert_eq!(tor.command().program(), "tor");
        assert_eq!(
            tor.command().arguments(),
            ["--SocksPort", "9050", "--ControlPort", "127.0.0.1:9051"]
        );
        let gate = tor.readiness().expect("tor is gated");
        assert_eq!(gate.endpoint(), &ControlEndpoint::tcp("127.0.0.1", 9051));
        assert_eq!(gate.policy().deadline, Duration::from_secs(60));
        assert_eq!(gate.policy().poll_interval, Duration::from_secs(1));
        assert_eq!(gate.policy().progress_every.get(), 10);

        let xvfb = plan.subsystems().get(1).expect("xvfb descriptor");
        assert!(!xvfb.is_gated());
        assert_eq!(xvfb.command().to_string(), "Xvfb :99 -screen 0 1920x1080x24");
    }

    #[test]
    fn worker_receives_display() {
        let plan = BootPlan::from_config(&config(&[("DISPLAY", ":42")]));
        assert_eq!(plan.worker().to_string(), "python github_generator.py");
        assert_eq!(
            plan.worker().env_overrides(),
            [(String::from("DISPLAY"), String::from(":42"))]
        );
    }

    #[rstest]
    #[case::tcp(&[("TOR_CONTROL_PORT", "9151")], "--ControlPort", "127.0.0.1:9151")]
    #[case::tcp_host(
        &[("TOR_CONTROL_HOST", "0.0.0.0"), ("TOR_CONTROL_PORT", "9151")],
        "--ControlPort",
        "0.0.0.0:9151"
    )]
    #[case::tcp_override(
        &[("TOR_CONTROL_SOCKET", "tcp://127.0.0.1:9151")],
        "--ControlPort",
        "127.0.0.1:9151"
    )]
    #[case::ipv6_override(
        &[("TOR_CONTROL_SOCKET", "tcp://[::1]:9151")],
        "--ControlPort",
        "[::1]:9151"
    )]
    #[case::unix(
        &[("TOR_CONTROL_SOCKET", "unix:///run/tor/control")],
        "--ControlSocket",
        "/run/tor/control"
    )]
    fn tor_control_flag_follows_endpoint(
        #[case] pairs: &[(&str, &str)],
        #[case] flag: &str,
        #[case] value: &str,
    ) {
        let plan = BootPlan::from_config(&config(pairs));
        let tor = plan.subsystems().first().expect("tor descriptor");
        let args = tor.command().arguments();
        assert_eq!(args.get(2).map(String::as_str), Some(flag));
        assert_eq!(args.get(3).map(String::as_str), Some(value));
        let gate = tor.readiness().expect("tor is gated");
        assert_eq!(gate.endpoint().address(), value);
    }

    #[test]
    fn socket_factory_targets_gate_endpoint() {
        let plan = BootPlan::from_config(&config(&[("BOOTGATE_PROBE_TIMEOUT_MS", "250")]));
        let gate = plan
            .subsystems()
            .first()
            .and_then(SubsystemDescriptor::readiness)
            .expect("tor gate");
        assert_eq!(gate.probe_timeout(), Duration::from_millis(250));
        let check = SocketCheckFactory.check_for(gate);
        assert_eq!(check.endpoint(), gate.endpoint());
    }
}
