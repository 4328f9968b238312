//! Control endpoint reachability checks.
//!
//! A subsystem counts as ready once its control endpoint accepts a
//! connection. Each attempt opens and immediately drops a fresh connection,
//! so repeated checks are independent and have no effect on the daemon beyond
//! the connection itself.

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use bootgate_config::ControlEndpoint;
#[cfg(unix)]
use socket2::{Domain, SockAddr, Socket, Type};

use super::ReadinessCheck;

/// Connects to a control endpoint with a bounded timeout.
///
/// The connect timeout of an attempt is the smaller of the configured timeout
/// and the prober's budget for that attempt.
#[derive(Debug, Clone)]
pub struct SocketCheck {
    endpoint: ControlEndpoint,
    timeout: Duration,
}

impl SocketCheck {
    /// Builds a check for `endpoint`; each attempt waits at most `timeout`.
    #[must_use]
    pub const fn new(endpoint: ControlEndpoint, timeout: Duration) -> Self {
        Self { endpoint, timeout }
    }

    /// Endpoint being probed.
    #[must_use]
    pub const fn endpoint(&self) -> &ControlEndpoint {
        &self.endpoint
    }
}

impl ReadinessCheck for SocketCheck {
    fn check(&self, budget: Duration) -> io::Result<()> {
        let timeout = self.timeout.min(budget);
        if timeout.is_zero() {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "no time left for a connection attempt",
            ));
        }
        match &self.endpoint {
            ControlEndpoint::Tcp { host, port } => {
                let address = resolve_tcp(host, *port)?;
                TcpStream::connect_timeout(&address, timeout).map(drop)
            }
            ControlEndpoint::Unix { path } => connect_unix(path.as_str(), timeout),
        }
    }
}

fn resolve_tcp(host: &str, port: u16) -> io::Result<SocketAddr> {
    let mut addrs = (host, port).to_socket_addrs()?;
    addrs
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no resolved address"))
}

#[cfg(unix)]
fn connect_unix(path: &str, timeout: Duration) -> io::Result<()> {
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    let address = SockAddr::unix(path)?;
    socket.connect_timeout(&address, timeout)
}

#[cfg(not(unix))]
fn connect_unix(_path: &str, _timeout: Duration) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "unix sockets unsupported on this platform",
    ))
}
