use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;
use thiserror::Error;
use url::{Host, Url};

/// Location of the anonymising daemon's control interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEndpoint {
    /// TCP control port.
    Tcp {
        /// Host name or address the port is bound on.
        host: String,
        /// Control port number.
        port: u16,
    },
    /// Unix domain control socket.
    Unix {
        /// Filesystem path of the socket.
        path: Utf8PathBuf,
    },
}

impl ControlEndpoint {
    /// Builds a TCP control endpoint.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Builds a Unix domain socket control endpoint.
    #[must_use]
    pub fn unix(path: impl Into<Utf8PathBuf>) -> Self {
        Self::Unix { path: path.into() }
    }

    /// Transport address without the scheme: `host:port` with IPv6 hosts
    /// bracketed, or the socket path.
    #[must_use]
    pub fn address(&self) -> String {
        match self {
            Self::Tcp { host, port } if host.contains(':') => format!("[{host}]:{port}"),
            Self::Tcp { host, port } => format!("{host}:{port}"),
            Self::Unix { path } => path.to_string(),
        }
    }
}

impl fmt::Display for ControlEndpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self {
            Self::Tcp { .. } => "tcp",
            Self::Unix { .. } => "unix",
        };
        write!(formatter, "{scheme}://{}", self.address())
    }
}

impl FromStr for ControlEndpoint {
    type Err = EndpointParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(input)?;
        match url.scheme() {
            "tcp" => {
                let host = match url.host() {
                    Some(Host::Domain(domain)) => domain.to_owned(),
                    Some(Host::Ipv4(address)) => address.to_string(),
                    Some(Host::Ipv6(address)) => address.to_string(),
                    None => return Err(EndpointParseError::MissingHost(input.to_owned())),
                };
                let port = url
                    .port()
                    .ok_or_else(|| EndpointParseError::MissingPort(input.to_owned()))?;
                Ok(Self::tcp(host, port))
            }
            "unix" => {
                let path = url.path();
                if path.is_empty() || path == "/" {
                    return Err(EndpointParseError::MissingUnixPath(input.to_owned()));
                }
                Ok(Self::unix(path))
            }
            other => Err(EndpointParseError::UnsupportedScheme(other.to_owned())),
        }
    }
}

/// Errors encountered while parsing a [`ControlEndpoint`] from text.
#[derive(Debug, Error)]
pub enum EndpointParseError {
    /// Scheme was neither `tcp` nor `unix`.
    #[error("unsupported control endpoint scheme '{0}'")]
    UnsupportedScheme(String),
    /// TCP host name was missing.
    #[error("missing TCP host in '{0}'")]
    MissingHost(String),
    /// TCP port was missing from the address.
    #[error("missing TCP port in '{0}'")]
    MissingPort(String),
    /// Unix socket path was absent.
    #[error("missing Unix socket path in '{0}'")]
    MissingUnixPath(String),
    /// URL failed to parse.
    #[error(transparent)]
    Url(#[from] url::ParseError),
}
