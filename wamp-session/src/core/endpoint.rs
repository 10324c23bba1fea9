use std::{
    fmt::Display,
    net::SocketAddr,
    str::FromStr,
};

use thiserror::Error;

/// Error for an endpoint string that is not of the form `host:port`.
#[derive(Debug, Error)]
#[error("invalid endpoint {0:?}, expected host:port")]
pub struct InvalidEndpoint(String);

/// The network location of a WAMP router: a host address and a port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Creates a new endpoint.
    pub fn new<S>(host: S, port: u16) -> Self
    where
        S: Into<String>,
    {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The URL used to open a WebSocket connection to the endpoint.
    pub fn web_socket_url(&self) -> String {
        format!("ws://{self}")
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(value: SocketAddr) -> Self {
        Self::new(value.ip().to_string(), value.port())
    }
}

impl FromStr for Endpoint {
    type Err = InvalidEndpoint;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| InvalidEndpoint(s.to_owned()))?;
        if host.is_empty() {
            return Err(InvalidEndpoint(s.to_owned()));
        }
        let port = port.parse().map_err(|_| InvalidEndpoint(s.to_owned()))?;
        Ok(Self::new(host, port))
    }
}
