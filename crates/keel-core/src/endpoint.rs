//! Listen address parsing.
//!
//! A server is configured with a network kind and an address string. The pair
//! is validated into an [`Endpoint`] when the server is constructed, so a
//! malformed address never reaches the bind step.

use crate::error::{ConfigurationError, ConfigurationResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Host used when an address has the `:port` form.
const ANY_HOST: &str = "0.0.0.0";

/// Network kind a server listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// TCP stream sockets.
    #[default]
    Tcp,
    /// Unix domain stream sockets.
    Unix,
    /// UDP datagram sockets. Parsed for completeness, rejected by stream servers.
    Udp,
}

impl Network {
    /// Returns the lowercase name of the network.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Unix => "unix",
            Self::Udp => "udp",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "unix" => Ok(Self::Unix),
            "udp" => Ok(Self::Udp),
            other => Err(ConfigurationError::UnsupportedNetwork(other.to_string())),
        }
    }
}

/// A validated listen address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A TCP host and port. The host may be a name that is resolved at bind time.
    Tcp {
        /// Host name or IP literal, without IPv6 brackets.
        host: String,
        /// Port number; `0` asks the OS for an ephemeral port.
        port: u16,
    },
    /// A unix domain socket path.
    Unix(PathBuf),
}

impl Endpoint {
    /// Validates `address` for the given network.
    ///
    /// Accepted TCP forms are `host:port`, `[v6]:port` and `:port` (all
    /// interfaces). Unix addresses are filesystem paths.
    ///
    /// # Example
    ///
    /// ```
    /// use keel_core::{Endpoint, Network};
    ///
    /// let endpoint = Endpoint::parse(Network::Tcp, ":6060").unwrap();
    /// assert_eq!(endpoint.to_string(), "0.0.0.0:6060");
    /// ```
    pub fn parse(network: Network, address: &str) -> ConfigurationResult<Self> {
        let address = address.trim();
        if address.is_empty() {
            return Err(ConfigurationError::EmptyListen);
        }

        match network {
            Network::Tcp => Self::parse_tcp(address),
            Network::Unix => Ok(Self::Unix(PathBuf::from(address))),
            Network::Udp => Err(ConfigurationError::UnsupportedNetwork(
                network.to_string(),
            )),
        }
    }

    fn parse_tcp(address: &str) -> ConfigurationResult<Self> {
        let invalid = |reason: &str| ConfigurationError::InvalidListen {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| invalid("missing port"))?;

        let port: u16 = port.parse().map_err(|_| invalid("invalid port"))?;

        let host = if host.is_empty() {
            ANY_HOST.to_string()
        } else if let Some(v6) = host.strip_prefix('[') {
            v6.strip_suffix(']')
                .ok_or_else(|| invalid("unterminated IPv6 literal"))?
                .to_string()
        } else if host.contains(':') {
            return Err(invalid("IPv6 literals must be bracketed"));
        } else {
            host.to_string()
        };

        Ok(Self::Tcp { host, port })
    }

    /// Returns the network kind of this endpoint.
    #[must_use]
    pub const fn network(&self) -> Network {
        match self {
            Self::Tcp { .. } => Network::Tcp,
            Self::Unix(_) => Network::Unix,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } if host.contains(':') => write!(f, "[{host}]:{port}"),
            Self::Tcp { host, port } => write!(f, "{host}:{port}"),
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}
