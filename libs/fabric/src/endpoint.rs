use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Address family restriction applied when resolving TCP endpoints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    #[default]
    Any,
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    /// Whether `ip` belongs to this family
    pub fn admits(self, ip: &IpAddr) -> bool {
        match self {
            AddressFamily::Any => true,
            AddressFamily::Ipv4 => ip.is_ipv4(),
            AddressFamily::Ipv6 => ip.is_ipv6(),
        }
    }
}

/// A concrete network endpoint a transport can connect to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP endpoint; the host is looked up at connect time
    Tcp {
        host: String,
        port: u16,
        family: AddressFamily,
    },
    /// Unix domain socket path
    Unix(PathBuf),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port, .. } if host.contains(':') => {
                write!(f, "tcp://[{}]:{}", host, port)
            }
            Endpoint::Tcp { host, port, .. } => write!(f, "tcp://{}:{}", host, port),
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Turns a connection address into an [`Endpoint`]
pub trait Resolve: Send + Sync {
    fn resolve(&self, address: &str, family: AddressFamily) -> Result<Endpoint>;
}

/// Resolver for `tcp://`, `tcp4://`, `tcp6://` and `unix://` addresses
///
/// Host names are kept as-is and looked up by the transport when it
/// connects, so resolving never blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultResolver;

impl Resolve for DefaultResolver {
    fn resolve(&self, address: &str, family: AddressFamily) -> Result<Endpoint> {
        let (scheme, rest) = address
            .split_once("://")
            .ok_or_else(|| Error::invalid_address(format!("missing scheme in '{}'", address)))?;

        let family = match scheme.to_ascii_lowercase().as_str() {
            "tcp" => family,
            "tcp4" => narrow(family, AddressFamily::Ipv4, address)?,
            "tcp6" => narrow(family, AddressFamily::Ipv6, address)?,
            "unix" => {
                if rest.is_empty() {
                    return Err(Error::invalid_address(format!(
                        "empty socket path in '{}'",
                        address
                    )));
                }
                return Ok(Endpoint::Unix(PathBuf::from(rest)));
            }
            other => {
                return Err(Error::invalid_address(format!(
                    "unsupported scheme '{}' in '{}'",
                    other, address
                )))
            }
        };

        let (host, port) = split_host_port(rest.trim_end_matches('/'))
            .ok_or_else(|| Error::invalid_address(format!("expected host:port in '{}'", address)))?;

        if let Ok(ip) = host.parse::<IpAddr>() {
            if !family.admits(&ip) {
                return Err(Error::invalid_address(format!(
                    "{} is not an {:?} address",
                    ip, family
                )));
            }
        }

        Ok(Endpoint::Tcp {
            host: host.to_string(),
            port,
            family,
        })
    }
}

fn narrow(requested: AddressFamily, scheme: AddressFamily, address: &str) -> Result<AddressFamily> {
    match requested {
        AddressFamily::Any => Ok(scheme),
        f if f == scheme => Ok(scheme),
        f => Err(Error::invalid_address(format!(
            "'{}' conflicts with requested family {:?}",
            address, f
        ))),
    }
}

fn split_host_port(authority: &str) -> Option<(&str, u16)> {
    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, tail) = bracketed.split_once(']')?;
        (host, tail.strip_prefix(':')?)
    } else {
        authority.rsplit_once(':')?
    };

    if host.is_empty() {
        return None;
    }
    Some((host, port.parse().ok()?))
}
