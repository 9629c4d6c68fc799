//! Address set of a running broker.

use std::fmt;
use std::str::FromStr;

use crate::error::{BrokerStartupError, StartupResult};

/// One `host:port` endpoint a client can bootstrap from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl BrokerAddress {
    /// Create an address from its parts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for BrokerAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.rsplitn(2, ':').collect();
        if parts.len() != 2 || parts[1].is_empty() {
            return Err(format!("invalid address format: {s} (expected 'host:port')"));
        }
        let port = parts[0]
            .parse()
            .map_err(|_| format!("invalid port in address: {s}"))?;
        Ok(Self::new(parts[1], port))
    }
}

/// Network endpoints of a broker that has reported ready.
///
/// A handle always carries at least one address and offers no way to change
/// them, so every client built from it targets the same broker for the
/// lifetime of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerHandle {
    addresses: Vec<BrokerAddress>,
}

impl BrokerHandle {
    /// Create a handle from the addresses a broker reported.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerStartupError::NoAddresses`] if `addresses` is empty.
    pub fn new(addresses: Vec<BrokerAddress>) -> StartupResult<Self> {
        if addresses.is_empty() {
            return Err(BrokerStartupError::NoAddresses);
        }
        Ok(Self { addresses })
    }

    /// Handle for a single loopback-style endpoint.
    pub fn single(host: impl Into<String>, port: u16) -> Self {
        Self {
            addresses: vec![BrokerAddress::new(host, port)],
        }
    }

    /// All endpoints of the broker.
    #[must_use]
    pub fn addresses(&self) -> &[BrokerAddress] {
        &self.addresses
    }

    /// Comma-separated `host:port` list, as Kafka clients expect it.
    #[must_use]
    pub fn bootstrap_servers(&self) -> String {
        self.addresses
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Whether `address` is one of this broker's endpoints.
    #[must_use]
    pub fn serves(&self, address: &str) -> bool {
        self.addresses.iter().any(|a| a.to_string() == address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_handle_rejected() {
        assert!(matches!(
            BrokerHandle::new(vec![]),
            Err(BrokerStartupError::NoAddresses)
        ));
    }

    #[test]
    fn test_bootstrap_servers_joined() {
        let handle = BrokerHandle::new(vec![
            BrokerAddress::new("127.0.0.1", 9092),
            BrokerAddress::new("127.0.0.1", 9093),
        ])
        .unwrap();
        assert_eq!(handle.bootstrap_servers(), "127.0.0.1:9092,127.0.0.1:9093");
        assert!(handle.serves("127.0.0.1:9093"));
        assert!(!handle.serves("127.0.0.1:9094"));
    }

    #[test]
    fn test_address_parsing() {
        let addr: BrokerAddress = "localhost:19092".parse().unwrap();
        assert_eq!(addr, BrokerAddress::new("localhost", 19092));
        assert!("localhost".parse::<BrokerAddress>().is_err());
        assert!("localhost:port".parse::<BrokerAddress>().is_err());
        assert!(":9092".parse::<BrokerAddress>().is_err());
    }
}
