//! Destination blacklist
//!
//! Sink destinations are resolved once and every resolved address is
//! compared against the configured ranges before any dial happens. The
//! addresses returned by [`Blacklist::resolve`] are the ones the caller
//! dials, so a second lookup cannot slip past the check.

use crate::error::{BlacklistError, BlacklistViolation};
use relay_config::ParsedIpRange;
use std::net::{IpAddr, SocketAddr};
use tokio::net::lookup_host;
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    ranges: Vec<ParsedIpRange>,
}

impl Blacklist {
    pub fn new(ranges: Vec<ParsedIpRange>) -> Self {
        Self { ranges }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Whether `ip` lies in any configured range
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.ranges.iter().any(|range| range.contains(ip))
    }

    /// Check already-resolved addresses
    pub fn check(&self, host: &str, addresses: &[SocketAddr]) -> Result<(), BlacklistViolation> {
        match addresses.iter().find(|addr| self.contains(addr.ip())) {
            Some(addr) => Err(BlacklistViolation {
                host: host.to_string(),
                address: addr.ip(),
            }),
            None => Ok(()),
        }
    }

    /// Resolve `host:port` and return the addresses that may be dialed
    pub async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, BlacklistError> {
        let addresses: Vec<SocketAddr> = lookup_host((host, port))
            .await
            .map_err(|source| BlacklistError::Resolve {
                host: host.to_string(),
                source,
            })?
            .collect();

        if addresses.is_empty() {
            return Err(BlacklistError::NoAddresses {
                host: host.to_string(),
            });
        }

        if let Err(violation) = self.check(host, &addresses) {
            warn!(host, address = %violation.address, "Destination is blacklisted");
            return Err(violation.into());
        }

        Ok(addresses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_config::IpRange;

    fn blacklist(start: &str, end: &str) -> Blacklist {
        Blacklist::new(vec![IpRange::new(start, end).parse().unwrap()])
    }

    #[test]
    fn test_contains_checks_every_range() {
        let list = Blacklist::new(vec![
            IpRange::new("10.0.0.0", "10.0.0.255").parse().unwrap(),
            IpRange::new("192.168.1.1", "192.168.1.1").parse().unwrap(),
        ]);
        assert!(list.contains("10.0.0.5".parse().unwrap()));
        assert!(list.contains("192.168.1.1".parse().unwrap()));
        assert!(!list.contains("192.168.1.2".parse().unwrap()));
        assert!(!Blacklist::default().contains("10.0.0.5".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_blacklisted_literal_address_is_rejected() {
        let list = blacklist("10.0.0.0", "10.0.0.255");
        let err = list.resolve("10.0.0.5", 514).await.unwrap_err();
        match err {
            BlacklistError::Violation(violation) => {
                assert_eq!(violation.address, "10.0.0.5".parse::<IpAddr>().unwrap());
            }
            other => panic!("expected violation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_allowed_address_resolves() {
        let list = blacklist("10.0.0.0", "10.0.0.255");
        let addresses = list.resolve("127.0.0.1", 514).await.unwrap();
        assert_eq!(addresses, vec!["127.0.0.1:514".parse().unwrap()]);
    }

    #[test]
    fn test_check_reports_first_match() {
        let list = blacklist("127.0.0.0", "127.255.255.255");
        let addrs: Vec<SocketAddr> = vec![
            "8.8.8.8:53".parse().unwrap(),
            "127.0.0.1:53".parse().unwrap(),
        ];
        let violation = list.check("mixed.example", &addrs).unwrap_err();
        assert_eq!(violation.address.to_string(), "127.0.0.1");
    }
}
