//! Inclusive IP address ranges used for the sink destination blacklist

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// An inclusive `start..=end` address range as written in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRange {
    pub start: String,
    pub end: String,
}

/// A validated, parsed [`IpRange`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedIpRange {
    start: IpAddr,
    end: IpAddr,
}

impl IpRange {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Parse both ends and check the range is well formed
    pub fn parse(&self) -> Result<ParsedIpRange, ConfigError> {
        let start: IpAddr = self.start.trim().parse().map_err(|_| {
            ConfigError::invalid_ip_range(&self.start, &self.end, "start is not an IP address")
        })?;
        let end: IpAddr = self.end.trim().parse().map_err(|_| {
            ConfigError::invalid_ip_range(&self.start, &self.end, "end is not an IP address")
        })?;
        ParsedIpRange::new(start, end).map_err(|reason| {
            ConfigError::invalid_ip_range(&self.start, &self.end, reason)
        })
    }
}

impl ParsedIpRange {
    pub fn new(start: IpAddr, end: IpAddr) -> Result<Self, &'static str> {
        if start.is_ipv4() != end.is_ipv4() {
            return Err("start and end belong to different address families");
        }
        if start > end {
            return Err("start is greater than end");
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> IpAddr {
        self.start
    }

    pub fn end(&self) -> IpAddr {
        self.end
    }

    /// Whether `ip` falls inside the range; IPv4-mapped IPv6 addresses are
    /// compared as IPv4
    pub fn contains(&self, ip: IpAddr) -> bool {
        let ip = match ip {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
            v4 => v4,
        };
        ip.is_ipv4() == self.start.is_ipv4() && self.start <= ip && ip <= self.end
    }
}

/// Parse every range, failing on the first invalid one
pub fn parse_ranges(ranges: &[IpRange]) -> Result<Vec<ParsedIpRange>, ConfigError> {
    ranges.iter().map(IpRange::parse).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_contains_is_inclusive() {
        let range = IpRange::new("10.0.0.0", "10.0.0.255").parse().unwrap();
        assert!(range.contains(ip("10.0.0.0")));
        assert!(range.contains(ip("10.0.0.5")));
        assert!(range.contains(ip("10.0.0.255")));
        assert!(!range.contains(ip("10.0.1.0")));
        assert!(!range.contains(ip("9.255.255.255")));
    }

    #[test]
    fn test_mapped_ipv6_matches_ipv4_range() {
        let range = IpRange::new("10.0.0.0", "10.0.0.255").parse().unwrap();
        assert!(range.contains(ip("::ffff:10.0.0.7")));
        assert!(!range.contains(ip("fe80::1")));
    }

    #[test]
    fn test_invalid_ranges_rejected() {
        assert!(IpRange::new("10.0.0.9", "10.0.0.1").parse().is_err());
        assert!(IpRange::new("10.0.0.1", "::1").parse().is_err());
        assert!(IpRange::new("not-an-ip", "10.0.0.1").parse().is_err());
        assert!(IpRange::new("10.0.0.1", "").parse().is_err());
    }

    #[test]
    fn test_parse_ranges_reports_first_failure() {
        let ranges = vec![
            IpRange::new("127.0.0.0", "127.0.0.255"),
            IpRange::new("bogus", "10.0.0.1"),
        ];
        let err = parse_ranges(&ranges).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidIpRange { .. }));
    }
}
