//! CIDR parsing for blacklist entries, built on `ipnetwork`.

use ipnetwork::IpNetwork;
use std::net::IpAddr;
use std::str::FromStr;

use crate::error::{Result, ServerError};

/// A parsed CIDR range used to match connecting/posting IPs against the
/// blacklist.
#[derive(Debug, Clone)]
pub struct Cidr(IpNetwork);

impl Cidr {
    pub fn parse(s: &str) -> Result<Self> {
        IpNetwork::from_str(s.trim())
            .map(Cidr)
            .map_err(|_| ServerError::InvalidCidr(s.to_string()))
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.0.contains(ip)
    }

    /// `true` for the well-known `0.0.0.0/32` delete marker some emitters
    /// use in place of a real range (§4.2).
    pub fn is_delete_marker(&self) -> bool {
        matches!(self.0, IpNetwork::V4(v4) if v4.ip().is_unspecified() && v4.prefix() == 32)
    }
}

impl std::fmt::Display for Cidr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
