//! Subnet parsing and host enumeration

use ipnetwork::IpNetwork;
use ndce_core::ValidationError;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::{debug, warn};

/// Largest subnet enumerated without an explicit limit (a /16)
pub const DEFAULT_MAX_HOSTS: usize = 65_536;

/// Parse a CIDR subnet ("10.0.0.0/24", "2001:db8::/120")
///
/// The address must be the network address: "10.0.0.5/30" is rejected.
/// A bare address is a single-host subnet.
pub fn parse_subnet(subnet: &str) -> Result<IpNetwork, ValidationError> {
    let network = subnet
        .trim()
        .parse::<IpNetwork>()
        .map_err(|_| ValidationError::InvalidSubnet(subnet.to_string()))?;
    if network.ip() != network.network() {
        return Err(ValidationError::InvalidSubnet(subnet.to_string()));
    }
    Ok(network)
}

/// Number of usable host addresses in a subnet
pub fn host_count(network: &IpNetwork) -> u128 {
    match network {
        IpNetwork::V4(net) => match net.prefix() {
            32 => 1,
            31 => 2,
            prefix => (1u128 << (32 - prefix)) - 2,
        },
        IpNetwork::V6(net) => match net.prefix() {
            128 => 1,
            127 => 2,
            0 => u128::MAX,
            prefix => (1u128 << (128 - prefix)) - 1,
        },
    }
}

/// Parse a subnet and check it against a host limit
pub fn validate_subnet(subnet: &str, max_hosts: usize) -> Result<IpNetwork, ValidationError> {
    let network = parse_subnet(subnet)?;
    let hosts = host_count(&network);
    if hosts > max_hosts as u128 {
        return Err(ValidationError::SubnetTooLarge {
            subnet: subnet.trim().to_string(),
            hosts,
            limit: max_hosts,
        });
    }
    Ok(network)
}

/// Usable host addresses of a subnet in ascending order
///
/// IPv4 excludes the network and broadcast addresses (except for /31 and /32).
/// IPv6 excludes the subnet-router anycast address (except for /127 and /128).
/// Callers must bound the subnet size first, see [`validate_subnet`].
pub fn hosts(network: &IpNetwork) -> Vec<IpAddr> {
    match network {
        IpNetwork::V4(net) => {
            let base = u32::from(net.network());
            let range = match net.prefix() {
                32 => base..=base,
                31 => base..=base | 1,
                prefix => {
                    let broadcast = base | (u32::MAX >> prefix);
                    (base + 1)..=(broadcast - 1)
                }
            };
            range.map(|ip| IpAddr::V4(Ipv4Addr::from(ip))).collect()
        }
        IpNetwork::V6(net) => {
            let base = u128::from(net.network());
            let range = match net.prefix() {
                128 => base..=base,
                127 => base..=base | 1,
                prefix => (base + 1)..=(base | (u128::MAX >> prefix)),
            };
            range.map(|ip| IpAddr::V6(Ipv6Addr::from(ip))).collect()
        }
    }
}

/// Expand a subnet specification into its host addresses
///
/// Fails soft: invalid input, or a subnet larger than [`DEFAULT_MAX_HOSTS`],
/// yields an empty list.
pub fn enumerate(subnet: &str) -> Vec<IpAddr> {
    match validate_subnet(subnet, DEFAULT_MAX_HOSTS) {
        Ok(network) => {
            let addresses = hosts(&network);
            debug!(subnet = %network, hosts = addresses.len(), "Enumerated subnet");
            addresses
        }
        Err(e) => {
            warn!(subnet = %subnet, error = %e, "Cannot enumerate subnet");
            Vec::new()
        }
    }
}
