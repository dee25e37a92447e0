//! NDCE Discovery - Network discovery and device identification
//!
//! This crate provides:
//! - Subnet enumeration for CIDR specifications
//! - ICMP reachability and TCP port probing
//! - SNMP-based device identification against the vendor catalog
//! - A bounded, cancellable discovery scanner

pub mod identify;
pub mod probe;
pub mod scanner;
pub mod subnet;

pub use identify::{identify, ShellPorts};
pub use probe::{is_port_open, is_reachable, DeviceProbe, NetworkProbe, Pinger};
pub use scanner::{
    DiscoveryEvent, DiscoveryReport, DiscoveryRequest, DiscoveryScanner, ScannerConfig,
};
pub use subnet::{enumerate, host_count, parse_subnet, validate_subnet};
