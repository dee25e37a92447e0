//! Device records for identified network equipment

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::catalog::{CatalogEntry, UNKNOWN};

/// An identified network device
///
/// Records are immutable once emitted by a discovery run. The caller's
/// device store owns them afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Management address, unique within a discovery run
    pub address: IpAddr,
    /// Vendor-assigned object identifier (e.g. ".1.3.6.1.4.1.14988.1")
    #[serde(default = "unknown")]
    pub object_identifier: String,
    /// Device-reported system name
    #[serde(default = "unknown")]
    pub hostname: String,
    #[serde(default = "unknown")]
    pub vendor: String,
    #[serde(default = "unknown")]
    pub model: String,
    #[serde(default = "unknown")]
    pub category: String,
    /// Telnet port answered
    #[serde(default)]
    pub remote_shell_open: bool,
    /// SSH port answered
    #[serde(default)]
    pub secure_shell_open: bool,
}

fn unknown() -> String {
    UNKNOWN.to_string()
}

impl DeviceRecord {
    /// Create a record with every text field "Unknown" and closed ports
    pub fn new(address: IpAddr) -> Self {
        Self {
            address,
            object_identifier: unknown(),
            hostname: unknown(),
            vendor: unknown(),
            model: unknown(),
            category: unknown(),
            remote_shell_open: false,
            secure_shell_open: false,
        }
    }

    /// Apply a resolved catalog classification
    pub fn classify(&mut self, entry: CatalogEntry) {
        self.vendor = entry.vendor;
        self.model = entry.model;
        self.category = entry.category;
    }

    /// The classification currently held by this record
    pub fn classification(&self) -> CatalogEntry {
        CatalogEntry::new(&self.vendor, &self.model, &self.category)
    }

    /// Whether the vendor could not be resolved
    pub fn is_unclassified(&self) -> bool {
        self.vendor == UNKNOWN
    }
}
