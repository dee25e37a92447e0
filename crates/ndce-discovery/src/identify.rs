//! Device identification for a single address

use ndce_core::{DeviceRecord, VendorCatalog};
use std::net::IpAddr;
use tokio::sync::Semaphore;
use tracing::{debug, trace, warn};

use crate::probe::DeviceProbe;

/// Well-known management ports probed for every identified device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShellPorts {
    pub telnet: u16,
    pub ssh: u16,
}

impl Default for ShellPorts {
    fn default() -> Self {
        Self { telnet: 23, ssh: 22 }
    }
}

/// Identify the device at `ip`
///
/// Holds one slot of `gate` for the whole operation. Returns `None` when the
/// host is unreachable, the SNMP query fails, or the answer carries neither an
/// object identifier nor a name.
pub async fn identify(
    ip: IpAddr,
    gate: &Semaphore,
    probe: &dyn DeviceProbe,
    catalog: &VendorCatalog,
    ports: ShellPorts,
) -> Option<DeviceRecord> {
    let _permit = match gate.acquire().await {
        Ok(permit) => permit,
        Err(e) => {
            warn!(ip = %ip, error = %e, "Concurrency gate closed");
            return None;
        }
    };

    if !probe.is_reachable(ip).await {
        trace!(ip = %ip, "Host unreachable");
        return None;
    }

    let (info, telnet_open, ssh_open) = tokio::join!(
        probe.query_system(ip),
        probe.is_port_open(ip, ports.telnet),
        probe.is_port_open(ip, ports.ssh),
    );

    let info = info?;
    if !info.is_usable() {
        debug!(ip = %ip, "SNMP answer carried no identifying values");
        return None;
    }

    let mut record = DeviceRecord::new(ip);
    if let Some(oid) = &info.object_identifier {
        let description = info.description.as_deref().unwrap_or_default();
        record.classify(catalog.resolve(oid, description));
    }
    if let Some(oid) = info.object_identifier {
        record.object_identifier = oid;
    }
    if let Some(name) = info.name {
        record.hostname = name;
    }
    record.remote_shell_open = telnet_open;
    record.secure_shell_open = ssh_open;

    debug!(
        ip = %ip,
        vendor = %record.vendor,
        model = %record.model,
        category = %record.category,
        "Device identified"
    );
    Some(record)
}
