//! Caller-owned device inventory persisted as JSON

use anyhow::{Context, Result};
use ndce_core::DeviceRecord;
use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Devices discovered so far, keyed by address
pub struct DeviceStore {
    path: PathBuf,
    devices: BTreeMap<IpAddr, DeviceRecord>,
}

impl DeviceStore {
    /// Load the store, starting empty when the file does not exist
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let devices = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let devices: BTreeMap<IpAddr, DeviceRecord> = serde_json::from_str(&content)
                .with_context(|| format!("Malformed device store {}", path.display()))?;
            info!(path = %path.display(), count = devices.len(), "Loaded device store");
            devices
        } else {
            info!(path = %path.display(), "Device store not found, starting empty");
            BTreeMap::new()
        };

        Ok(Self { path, devices })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the store back to disk
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(&self.devices)?;
        std::fs::write(&self.path, content)?;
        debug!(path = %self.path.display(), count = self.devices.len(), "Saved device store");
        Ok(())
    }

    /// Addresses discovery must not report again
    pub fn known_addresses(&self) -> HashSet<IpAddr> {
        self.devices.keys().copied().collect()
    }

    /// Add a record, returning false if its address was already stored
    pub fn insert(&mut self, record: DeviceRecord) -> bool {
        match self.devices.entry(record.address) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
        }
    }

    /// Add many records, returning how many were new
    pub fn extend(&mut self, records: impl IntoIterator<Item = DeviceRecord>) -> usize {
        records
            .into_iter()
            .map(|record| self.insert(record))
            .filter(|added| *added)
            .count()
    }

    pub fn get(&self, address: &IpAddr) -> Option<&DeviceRecord> {
        self.devices.get(address)
    }

    /// Devices in address order
    pub fn devices(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Push targets: the explicit selection, or every stored device when `all`
    pub fn select_targets(&self, explicit: &[IpAddr], all: bool) -> Vec<IpAddr> {
        if all {
            self.devices.keys().copied().collect()
        } else {
            explicit.to_vec()
        }
    }
}
