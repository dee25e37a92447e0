//! Vendor catalog - Maps object identifiers to vendor/model/category
//!
//! Resolution is two-tier:
//! 1. MikroTik identifiers, whose model lives in the system description
//! 2. A static identifier table (built-in entries plus an optional JSON database)
//!
//! Anything else resolves to "Unknown".

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Sentinel for values that could not be resolved
pub const UNKNOWN: &str = "Unknown";

pub const MIKROTIK_VENDOR: &str = "MikroTik";
/// RouterOS devices report "RouterOS <model>" as the description
pub const MIKROTIK_ROUTEROS_OID: &str = ".1.3.6.1.4.1.14988.1";
/// SwOS devices report the bare model as the description
pub const MIKROTIK_SWOS_OID: &str = ".1.3.6.1.4.1.14988.2";

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read identifier database: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse identifier database: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Classification of a device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub vendor: String,
    pub model: String,
    pub category: String,
}

impl CatalogEntry {
    pub fn new(vendor: &str, model: &str, category: &str) -> Self {
        Self {
            vendor: vendor.to_string(),
            model: model.to_string(),
            category: category.to_string(),
        }
    }

    pub fn unknown() -> Self {
        Self::new(UNKNOWN, UNKNOWN, UNKNOWN)
    }
}

/// (object identifier, vendor, model, category)
const BUILTIN_ENTRIES: &[(&str, &str, &str, &str)] = &[
    (".1.3.6.1.4.1.259.6.10.94", "EdgeCore", "ES3528M", "Switch"),
    (".1.3.6.1.4.1.259.10.1.22.101", "EdgeCore", "ES3528MV2", "Switch"),
    (".1.3.6.1.4.1.259.10.1.27.101", "EdgeCore", "ECS3510-28T", "Switch"),
    (".1.3.6.1.4.1.259.10.1.27.102", "EdgeCore", "ECS3510-52T", "Switch"),
    (".1.3.6.1.4.1.259.6.10.74", "EdgeCore", "ES3526XA", "Switch"),
    (".1.3.6.1.4.1.259.8.1.5", "EdgeCore", "ES3526XA-V2", "Switch"),
    (".1.3.6.1.4.1.259.6.10.57", "EdgeCore", "ES4612", "Switch"),
    (".1.3.6.1.4.1.40418.7.1", "SNR", "SNR-S2940-8G", "Switch"),
    (".1.3.6.1.4.1.40418.7.2", "SNR", "SNR-S2940-8G-v2", "Switch"),
    (".1.3.6.1.4.1.6339.1.1.1.36", "SNR", "SNR-S2950-24G", "Switch"),
    (".1.3.6.1.4.1.40418.7.5", "SNR", "SNR-S2960-24G", "Switch"),
    (".1.3.6.1.4.1.40418.7.6", "SNR", "SNR-S2960-48G", "Switch"),
    (".1.3.6.1.4.1.40418.7.42", "SNR", "SNR-S2985G-24TC", "Switch"),
    (".1.3.6.1.4.1.40418.7.371", "SNR", "SNR-S2965-24T", "Switch"),
    (".1.3.6.1.4.1.57206.1.2", "SNR", "SNR-S5210G-24TX-UPS", "Switch"),
    (".1.3.6.1.4.1.40418.7.234", "SNR", "SNR-S2990G-24FX", "Switch"),
    (".1.3.6.1.4.1.40418.7.43", "SNR", "SNR-S2995G-24FX", "Switch"),
    (".1.3.6.1.4.1.171.10.75.14.1", "D-Link", "DES-1210-10/ME", "Switch"),
    (".1.3.6.1.4.1.171.10.75.15.2", "D-Link", "DES-1210-28/ME", "Switch"),
    (".1.3.6.1.4.1.171.10.75.26.1", "D-Link", "DES-1210-52/ME", "Switch"),
    (".1.3.6.1.4.1.171.10.116.2", "D-Link", "DES-1228/ME", "Switch"),
    (".1.3.6.1.4.1.171.10.63.6", "D-Link", "DES-3028", "Switch"),
    (".1.3.6.1.4.1.171.10.63.8", "D-Link", "DES-3052", "Switch"),
    (".1.3.6.1.4.1.171.10.113.1.5", "D-Link", "DES-3200-26", "Switch"),
    (".1.3.6.1.4.1.171.10.64.1", "D-Link", "DES-3526", "Switch"),
    (".1.3.6.1.4.1.171.10.64.2", "D-Link", "DES-3550", "Switch"),
    (".1.3.6.1.4.1.171.10.94.5", "D-Link", "DGS-3100-24TG", "Switch"),
    (".1.3.6.1.4.1.171.10.59.7", "D-Link", "DXS-3326GSR", "Switch"),
    (".1.3.6.1.4.1.6486.800.1.1.2.2.4.1.1", "Alcatel-Lucent", "OmniStack LS6224", "Switch"),
    (".1.3.6.1.4.1.41970.6.76", "Orion", "Alpha-A10E", "Switch"),
    (".1.3.6.1.4.1.41970.1", "Orion", "Alpha-A26", "Switch"),
    (".1.3.6.1.4.1.2011.2.23.88", "Huawei", "Quidway S2309TP-EI", "Switch"),
    (".1.3.6.1.4.1.2011.2.23.92", "Huawei", "Quidway S2326TP-EI", "Switch"),
    (".1.3.6.1.4.1.2011.2.23.94", "Huawei", "Quidway S2352TP-EI", "Switch"),
    (".1.3.6.1.4.1.2011.2.23.96", "Huawei", "Quidway S5328C-EI-24S", "Switch"),
    (".1.3.6.1.4.1.35265.1.78", "Eltex", "MES2324FB", "Switch"),
    (".1.3.6.1.4.1.25506.11.1.82", "HP", "V1924", "Switch"),
];

/// Canonical dotted form with a leading dot, e.g. ".1.3.6.1.4.1.9"
pub fn normalize_oid(oid: &str) -> String {
    let oid = oid.trim();
    if oid.starts_with('.') || oid.is_empty() {
        oid.to_string()
    } else {
        format!(".{}", oid)
    }
}

/// Read-only identifier table, shared between discovery tasks
#[derive(Debug, Clone, Default)]
pub struct VendorCatalog {
    entries: HashMap<String, CatalogEntry>,
}

impl VendorCatalog {
    /// An empty catalog (MikroTik rules still apply)
    pub fn empty() -> Self {
        Self::default()
    }

    /// The bundled identifier table
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        for (oid, vendor, model, category) in BUILTIN_ENTRIES {
            catalog.insert(oid, CatalogEntry::new(vendor, model, category));
        }
        catalog
    }

    /// Parse a JSON identifier database: `{"<oid>": {"vendor", "model", "category"}}`
    pub fn from_json(content: &str) -> Result<Self, CatalogError> {
        let raw: HashMap<String, CatalogEntry> = serde_json::from_str(content)?;
        let mut catalog = Self::empty();
        for (oid, entry) in raw {
            catalog.insert(&oid, entry);
        }
        Ok(catalog)
    }

    /// Load a JSON identifier database from a file
    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Built-in table with an external database merged on top
    ///
    /// A missing database is not an error; the built-in table is returned.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let mut catalog = Self::builtin();
        if !path.exists() {
            warn!(
                path = %path.display(),
                "Identifier database not found, using built-in catalog only"
            );
            return Ok(catalog);
        }

        let external = Self::from_file(path)?;
        info!(
            path = %path.display(),
            entries = external.len(),
            "Loaded identifier database"
        );
        catalog.merge(external);
        Ok(catalog)
    }

    /// Add or replace a single entry
    pub fn insert(&mut self, oid: &str, entry: CatalogEntry) {
        self.entries.insert(normalize_oid(oid), entry);
    }

    /// Merge another catalog, its entries win on conflict
    pub fn merge(&mut self, other: VendorCatalog) {
        self.entries.extend(other.entries);
    }

    /// Direct table lookup, without the MikroTik rules
    pub fn get(&self, oid: &str) -> Option<&CatalogEntry> {
        self.entries.get(&normalize_oid(oid))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve an object identifier and system description to a classification
    pub fn resolve(&self, object_identifier: &str, description: &str) -> CatalogEntry {
        let oid = normalize_oid(object_identifier);

        if let Some(entry) = resolve_mikrotik(&oid, description) {
            return entry;
        }

        match self.entries.get(&oid) {
            Some(entry) => entry.clone(),
            None => {
                debug!(oid = %oid, "Object identifier not in catalog");
                CatalogEntry::unknown()
            }
        }
    }
}

/// MikroTik devices carry the model in the description
fn resolve_mikrotik(oid: &str, description: &str) -> Option<CatalogEntry> {
    let (model, category) = match oid {
        // "RouterOS RB750GL" -> "RB750GL"
        MIKROTIK_ROUTEROS_OID => (
            description.split_whitespace().skip(1).collect::<String>(),
            "Router",
        ),
        MIKROTIK_SWOS_OID => (description.to_string(), "Switch"),
        _ => return None,
    };

    let model = if model.trim().is_empty() {
        UNKNOWN.to_string()
    } else {
        model
    };

    Some(CatalogEntry {
        vendor: MIKROTIK_VENDOR.to_string(),
        model,
        category: category.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_routeros_strips_prefix() {
        let catalog = VendorCatalog::builtin();
        let entry = catalog.resolve(MIKROTIK_ROUTEROS_OID, "RouterOS RB750GL");
        assert_eq!(entry, CatalogEntry::new("MikroTik", "RB750GL", "Router"));
    }

    #[test]
    fn test_routeros_joins_remaining_tokens() {
        let catalog = VendorCatalog::empty();
        let entry = catalog.resolve(MIKROTIK_ROUTEROS_OID, "RouterOS CCR1009 7G-1C");
        assert_eq!(entry.model, "CCR10097G-1C");
    }

    #[test]
    fn test_swos_keeps_description() {
        let catalog = VendorCatalog::builtin();
        let entry = catalog.resolve(MIKROTIK_SWOS_OID, "RB260GS");
        assert_eq!(entry, CatalogEntry::new("MikroTik", "RB260GS", "Switch"));
    }

    #[test]
    fn test_mikrotik_empty_description() {
        let catalog = VendorCatalog::empty();
        let entry = catalog.resolve(MIKROTIK_ROUTEROS_OID, "RouterOS");
        assert_eq!(entry.model, UNKNOWN);
        assert_eq!(entry.vendor, "MikroTik");

        let entry = catalog.resolve(MIKROTIK_SWOS_OID, "");
        assert_eq!(entry.model, UNKNOWN);
    }

    #[test]
    fn test_mikrotik_takes_precedence_over_table() {
        let mut catalog = VendorCatalog::builtin();
        catalog.insert(MIKROTIK_ROUTEROS_OID, CatalogEntry::new("Other", "X", "Switch"));
        let entry = catalog.resolve(MIKROTIK_ROUTEROS_OID, "RouterOS RB951");
        assert_eq!(entry, CatalogEntry::new("MikroTik", "RB951", "Router"));
    }

    #[test]
    fn test_table_lookup() {
        let catalog = VendorCatalog::builtin();
        let entry = catalog.resolve(".1.3.6.1.4.1.171.10.113.1.5", "ignored");
        assert_eq!(entry, CatalogEntry::new("D-Link", "DES-3200-26", "Switch"));
    }

    #[test]
    fn test_oid_without_leading_dot() {
        let catalog = VendorCatalog::builtin();
        let entry = catalog.resolve("1.3.6.1.4.1.35265.1.78", "");
        assert_eq!(entry.vendor, "Eltex");

        let entry = catalog.resolve("1.3.6.1.4.1.14988.1", "RouterOS hAP");
        assert_eq!(entry.model, "hAP");
    }

    #[test]
    fn test_unknown_identifier() {
        let catalog = VendorCatalog::builtin();
        assert_eq!(catalog.resolve(".1.3.6.1.4.1.9.1.1", "Cisco IOS"), CatalogEntry::unknown());
        assert_eq!(catalog.resolve("", ""), CatalogEntry::unknown());
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let catalog = VendorCatalog::builtin();
        let first = catalog.resolve(MIKROTIK_ROUTEROS_OID, "RouterOS RB750GL");
        let second = catalog.resolve(MIKROTIK_ROUTEROS_OID, "RouterOS RB750GL");
        assert_eq!(first, second);
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            ".1.3.6.1.4.1.9.1.1208": {"vendor": "Cisco", "model": "WS-C2960X-24TS-L", "category": "Switch"},
            "1.3.6.1.4.1.2636.1.1.1.2.57": {"vendor": "Juniper", "model": "MX80", "category": "Router"}
        }"#;
        let catalog = VendorCatalog::from_json(json).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get(".1.3.6.1.4.1.2636.1.1.1.2.57").unwrap().model, "MX80");
    }

    #[test]
    fn test_load_merges_over_builtin() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{".1.3.6.1.4.1.25506.11.1.82": {{"vendor": "HPE", "model": "1920-24G", "category": "Switch"}}}}"#
        )
        .unwrap();

        let catalog = VendorCatalog::load(file.path()).unwrap();
        assert_eq!(catalog.len(), VendorCatalog::builtin().len());
        assert_eq!(catalog.get(".1.3.6.1.4.1.25506.11.1.82").unwrap().vendor, "HPE");
    }

    #[test]
    fn test_load_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = VendorCatalog::load(&dir.path().join("ids.json")).unwrap();
        assert_eq!(catalog.len(), VendorCatalog::builtin().len());
    }

    #[test]
    fn test_load_malformed_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            VendorCatalog::load(file.path()),
            Err(CatalogError::ParseError(_))
        ));
    }
}
