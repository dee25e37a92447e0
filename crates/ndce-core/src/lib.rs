//! NDCE Core - Core types for the network device configuration editor
//!
//! This crate provides the foundational types shared by the other crates:
//! - Device records produced by discovery
//! - Vendor catalog mapping object identifiers to vendor/model/category
//! - Validation errors for caller-supplied input

pub mod catalog;
pub mod device;
pub mod validation;

pub use catalog::{normalize_oid, CatalogEntry, CatalogError, VendorCatalog, UNKNOWN};
pub use device::DeviceRecord;
pub use validation::{parse_commands, ValidationError};
