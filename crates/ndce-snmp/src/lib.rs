//! NDCE SNMP - Management-protocol queries used to identify devices
//!
//! Only the system group is read: sysName, sysDescr and sysObjectID,
//! fetched in a single batched request.

pub mod query;

pub use query::{query_system, QueryError, SnmpConfig, SystemInfo, SNMP_PORT};
