//! System-group queries using SNMP v2c

use ndce_core::normalize_oid;
use serde::{Deserialize, Serialize};
use snmp2::{AsyncSession, Oid, Value};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, trace};

/// SNMP agent port
pub const SNMP_PORT: u16 = 161;

/// Default timeout per request attempt
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

const OID_SYS_DESCR: &[u64] = &[1, 3, 6, 1, 2, 1, 1, 1, 0];
const OID_SYS_OBJECT_ID: &[u64] = &[1, 3, 6, 1, 2, 1, 1, 2, 0];
const OID_SYS_NAME: &[u64] = &[1, 3, 6, 1, 2, 1, 1, 5, 0];

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Invalid community string")]
    InvalidCommunity,
    #[error("Invalid object identifier")]
    InvalidOid,
    #[error("Failed to open session to {0}: {1}")]
    Session(SocketAddr, std::io::Error),
    #[error("No response from {0} after {1} attempts")]
    Timeout(IpAddr, u32),
    #[error("Request to {0} failed: {1}")]
    RequestFailed(IpAddr, String),
}

/// SNMP client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnmpConfig {
    /// Read community
    pub community: String,
    /// Agent port
    pub port: u16,
    /// Timeout per attempt in milliseconds
    pub timeout_ms: u64,
    /// Additional attempts after the first one times out
    pub retries: u32,
}

impl Default for SnmpConfig {
    fn default() -> Self {
        Self {
            community: "public".to_string(),
            port: SNMP_PORT,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retries: 2,
        }
    }
}

impl SnmpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Identifying values read from a device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemInfo {
    /// sysName
    pub name: Option<String>,
    /// sysDescr
    pub description: Option<String>,
    /// sysObjectID in canonical dotted form
    pub object_identifier: Option<String>,
}

impl SystemInfo {
    /// A device is identified by its object identifier or its name
    pub fn is_usable(&self) -> bool {
        self.object_identifier.is_some() || self.name.is_some()
    }
}

/// Query sysName, sysDescr and sysObjectID in one request
pub async fn query_system(ip: IpAddr, config: &SnmpConfig) -> Result<SystemInfo, QueryError> {
    if config.community.trim().is_empty() {
        return Err(QueryError::InvalidCommunity);
    }

    let sys_name = Oid::from(OID_SYS_NAME).map_err(|_| QueryError::InvalidOid)?;
    let sys_descr = Oid::from(OID_SYS_DESCR).map_err(|_| QueryError::InvalidOid)?;
    let sys_object_id = Oid::from(OID_SYS_OBJECT_ID).map_err(|_| QueryError::InvalidOid)?;

    let target = SocketAddr::new(ip, config.port);
    let addr = target.to_string();
    let timeout_dur = config.timeout();

    let mut session = match timeout(
        timeout_dur,
        AsyncSession::new_v2c(&addr, config.community.as_bytes(), 0),
    )
    .await
    {
        Ok(Ok(session)) => session,
        Ok(Err(e)) => return Err(QueryError::Session(target, e)),
        Err(_) => return Err(QueryError::Timeout(ip, 1)),
    };

    let attempts = config.retries.saturating_add(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        trace!(ip = %ip, attempt = attempt, "Sending SNMP system query");

        let response = match timeout(
            timeout_dur,
            session.get_many(&[&sys_name, &sys_descr, &sys_object_id]),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                debug!(ip = %ip, attempt = attempt, error = ?e, "SNMP request failed");
                last_error = Some(format!("{:?}", e));
                continue;
            }
            Err(_) => {
                trace!(ip = %ip, attempt = attempt, "SNMP request timed out");
                continue;
            }
        };

        let mut info = SystemInfo::default();
        for (name, value) in response.varbinds {
            let text = decode_value(&value);
            if name == sys_name {
                info.name = text;
            } else if name == sys_descr {
                info.description = text;
            } else if name == sys_object_id {
                info.object_identifier = text.map(|oid| normalize_oid(&oid));
            } else {
                trace!(ip = %ip, oid = %name, "Ignoring unexpected varbind");
            }
        }

        debug!(
            ip = %ip,
            name = ?info.name,
            object_identifier = ?info.object_identifier,
            "SNMP system query answered"
        );
        return Ok(info);
    }

    match last_error {
        Some(e) => Err(QueryError::RequestFailed(ip, e)),
        None => Err(QueryError::Timeout(ip, attempts)),
    }
}

/// Render a varbind value as text
///
/// Octet strings are decoded as UTF-8 (lossy); other types fall back to
/// their debug representation. Missing values yield `None`.
fn decode_value(value: &Value) -> Option<String> {
    let text = match value {
        Value::OctetString(bytes) => String::from_utf8_lossy(bytes).trim().to_string(),
        Value::ObjectIdentifier(oid) => oid.to_string(),
        Value::Null | Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView => {
            return None
        }
        other => format!("{:?}", other),
    };

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
