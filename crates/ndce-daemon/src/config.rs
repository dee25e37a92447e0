//! Configuration loading

use anyhow::Result;
use ndce_discovery::ScannerConfig;
use ndce_snmp::SnmpConfig;
use ndce_telnet::PushConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub snmp: SnmpSection,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub telnet: TelnetConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Identifications in flight at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Largest subnet accepted for a scan
    #[serde(default = "default_max_hosts")]
    pub max_hosts: usize,
    #[serde(default = "default_probe_timeout")]
    pub ping_timeout_ms: u64,
    #[serde(default = "default_ping_retries")]
    pub ping_retries: u32,
    #[serde(default = "default_probe_timeout")]
    pub port_timeout_ms: u64,
    #[serde(default = "default_telnet_port")]
    pub telnet_port: u16,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_hosts: default_max_hosts(),
            ping_timeout_ms: default_probe_timeout(),
            ping_retries: default_ping_retries(),
            port_timeout_ms: default_probe_timeout(),
            telnet_port: default_telnet_port(),
            ssh_port: default_ssh_port(),
        }
    }
}

fn default_max_concurrent() -> usize {
    16
}

fn default_max_hosts() -> usize {
    65_536 // a /16
}

fn default_probe_timeout() -> u64 {
    1000
}

fn default_ping_retries() -> u32 {
    2
}

fn default_telnet_port() -> u16 {
    23
}

fn default_ssh_port() -> u16 {
    22
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnmpSection {
    /// Read community
    #[serde(default = "default_community")]
    pub community: String,
    #[serde(default = "default_snmp_port")]
    pub port: u16,
    /// Timeout per attempt
    #[serde(default = "default_snmp_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_snmp_retries")]
    pub retries: u32,
}

impl Default for SnmpSection {
    fn default() -> Self {
        Self {
            community: default_community(),
            port: default_snmp_port(),
            timeout_ms: default_snmp_timeout(),
            retries: default_snmp_retries(),
        }
    }
}

fn default_community() -> String {
    "public".to_string()
}

fn default_snmp_port() -> u16 {
    161
}

fn default_snmp_timeout() -> u64 {
    5000
}

fn default_snmp_retries() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// External identifier database (JSON)
    #[serde(default = "default_catalog_path")]
    pub path: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: default_catalog_path(),
        }
    }
}

fn default_catalog_path() -> String {
    "./ids.json".to_string()
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TelnetConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_telnet_port")]
    pub port: u16,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
    /// Connect and banner wait
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_probe_timeout")]
    pub read_timeout_ms: u64,
    /// Pause after each login field and command
    #[serde(default = "default_step_delay")]
    pub step_delay_ms: u64,
    /// Cap on concurrent sessions (unbounded when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_sessions: Option<usize>,
}

impl Default for TelnetConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            port: default_telnet_port(),
            probe_timeout_ms: default_probe_timeout(),
            connect_timeout_ms: default_connect_timeout(),
            read_timeout_ms: default_probe_timeout(),
            step_delay_ms: default_step_delay(),
            max_sessions: None,
        }
    }
}

impl std::fmt::Debug for TelnetConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelnetConfig")
            .field("username", &self.username)
            .field("port", &self.port)
            .field("step_delay_ms", &self.step_delay_ms)
            .field("max_sessions", &self.max_sessions)
            .finish_non_exhaustive()
    }
}

fn default_connect_timeout() -> u64 {
    3000
}

fn default_step_delay() -> u64 {
    500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Device inventory file (JSON)
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String {
    "./devices.json".to_string()
}

impl Config {
    /// Convert to ScannerConfig
    pub fn to_scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            max_concurrent: self.discovery.max_concurrent,
            max_hosts: self.discovery.max_hosts,
            ping_timeout_ms: self.discovery.ping_timeout_ms,
            ping_retries: self.discovery.ping_retries,
            port_timeout_ms: self.discovery.port_timeout_ms,
            telnet_port: self.discovery.telnet_port,
            ssh_port: self.discovery.ssh_port,
        }
    }

    /// Convert to SnmpConfig
    pub fn to_snmp_config(&self) -> SnmpConfig {
        SnmpConfig {
            community: self.snmp.community.clone(),
            port: self.snmp.port,
            timeout_ms: self.snmp.timeout_ms,
            retries: self.snmp.retries,
        }
    }

    /// Convert to PushConfig
    pub fn to_push_config(&self) -> PushConfig {
        PushConfig {
            username: self.telnet.username.clone(),
            password: self.telnet.password.clone(),
            port: self.telnet.port,
            probe_timeout_ms: self.telnet.probe_timeout_ms,
            connect_timeout_ms: self.telnet.connect_timeout_ms,
            read_timeout_ms: self.telnet.read_timeout_ms,
            step_delay_ms: self.telnet.step_delay_ms,
            max_sessions: self.telnet.max_sessions,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let config = Config {
        telnet: TelnetConfig {
            username: "admin".to_string(),
            ..TelnetConfig::default()
        },
        ..Config::default()
    };

    let content = toml::to_string_pretty(&config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();

        let scanner = config.to_scanner_config();
        assert_eq!(scanner.max_concurrent, 16);
        assert_eq!(scanner.ping_retries, 2);
        assert_eq!(scanner.telnet_port, 23);
        assert_eq!(scanner.ssh_port, 22);

        let snmp = config.to_snmp_config();
        assert_eq!(snmp.community, "public");
        assert_eq!(snmp.port, 161);
        assert_eq!(snmp.timeout_ms, 5000);

        let push = config.to_push_config();
        assert_eq!(push.step_delay_ms, 500);
        assert!(push.max_sessions.is_none());
    }

    #[test]
    fn test_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ndce.toml");
        std::fs::write(
            &path,
            r#"
[discovery]
max_concurrent = 64

[snmp]
community = "private"

[telnet]
username = "noc"
password = "s3cret"
max_sessions = 4
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.discovery.max_concurrent, 64);
        assert_eq!(config.discovery.port_timeout_ms, 1000);
        assert_eq!(config.to_snmp_config().community, "private");
        assert_eq!(config.to_snmp_config().retries, 2);

        let push = config.to_push_config();
        assert_eq!(push.username, "noc");
        assert_eq!(push.password, "s3cret");
        assert_eq!(push.max_sessions, Some(4));
        assert_eq!(push.port, 23);
        assert_eq!(config.store.path, "./devices.json");
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ndce.toml");
        std::fs::write(&path, "[discovery\nmax_concurrent = ").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_default_config_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ndce.toml");
        save_default_config(&path).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.telnet.username, "admin");
        assert_eq!(config.catalog.path, "./ids.json");
        assert_eq!(config.discovery.max_hosts, 65_536);
    }

    #[test]
    fn test_debug_hides_password() {
        let telnet = TelnetConfig {
            password: "hunter2".to_string(),
            ..TelnetConfig::default()
        };
        assert!(!format!("{:?}", telnet).contains("hunter2"));
    }
}
