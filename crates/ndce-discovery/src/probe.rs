//! Reachability and port probing

use async_trait::async_trait;
use ndce_snmp::{query_system, SnmpConfig, SystemInfo};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use surge_ping::{Client, Config, PingIdentifier, PingSequence, ICMP};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::scanner::ScannerConfig;

/// Pause between echo attempts
const RETRY_DELAY_MS: u64 = 100;

const ECHO_PAYLOAD: [u8; 56] = [0; 56];

static NEXT_IDENTIFIER: AtomicU16 = AtomicU16::new(1);

/// ICMP echo sender
///
/// Uses unprivileged/raw ICMP sockets when the process may open them and falls
/// back to the system `ping` utility otherwise. Must be created inside a Tokio
/// runtime.
#[derive(Clone)]
pub struct Pinger {
    v4: Option<Client>,
    v6: Option<Client>,
}

impl Pinger {
    pub fn new() -> Self {
        let v4 = match Client::new(&Config::default()) {
            Ok(client) => Some(client),
            Err(e) => {
                warn!(error = %e, "ICMPv4 socket unavailable, falling back to system ping");
                None
            }
        };
        let v6 = match Client::new(&Config::builder().kind(ICMP::V6).build()) {
            Ok(client) => Some(client),
            Err(e) => {
                debug!(error = %e, "ICMPv6 socket unavailable, falling back to system ping");
                None
            }
        };
        Self { v4, v6 }
    }

    /// Pinger that always shells out to `ping`
    pub fn system() -> Self {
        Self { v4: None, v6: None }
    }

    /// Send one echo request, true if a reply arrives within `timeout_dur`
    pub async fn echo(&self, ip: IpAddr, timeout_dur: Duration, sequence: u16) -> bool {
        let client = match ip {
            IpAddr::V4(_) => self.v4.as_ref(),
            IpAddr::V6(_) => self.v6.as_ref(),
        };

        match client {
            Some(client) => {
                let identifier = PingIdentifier(NEXT_IDENTIFIER.fetch_add(1, Ordering::Relaxed));
                let mut pinger = client.pinger(ip, identifier).await;
                pinger.timeout(timeout_dur);
                pinger
                    .ping(PingSequence(sequence), &ECHO_PAYLOAD)
                    .await
                    .is_ok()
            }
            None => system_ping(ip, timeout_dur).await,
        }
    }

    /// Echo with retries, pausing briefly between attempts
    pub async fn ping_with_retry(&self, ip: IpAddr, timeout_dur: Duration, retries: u32) -> bool {
        let attempts = retries.max(1);
        for attempt in 0..attempts {
            if self.echo(ip, timeout_dur, attempt as u16).await {
                trace!(ip = %ip, attempt = attempt, "Echo reply received");
                return true;
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS)).await;
            }
        }
        false
    }
}

impl Default for Pinger {
    fn default() -> Self {
        Self::new()
    }
}

async fn system_ping(ip: IpAddr, timeout_dur: Duration) -> bool {
    let wait_secs = timeout_dur.as_secs().max(1).to_string();
    let family = if ip.is_ipv6() { "-6" } else { "-4" };
    let ip = ip.to_string();

    let output = tokio::process::Command::new("ping")
        .args([family, "-c", "1", "-W", &wait_secs, &ip])
        .kill_on_drop(true)
        .output();

    match timeout(timeout_dur + Duration::from_secs(1), output).await {
        Ok(Ok(output)) => output.status.success(),
        _ => false,
    }
}

/// Check whether a host answers ICMP echo
///
/// Invalid addresses return false without touching the network.
pub async fn is_reachable(address: &str, timeout_dur: Duration, retries: u32) -> bool {
    let ip: IpAddr = match address.trim().parse() {
        Ok(ip) => ip,
        Err(_) => {
            debug!(address = %address, "Not a valid IP address");
            return false;
        }
    };
    Pinger::new().ping_with_retry(ip, timeout_dur, retries).await
}

/// Check whether a TCP port accepts connections within `timeout_dur`
pub async fn port_open(ip: IpAddr, port: u16, timeout_dur: Duration) -> bool {
    if port == 0 {
        return false;
    }
    let addr = SocketAddr::new(ip, port);
    match timeout(timeout_dur, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(e)) => {
            trace!(addr = %addr, error = %e, "Port closed");
            false
        }
        Err(_) => {
            trace!(addr = %addr, "Port probe timed out");
            false
        }
    }
}

/// Check whether `address:port` accepts TCP connections; never fails
pub async fn is_port_open(address: &str, port: u16, timeout_dur: Duration) -> bool {
    match address.trim().parse::<IpAddr>() {
        Ok(ip) => port_open(ip, port, timeout_dur).await,
        Err(_) => false,
    }
}

/// Network operations needed to identify a device
#[async_trait]
pub trait DeviceProbe: Send + Sync {
    /// ICMP reachability with retries
    async fn is_reachable(&self, ip: IpAddr) -> bool;

    /// Batched system-group query, `None` on any soft failure
    async fn query_system(&self, ip: IpAddr) -> Option<SystemInfo>;

    /// TCP connect probe
    async fn is_port_open(&self, ip: IpAddr, port: u16) -> bool;
}

/// Probe backed by real ICMP, SNMP and TCP
pub struct NetworkProbe {
    pinger: Pinger,
    ping_timeout: Duration,
    ping_retries: u32,
    port_timeout: Duration,
    snmp: SnmpConfig,
}

impl NetworkProbe {
    pub fn new(config: &ScannerConfig, snmp: SnmpConfig) -> Self {
        Self::with_pinger(Pinger::new(), config, snmp)
    }

    pub fn with_pinger(pinger: Pinger, config: &ScannerConfig, snmp: SnmpConfig) -> Self {
        Self {
            pinger,
            ping_timeout: Duration::from_millis(config.ping_timeout_ms),
            ping_retries: config.ping_retries,
            port_timeout: Duration::from_millis(config.port_timeout_ms),
            snmp,
        }
    }
}

#[async_trait]
impl DeviceProbe for NetworkProbe {
    async fn is_reachable(&self, ip: IpAddr) -> bool {
        self.pinger
            .ping_with_retry(ip, self.ping_timeout, self.ping_retries)
            .await
    }

    async fn query_system(&self, ip: IpAddr) -> Option<SystemInfo> {
        match query_system(ip, &self.snmp).await {
            Ok(info) => Some(info),
            Err(e) => {
                debug!(ip = %ip, error = %e, "SNMP query failed");
                None
            }
        }
    }

    async fn is_port_open(&self, ip: IpAddr, port: u16) -> bool {
        port_open(ip, port, self.port_timeout).await
    }
}
