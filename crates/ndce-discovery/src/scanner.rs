//! Discovery scanner that fans identification out across a subnet

use ndce_core::{DeviceRecord, ValidationError, VendorCatalog};
use ndce_snmp::SnmpConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::identify::{identify, ShellPorts};
use crate::probe::{DeviceProbe, NetworkProbe};
use crate::subnet::{hosts, validate_subnet, DEFAULT_MAX_HOSTS};

/// Scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Identification operations allowed in flight at once
    pub max_concurrent: usize,
    /// Largest subnet accepted for a scan
    pub max_hosts: usize,
    /// ICMP echo timeout per attempt
    pub ping_timeout_ms: u64,
    /// ICMP echo attempts
    pub ping_retries: u32,
    /// TCP connect timeout for port probes
    pub port_timeout_ms: u64,
    /// Remote-shell (telnet) port
    pub telnet_port: u16,
    /// Secure-shell port
    pub ssh_port: u16,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 16,
            max_hosts: DEFAULT_MAX_HOSTS,
            ping_timeout_ms: 1000,
            ping_retries: 2,
            port_timeout_ms: 1000,
            telnet_port: 23,
            ssh_port: 22,
        }
    }
}

impl ScannerConfig {
    fn shell_ports(&self) -> ShellPorts {
        ShellPorts {
            telnet: self.telnet_port,
            ssh: self.ssh_port,
        }
    }
}

/// Discovery event for progressive updates
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// Scan started against `candidates` addresses
    ScanStarted { subnet: String, candidates: usize },
    /// New device identified
    DeviceDiscovered(DeviceRecord),
    /// Scan ran to completion
    ScanCompleted { found: usize, elapsed: Duration },
    /// Scan was cancelled by the caller
    ScanCancelled { found: usize },
}

/// A single discovery run, owned by the caller
#[derive(Debug, Clone, Default)]
pub struct DiscoveryRequest {
    /// CIDR subnet to scan
    pub subnet: String,
    /// Addresses already in the caller's store; never emitted again
    pub known: HashSet<IpAddr>,
    /// Overrides `ScannerConfig::max_concurrent`
    pub max_concurrent: Option<usize>,
}

impl DiscoveryRequest {
    pub fn new(subnet: impl Into<String>) -> Self {
        Self {
            subnet: subnet.into(),
            ..Default::default()
        }
    }

    pub fn with_known(mut self, known: impl IntoIterator<Item = IpAddr>) -> Self {
        self.known = known.into_iter().collect();
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = Some(max_concurrent);
        self
    }
}

/// Outcome of a discovery run
#[derive(Debug, Clone)]
pub struct DiscoveryReport {
    /// Newly identified devices, in completion order
    pub devices: Vec<DeviceRecord>,
    /// Addresses enumerated from the subnet
    pub attempted: usize,
    pub elapsed: Duration,
    pub cancelled: bool,
}

impl DiscoveryReport {
    pub fn count(&self) -> usize {
        self.devices.len()
    }
}

/// Discovery scanner service
///
/// Holds no device list of its own; results go to the caller through the
/// returned report and the event channel.
pub struct DiscoveryScanner {
    config: ScannerConfig,
    probe: Arc<dyn DeviceProbe>,
    catalog: Arc<VendorCatalog>,
    event_tx: broadcast::Sender<DiscoveryEvent>,
}

impl DiscoveryScanner {
    /// Create a scanner with a custom probe
    pub fn new(
        config: ScannerConfig,
        probe: Arc<dyn DeviceProbe>,
        catalog: Arc<VendorCatalog>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            probe,
            catalog,
            event_tx,
        }
    }

    /// Create a scanner that probes the real network
    pub fn with_network(
        config: ScannerConfig,
        snmp: SnmpConfig,
        catalog: Arc<VendorCatalog>,
    ) -> Self {
        let probe = Arc::new(NetworkProbe::new(&config, snmp));
        Self::new(config, probe, catalog)
    }

    /// Subscribe to discovery events
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.event_tx.subscribe()
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Run one discovery scan
    ///
    /// Input is validated before any network activity. Cancelling `cancel`
    /// aborts all outstanding identifications; the report then holds whatever
    /// was found up to that point.
    pub async fn scan(
        &self,
        request: DiscoveryRequest,
        cancel: CancellationToken,
    ) -> Result<DiscoveryReport, ValidationError> {
        let max_concurrent = request.max_concurrent.unwrap_or(self.config.max_concurrent);
        if max_concurrent == 0 {
            return Err(ValidationError::InvalidConcurrency);
        }
        let max_concurrent = max_concurrent.min(Semaphore::MAX_PERMITS);
        let network = validate_subnet(&request.subnet, self.config.max_hosts)?;

        let started = Instant::now();
        let candidates = hosts(&network);
        let attempted = candidates.len();

        info!(
            subnet = %network,
            candidates = attempted,
            max_concurrent = max_concurrent,
            known = request.known.len(),
            "Starting discovery scan"
        );
        let _ = self.event_tx.send(DiscoveryEvent::ScanStarted {
            subnet: network.to_string(),
            candidates: attempted,
        });

        // One gate for the whole run
        let gate = Arc::new(Semaphore::new(max_concurrent));
        let ports = self.config.shell_ports();
        let mut tasks = JoinSet::new();

        for ip in candidates {
            let gate = Arc::clone(&gate);
            let probe = Arc::clone(&self.probe);
            let catalog = Arc::clone(&self.catalog);
            tasks.spawn(async move { identify(ip, &gate, probe.as_ref(), &catalog, ports).await });
        }

        let mut devices = Vec::new();
        let mut emitted: HashSet<IpAddr> = HashSet::new();
        let mut cancelled = false;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok(Some(record))) => {
                        if request.known.contains(&record.address) {
                            debug!(ip = %record.address, "Skipping already known device");
                            continue;
                        }
                        if !emitted.insert(record.address) {
                            continue;
                        }
                        info!(
                            ip = %record.address,
                            vendor = %record.vendor,
                            model = %record.model,
                            "Found device"
                        );
                        let _ = self.event_tx.send(DiscoveryEvent::DeviceDiscovered(record.clone()));
                        devices.push(record);
                    }
                    Some(Ok(None)) => {}
                    Some(Err(e)) if e.is_cancelled() => {}
                    Some(Err(e)) => warn!(error = %e, "Identification task failed"),
                },
            }
        }

        if cancelled {
            // Dropping the aborted futures closes their sockets
            gate.close();
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}

            info!(found = devices.len(), "Discovery scan cancelled");
            let _ = self.event_tx.send(DiscoveryEvent::ScanCancelled {
                found: devices.len(),
            });
        } else {
            info!(
                found = devices.len(),
                attempted = attempted,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Discovery scan complete"
            );
            let _ = self.event_tx.send(DiscoveryEvent::ScanCompleted {
                found: devices.len(),
                elapsed: started.elapsed(),
            });
        }

        Ok(DiscoveryReport {
            devices,
            attempted,
            elapsed: started.elapsed(),
            cancelled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ndce_snmp::SystemInfo;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Fake network: only listed hosts answer, every call takes `delay`
    #[derive(Default)]
    struct FakeProbe {
        devices: HashMap<IpAddr, SystemInfo>,
        open_ports: HashMap<IpAddr, Vec<u16>>,
        delay: Duration,
        /// Calls in progress per address
        active: Mutex<HashMap<IpAddr, usize>>,
        /// Most addresses with a call in progress at once
        peak: AtomicUsize,
        echoes: AtomicUsize,
    }

    impl FakeProbe {
        fn with_device(mut self, ip: IpAddr, info: SystemInfo) -> Self {
            self.devices.insert(ip, info);
            self
        }

        fn with_ports(mut self, ip: IpAddr, ports: Vec<u16>) -> Self {
            self.open_ports.insert(ip, ports);
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        /// Simulate one network call against `ip`
        async fn work(&self, ip: IpAddr) {
            {
                let mut active = self.active.lock().unwrap();
                *active.entry(ip).or_default() += 1;
                self.peak.fetch_max(active.len(), Ordering::SeqCst);
            }
            tokio::time::sleep(self.delay).await;

            let mut active = self.active.lock().unwrap();
            if let Some(calls) = active.get_mut(&ip) {
                *calls -= 1;
                if *calls == 0 {
                    active.remove(&ip);
                }
            }
        }
    }

    #[async_trait]
    impl DeviceProbe for FakeProbe {
        async fn is_reachable(&self, ip: IpAddr) -> bool {
            self.echoes.fetch_add(1, Ordering::SeqCst);
            self.work(ip).await;
            self.devices.contains_key(&ip)
        }

        async fn query_system(&self, ip: IpAddr) -> Option<SystemInfo> {
            self.work(ip).await;
            self.devices.get(&ip).cloned()
        }

        async fn is_port_open(&self, ip: IpAddr, port: u16) -> bool {
            self.work(ip).await;
            self.open_ports
                .get(&ip)
                .map(|ports| ports.contains(&port))
                .unwrap_or(false)
        }
    }

    fn v4(d: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, d))
    }

    fn switch(name: &str) -> SystemInfo {
        SystemInfo {
            name: Some(name.to_string()),
            description: Some("D-Link DES-3200-26 Fast Ethernet Switch".to_string()),
            object_identifier: Some(".1.3.6.1.4.1.171.10.113.1.5".to_string()),
        }
    }

    fn scanner(probe: Arc<FakeProbe>) -> DiscoveryScanner {
        DiscoveryScanner::new(
            ScannerConfig::default(),
            probe,
            Arc::new(VendorCatalog::builtin()),
        )
    }

    #[tokio::test]
    async fn test_all_hosts_unreachable() {
        let probe = Arc::new(FakeProbe::default());
        let report = scanner(probe.clone())
            .scan(DiscoveryRequest::new("10.0.0.0/30"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.count(), 0);
        assert_eq!(report.attempted, 2);
        assert!(!report.cancelled);
        assert_eq!(probe.echoes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_identifies_routeros_device() {
        let info = SystemInfo {
            name: Some("gw".to_string()),
            description: Some("RouterOS RB750GL".to_string()),
            object_identifier: Some(".1.3.6.1.4.1.14988.1".to_string()),
        };
        let probe = Arc::new(
            FakeProbe::default()
                .with_device(v4(5), info)
                .with_ports(v4(5), vec![22, 23]),
        );
        let report = scanner(probe)
            .scan(DiscoveryRequest::new("10.0.0.0/29"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.count(), 1);
        let record = &report.devices[0];
        assert_eq!(record.address, v4(5));
        assert_eq!(record.vendor, "MikroTik");
        assert_eq!(record.model, "RB750GL");
        assert_eq!(record.category, "Router");
        assert!(record.remote_shell_open);
        assert!(record.secure_shell_open);
    }

    #[tokio::test]
    async fn test_known_addresses_not_emitted() {
        let probe = Arc::new(
            FakeProbe::default()
                .with_device(v4(1), switch("sw1"))
                .with_device(v4(2), switch("sw2")),
        );
        let scanner = scanner(probe);
        let mut events = scanner.subscribe();

        let request = DiscoveryRequest::new("10.0.0.0/29").with_known([v4(1)]);
        let report = scanner.scan(request, CancellationToken::new()).await.unwrap();

        assert_eq!(report.count(), 1);
        assert_eq!(report.devices[0].address, v4(2));
        assert_eq!(report.devices[0].model, "DES-3200-26");

        while let Ok(event) = events.try_recv() {
            if let DiscoveryEvent::DeviceDiscovered(record) = event {
                assert_ne!(record.address, v4(1));
            }
        }
    }

    #[tokio::test]
    async fn test_repeated_scans_are_stable() {
        let probe = Arc::new(
            FakeProbe::default()
                .with_device(v4(3), switch("sw3"))
                .with_device(v4(9), switch("sw9")),
        );
        let scanner = scanner(probe);

        let mut first: Vec<_> = scanner
            .scan(DiscoveryRequest::new("10.0.0.0/28"), CancellationToken::new())
            .await
            .unwrap()
            .devices;
        let mut second: Vec<_> = scanner
            .scan(DiscoveryRequest::new("10.0.0.0/28"), CancellationToken::new())
            .await
            .unwrap()
            .devices;

        first.sort_by_key(|r| r.address);
        second.sort_by_key(|r| r.address);
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrency_bound() {
        // Every host answers, so each identification spans ping, SNMP and both ports
        let probe = (1..=62).fold(
            FakeProbe::default().with_delay(Duration::from_millis(20)),
            |probe, d| {
                probe
                    .with_device(v4(d), switch(&format!("sw{}", d)))
                    .with_ports(v4(d), vec![23])
            },
        );
        let probe = Arc::new(probe);
        let request = DiscoveryRequest::new("10.0.0.0/26").with_max_concurrent(4);
        let report = scanner(probe.clone())
            .scan(request, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.attempted, 62);
        assert_eq!(report.count(), 62);
        assert!(report.devices.iter().all(|r| r.remote_shell_open));
        assert_eq!(probe.echoes.load(Ordering::SeqCst), 62);
        let peak = probe.peak.load(Ordering::SeqCst);
        assert!(peak <= 4, "peak concurrency {} exceeded limit", peak);
        assert!(peak > 1);
        assert!(probe.active.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_huge_concurrency_limit_is_clamped() {
        let probe = Arc::new(FakeProbe::default().with_device(v4(1), switch("sw1")));
        let request = DiscoveryRequest::new("10.0.0.0/30").with_max_concurrent(usize::MAX);
        let report = scanner(probe)
            .scan(request, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.count(), 1);
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_events_stream_progressively() {
        let probe = Arc::new(FakeProbe::default().with_device(v4(2), switch("sw2")));
        let scanner = scanner(probe);
        let mut events = scanner.subscribe();

        scanner
            .scan(DiscoveryRequest::new("10.0.0.0/30"), CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(
            events.recv().await.unwrap(),
            DiscoveryEvent::ScanStarted { candidates: 2, .. }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            DiscoveryEvent::DeviceDiscovered(record) if record.address == v4(2)
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            DiscoveryEvent::ScanCompleted { found: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_cancellation_stops_scan() {
        let probe = Arc::new(
            FakeProbe::default()
                .with_device(v4(1), switch("sw1"))
                .with_delay(Duration::from_secs(30)),
        );
        let scanner = scanner(probe);
        let mut events = scanner.subscribe();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
            trigger.cancel();
        });

        let report = tokio::time::timeout(
            Duration::from_secs(5),
            scanner.scan(DiscoveryRequest::new("10.0.0.0/24"), cancel),
        )
        .await
        .expect("scan did not stop after cancellation")
        .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.count(), 0);

        let mut saw_cancelled = false;
        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, DiscoveryEvent::DeviceDiscovered(_)));
            saw_cancelled |= matches!(event, DiscoveryEvent::ScanCancelled { found: 0 });
        }
        assert!(saw_cancelled);
    }

    #[tokio::test]
    async fn test_validation_before_network() {
        let probe = Arc::new(FakeProbe::default());
        let scanner = scanner(probe.clone());

        let result = scanner
            .scan(DiscoveryRequest::new("10.0.0.0/33"), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ValidationError::InvalidSubnet(_))));

        let result = scanner
            .scan(DiscoveryRequest::new("10.0.0.5/30"), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ValidationError::InvalidSubnet(_))));

        let result = scanner
            .scan(
                DiscoveryRequest::new("10.0.0.0/24").with_max_concurrent(0),
                CancellationToken::new(),
            )
            .await;
        assert_eq!(result.unwrap_err(), ValidationError::InvalidConcurrency);

        let result = scanner
            .scan(DiscoveryRequest::new("10.0.0.0/8"), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ValidationError::SubnetTooLarge { .. })));

        assert_eq!(probe.echoes.load(Ordering::SeqCst), 0);
    }
}
