//! NDCE - Main entry point
//!
//! Discovers devices on a subnet, keeps the inventory on disk and pushes
//! configuration commands to selected devices over telnet.

mod config;
mod store;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use ndce_core::{parse_commands, DeviceRecord, VendorCatalog};
use ndce_discovery::{
    is_port_open, is_reachable, DiscoveryEvent, DiscoveryReport, DiscoveryRequest,
    DiscoveryScanner,
};
use ndce_telnet::CommandPusher;
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::Config;
use crate::store::DeviceStore;

#[derive(Parser, Debug)]
#[command(name = "ndce")]
#[command(about = "Network device discovery and configuration push")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "ndce.toml", global = true)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Write a default configuration file and exit
    #[arg(long)]
    init_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan a subnet and add new devices to the inventory
    Discover {
        /// Subnet in CIDR notation, e.g. 192.168.1.0/24
        subnet: String,

        /// Identifications in flight at once
        #[arg(short = 'j', long)]
        max_concurrent: Option<usize>,
    },
    /// Check reachability and management ports of one address
    Probe { address: String },
    /// List devices in the inventory
    Devices,
    /// Send commands to devices over telnet
    Push {
        /// Target address (repeatable)
        #[arg(short, long = "target", conflicts_with = "all")]
        targets: Vec<IpAddr>,

        /// Target every device in the inventory
        #[arg(long)]
        all: bool,

        /// Command to send (repeatable, sent in order)
        #[arg(long = "command", conflicts_with = "commands_file")]
        commands: Vec<String>,

        /// File with one command per line
        #[arg(long)]
        commands_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if args.init_config {
        config::save_default_config(&args.config)?;
        println!("Wrote default configuration to {}", args.config.display());
        return Ok(());
    }

    let Some(command) = args.command else {
        Args::command().print_help()?;
        return Ok(());
    };

    info!("NDCE v{}", env!("CARGO_PKG_VERSION"));
    let config = config::load_config(&args.config)?;

    match command {
        Command::Discover {
            subnet,
            max_concurrent,
        } => discover(&config, subnet, max_concurrent).await,
        Command::Probe { address } => probe(&config, &address).await,
        Command::Devices => list_devices(&config),
        Command::Push {
            targets,
            all,
            commands,
            commands_file,
        } => push(&config, &targets, all, commands, commands_file.as_deref()).await,
    }
}

/// Load the identifier database, falling back to the built-in table
fn load_catalog(path: &Path) -> VendorCatalog {
    match VendorCatalog::load(path) {
        Ok(catalog) => catalog,
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Failed to load identifier database, using built-in table"
            );
            VendorCatalog::builtin()
        }
    }
}

/// Cancel `token` on the first Ctrl-C
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling");
            token.cancel();
        }
    });
}

fn print_device(record: &DeviceRecord) {
    println!(
        "  {:<16} {:<20} {:<16} {:<20} {:<8} telnet={} ssh={}",
        record.address,
        record.hostname,
        record.vendor,
        record.model,
        record.category,
        if record.remote_shell_open { "open" } else { "closed" },
        if record.secure_shell_open { "open" } else { "closed" },
    );
}

/// Print discovery events until the channel closes, returning the addresses shown
async fn print_events(mut events: broadcast::Receiver<DiscoveryEvent>) -> HashSet<IpAddr> {
    let mut printed = HashSet::new();
    loop {
        match events.recv().await {
            Ok(DiscoveryEvent::ScanStarted { subnet, candidates }) => {
                println!("Scanning {} ({} addresses)", subnet, candidates);
            }
            Ok(DiscoveryEvent::DeviceDiscovered(record)) => {
                print_device(&record);
                printed.insert(record.address);
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped = skipped, "Event display fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
    printed
}

/// Devices of a finished scan that the event display never showed
fn missed_devices<'a>(
    report: &'a DiscoveryReport,
    printed: &'a HashSet<IpAddr>,
) -> impl Iterator<Item = &'a DeviceRecord> {
    report
        .devices
        .iter()
        .filter(move |record| !printed.contains(&record.address))
}

async fn discover(config: &Config, subnet: String, max_concurrent: Option<usize>) -> Result<()> {
    let mut store = DeviceStore::load(&config.store.path)?;
    let catalog = Arc::new(load_catalog(Path::new(&config.catalog.path)));
    info!(entries = catalog.len(), "Identifier catalog ready");

    let scanner = DiscoveryScanner::with_network(
        config.to_scanner_config(),
        config.to_snmp_config(),
        catalog,
    );

    let mut request = DiscoveryRequest::new(subnet).with_known(store.known_addresses());
    if let Some(limit) = max_concurrent {
        request = request.with_max_concurrent(limit);
    }

    // Print devices as they are found; ends when the scanner is dropped
    let printer = tokio::spawn(print_events(scanner.subscribe()));

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let result = scanner.scan(request, cancel).await;
    drop(scanner);
    let printed = printer.await.unwrap_or_default();
    let report = result?;
    for record in missed_devices(&report, &printed) {
        print_device(record);
    }

    let added = store.extend(report.devices.iter().cloned());
    store.save()?;

    println!(
        "Discovered {} devices ({} addresses) in {:.1}s{}",
        report.count(),
        report.attempted,
        report.elapsed.as_secs_f64(),
        if report.cancelled { ", cancelled" } else { "" },
    );
    info!(added = added, total = store.len(), "Device store updated");
    Ok(())
}

async fn probe(config: &Config, address: &str) -> Result<()> {
    let discovery = &config.discovery;
    let port_timeout = Duration::from_millis(discovery.port_timeout_ms);

    let (reachable, telnet, ssh) = tokio::join!(
        is_reachable(
            address,
            Duration::from_millis(discovery.ping_timeout_ms),
            discovery.ping_retries,
        ),
        is_port_open(address, discovery.telnet_port, port_timeout),
        is_port_open(address, discovery.ssh_port, port_timeout),
    );

    println!("{}", address);
    println!("  reachable: {}", reachable);
    println!("  telnet ({}): {}", discovery.telnet_port, if telnet { "open" } else { "closed" });
    println!("  ssh ({}): {}", discovery.ssh_port, if ssh { "open" } else { "closed" });
    Ok(())
}

fn list_devices(config: &Config) -> Result<()> {
    let store = DeviceStore::load(&config.store.path)?;
    if store.is_empty() {
        println!("No devices in {}", store.path().display());
        return Ok(());
    }

    println!("{} devices:", store.len());
    for record in store.devices() {
        print_device(record);
    }
    Ok(())
}

async fn push(
    config: &Config,
    targets: &[IpAddr],
    all: bool,
    commands: Vec<String>,
    commands_file: Option<&Path>,
) -> Result<()> {
    let store = DeviceStore::load(&config.store.path)?;
    let targets = store.select_targets(targets, all);

    let text = match commands_file {
        Some(path) => std::fs::read_to_string(path)?,
        None => commands.join("\n"),
    };
    let commands = parse_commands(&text)?;

    let push_config = config.to_push_config();
    if push_config.username.is_empty() {
        warn!("No telnet username configured");
    }

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let pusher = CommandPusher::new(push_config);
    let report = pusher.push(&targets, &commands, cancel).await?;

    for outcome in &report.outcomes {
        println!(
            "  {:<16} {:<24} {} commands sent",
            outcome.address,
            outcome.state.to_string(),
            outcome.commands_sent
        );
    }
    println!(
        "Pushed {} commands to {} targets ({} succeeded{})",
        report.command_count,
        report.target_count,
        report.succeeded(),
        if report.cancelled { ", cancelled" } else { "" },
    );
    Ok(())
}
