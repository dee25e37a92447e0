//! Concurrent command push to selected devices

use ndce_core::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::session::{CommandSession, SessionError, SessionOutcome};

/// Telnet push settings, shared by every session of a process
#[derive(Clone, Serialize, Deserialize)]
pub struct PushConfig {
    pub username: String,
    pub password: String,
    /// Remote-shell port
    pub port: u16,
    /// Port check before connecting
    pub probe_timeout_ms: u64,
    /// TCP connect and banner wait
    pub connect_timeout_ms: u64,
    /// Bound on each read and write
    pub read_timeout_ms: u64,
    /// Pause after each login field and command
    pub step_delay_ms: u64,
    /// Optional cap on concurrent sessions
    pub max_sessions: Option<usize>,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            port: 23,
            probe_timeout_ms: 1000,
            connect_timeout_ms: 3000,
            read_timeout_ms: 1000,
            step_delay_ms: 500,
            max_sessions: None,
        }
    }
}

impl fmt::Debug for PushConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .field("probe_timeout_ms", &self.probe_timeout_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("read_timeout_ms", &self.read_timeout_ms)
            .field("step_delay_ms", &self.step_delay_ms)
            .field("max_sessions", &self.max_sessions)
            .finish()
    }
}

impl PushConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }
}

/// Result of a push across all targets
#[derive(Debug, Clone)]
pub struct PushReport {
    /// One outcome per distinct target, in selection order
    pub outcomes: Vec<SessionOutcome>,
    pub command_count: usize,
    pub target_count: usize,
    pub cancelled: bool,
}

impl PushReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Pushes a command list to many devices at once
pub struct CommandPusher {
    config: Arc<PushConfig>,
}

impl CommandPusher {
    pub fn new(config: PushConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &PushConfig {
        &self.config
    }

    /// Run one session per target concurrently
    ///
    /// Input is validated before any connection is made. A failed session
    /// never affects its siblings; cancelling `cancel` aborts every session
    /// still in flight.
    pub async fn push(
        &self,
        targets: &[IpAddr],
        commands: &[String],
        cancel: CancellationToken,
    ) -> Result<PushReport, ValidationError> {
        let mut seen = HashSet::new();
        let targets: Vec<IpAddr> = targets.iter().copied().filter(|ip| seen.insert(*ip)).collect();
        if targets.is_empty() {
            return Err(ValidationError::NoTargets);
        }

        let commands: Vec<String> = commands
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();
        if commands.is_empty() {
            return Err(ValidationError::NoCommands);
        }

        info!(
            targets = targets.len(),
            commands = commands.len(),
            max_sessions = ?self.config.max_sessions,
            "Starting command push"
        );

        let gate = self
            .config
            .max_sessions
            .map(|limit| Arc::new(Semaphore::new(limit.clamp(1, Semaphore::MAX_PERMITS))));
        let commands = Arc::new(commands);
        let mut tasks = JoinSet::new();

        for (index, address) in targets.iter().copied().enumerate() {
            let config = Arc::clone(&self.config);
            let commands = Arc::clone(&commands);
            let gate = gate.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let outcome = run_target(address, &config, &commands, gate, &cancel).await;
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<SessionOutcome>> = vec![None; targets.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => warn!(error = %e, "Session task failed"),
            }
        }

        let outcomes: Vec<SessionOutcome> = slots
            .into_iter()
            .zip(targets.iter())
            .map(|(slot, address)| {
                slot.unwrap_or_else(|| {
                    SessionOutcome::failed(*address, SessionError::Aborted("task failed".to_string()))
                })
            })
            .collect();

        let report = PushReport {
            outcomes,
            command_count: commands.len(),
            target_count: targets.len(),
            cancelled: cancel.is_cancelled(),
        };

        info!(
            targets = report.target_count,
            commands = report.command_count,
            succeeded = report.succeeded(),
            failed = report.failed(),
            cancelled = report.cancelled,
            "Command push finished"
        );
        Ok(report)
    }
}

async fn run_target(
    address: IpAddr,
    config: &PushConfig,
    commands: &[String],
    gate: Option<Arc<Semaphore>>,
    cancel: &CancellationToken,
) -> SessionOutcome {
    let _permit = match gate {
        Some(gate) => tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return SessionOutcome::failed(address, SessionError::Cancelled);
            }
            permit = gate.acquire_owned() => permit.ok(),
        },
        None => None,
    };

    CommandSession::new(address, config).run(commands, cancel).await
}
