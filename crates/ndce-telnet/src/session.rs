//! Command session state machine

use ndce_discovery::probe::port_open;
use std::fmt;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::push::PushConfig;
use crate::transport::TelnetTransport;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("port closed")]
    PortClosed,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("no banner received: {0}")]
    Banner(String),
    #[error("read failed: {0}")]
    Read(String),
    #[error("write failed: {0}")]
    Write(String),
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("cancelled")]
    Cancelled,
    #[error("session aborted: {0}")]
    Aborted(String),
}

/// Lifecycle of one command session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    SendingCommands,
    Draining,
    Closed,
    /// Absorbing failure state with its reason
    Failed(String),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed(_))
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_advance_to(&self, next: &SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (current, Failed(_)) => !current.is_terminal(),
            (Connecting, Authenticating)
            | (Authenticating, SendingCommands)
            | (SendingCommands, Draining)
            | (Draining, Closed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Authenticating => write!(f, "authenticating"),
            SessionState::SendingCommands => write!(f, "sending commands"),
            SessionState::Draining => write!(f, "draining"),
            SessionState::Closed => write!(f, "closed"),
            SessionState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Final result of a session against one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub address: IpAddr,
    pub state: SessionState,
    /// Commands written before the session ended
    pub commands_sent: usize,
    pub error: Option<SessionError>,
}

impl SessionOutcome {
    pub fn failed(address: IpAddr, error: SessionError) -> Self {
        Self {
            address,
            state: SessionState::Failed(error.to_string()),
            commands_sent: 0,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == SessionState::Closed
    }
}

/// Run `step` unless the token fires first
async fn guarded<T, F>(cancel: &CancellationToken, step: F) -> Result<T, SessionError>
where
    F: Future<Output = Result<T, SessionError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SessionError::Cancelled),
        result = step => result,
    }
}

async fn pause(cancel: &CancellationToken, delay: Duration) -> Result<(), SessionError> {
    guarded(cancel, async {
        tokio::time::sleep(delay).await;
        Ok::<_, SessionError>(())
    })
    .await
}

/// One login-and-push conversation with a device
///
/// Writes are strictly sequential: username, password, then each command in
/// order. Output is read and discarded.
pub struct CommandSession<'a> {
    address: IpAddr,
    config: &'a PushConfig,
    state: SessionState,
    commands_sent: usize,
}

impl<'a> CommandSession<'a> {
    pub fn new(address: IpAddr, config: &'a PushConfig) -> Self {
        Self {
            address,
            config,
            state: SessionState::Connecting,
            commands_sent: 0,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    fn advance(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_advance_to(&next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        trace!(ip = %self.address, from = %self.state, to = %next, "Session state change");
        self.state = next;
    }

    /// Drive the session to `Closed` or `Failed`
    ///
    /// The socket is released on every exit path, including cancellation.
    pub async fn run(mut self, commands: &[String], cancel: &CancellationToken) -> SessionOutcome {
        let error = match self.execute(commands, cancel).await {
            Ok(()) => {
                info!(ip = %self.address, commands = self.commands_sent, "Command push complete");
                None
            }
            Err(e) => {
                match &e {
                    SessionError::Cancelled => debug!(ip = %self.address, "Session cancelled"),
                    _ => warn!(ip = %self.address, state = %self.state, error = %e, "Session failed"),
                }
                self.advance(SessionState::Failed(e.to_string()));
                Some(e)
            }
        };

        SessionOutcome {
            address: self.address,
            state: self.state,
            commands_sent: self.commands_sent,
            error,
        }
    }

    async fn execute(
        &mut self,
        commands: &[String],
        cancel: &CancellationToken,
    ) -> Result<(), SessionError> {
        let config = self.config;
        let peer = SocketAddr::new(self.address, config.port);
        let delay = config.step_delay();

        let open = guarded(cancel, async {
            Ok::<_, SessionError>(port_open(self.address, config.port, config.probe_timeout()).await)
        })
        .await?;
        if !open {
            return Err(SessionError::PortClosed);
        }

        let mut transport = guarded(cancel, async {
            TelnetTransport::connect(peer, config.connect_timeout(), config.read_timeout())
                .await
                .map_err(|e| SessionError::Connect(e.to_string()))
        })
        .await?;

        let banner = guarded(cancel, async {
            transport
                .read_banner(config.connect_timeout())
                .await
                .map_err(|e| SessionError::Banner(e.to_string()))
        })
        .await?;
        debug!(ip = %self.address, bytes = banner.len(), "Banner received");

        self.advance(SessionState::Authenticating);
        send(&mut transport, &config.username, cancel).await?;
        pause(cancel, delay).await?;
        send(&mut transport, &config.password, cancel).await?;
        pause(cancel, delay).await?;
        debug!(ip = %self.address, "Credentials sent");

        self.advance(SessionState::SendingCommands);
        let mut peer_closed = false;
        for (index, command) in commands.iter().enumerate() {
            send(&mut transport, command, cancel).await?;
            self.commands_sent += 1;
            trace!(ip = %self.address, command = %command, "Command sent");
            pause(cancel, delay).await?;

            if drain(&mut transport, cancel).await?.is_none() {
                if index + 1 < commands.len() {
                    return Err(SessionError::ConnectionClosed);
                }
                peer_closed = true;
            }
        }

        self.advance(SessionState::Draining);
        if !peer_closed {
            pause(cancel, delay).await?;
            drain(&mut transport, cancel).await?;
        }
        transport.close().await;

        self.advance(SessionState::Closed);
        Ok(())
    }
}

async fn send(
    transport: &mut TelnetTransport,
    line: &str,
    cancel: &CancellationToken,
) -> Result<(), SessionError> {
    guarded(cancel, async {
        transport
            .write_line(line)
            .await
            .map_err(|e| SessionError::Write(e.to_string()))
    })
    .await
}

/// Read and discard one chunk of output, `None` once the peer has closed
async fn drain(
    transport: &mut TelnetTransport,
    cancel: &CancellationToken,
) -> Result<Option<usize>, SessionError> {
    let chunk = guarded(cancel, async {
        transport
            .read_chunk()
            .await
            .map_err(|e| SessionError::Read(e.to_string()))
    })
    .await?;
    Ok(chunk.map(|data| data.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_forward_transitions() {
        use SessionState::*;
        assert!(Connecting.can_advance_to(&Authenticating));
        assert!(Authenticating.can_advance_to(&SendingCommands));
        assert!(SendingCommands.can_advance_to(&Draining));
        assert!(Draining.can_advance_to(&Closed));

        assert!(!Connecting.can_advance_to(&SendingCommands));
        assert!(!Draining.can_advance_to(&Authenticating));
        assert!(!Closed.can_advance_to(&Connecting));
    }

    #[test]
    fn test_failed_is_absorbing() {
        use SessionState::*;
        let failed = Failed("port closed".to_string());
        for state in [Connecting, Authenticating, SendingCommands, Draining] {
            assert!(state.can_advance_to(&failed), "{}", state);
        }
        assert!(!Closed.can_advance_to(&failed));
        assert!(!failed.can_advance_to(&Closed));
        assert!(!failed.can_advance_to(&Failed("again".to_string())));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::SendingCommands.to_string(), "sending commands");
        assert_eq!(
            SessionState::Failed(SessionError::PortClosed.to_string()).to_string(),
            "failed: port closed"
        );
    }

    #[tokio::test]
    async fn test_closed_port_fails_without_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = PushConfig {
            port,
            ..PushConfig::default()
        };
        let session = CommandSession::new(IpAddr::V4(Ipv4Addr::LOCALHOST), &config);
        assert_eq!(session.state(), &SessionState::Connecting);

        let outcome = session
            .run(&["enable".to_string()], &CancellationToken::new())
            .await;
        assert_eq!(outcome.state, SessionState::Failed("port closed".to_string()));
        assert_eq!(outcome.error, Some(SessionError::PortClosed));
        assert_eq!(outcome.commands_sent, 0);
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_no_banner_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        // Accept and hang up on every connection without a banner
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let _ = stream.shutdown().await;
            }
        });

        let config = PushConfig {
            port,
            read_timeout_ms: 100,
            ..PushConfig::default()
        };
        let outcome = CommandSession::new(IpAddr::V4(Ipv4Addr::LOCALHOST), &config)
            .run(&["enable".to_string()], &CancellationToken::new())
            .await;

        assert!(matches!(outcome.error, Some(SessionError::Banner(_))));
        assert!(matches!(outcome.state, SessionState::Failed(_)));
        assert_eq!(outcome.commands_sent, 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let config = PushConfig::default();
        let outcome = CommandSession::new(IpAddr::V4(Ipv4Addr::LOCALHOST), &config)
            .run(&["enable".to_string()], &cancel)
            .await;
        assert_eq!(outcome.error, Some(SessionError::Cancelled));
        assert_eq!(outcome.state, SessionState::Failed("cancelled".to_string()));
    }
}
