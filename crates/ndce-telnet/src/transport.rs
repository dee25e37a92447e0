//! Async telnet transport over TCP
//!
//! Every option the peer offers or requests is refused, and negotiation bytes
//! are stripped from the data handed back to callers.

use anyhow::{anyhow, bail, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tracing::{debug, trace};

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

const READ_CHUNK: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum DecodeState {
    #[default]
    Data,
    Command,
    Option(u8),
    Subnegotiation,
    SubnegotiationCommand,
}

/// Telnet stream decoder
///
/// Keeps its state between reads so sequences split across chunks are handled.
#[derive(Debug, Default)]
struct Decoder {
    state: DecodeState,
}

impl Decoder {
    /// Returns the plain data and the refusals to send back
    fn feed(&mut self, input: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut data = Vec::with_capacity(input.len());
        let mut replies = Vec::new();

        for &byte in input {
            self.state = match (self.state, byte) {
                (DecodeState::Data, IAC) => DecodeState::Command,
                (DecodeState::Data, b) => {
                    data.push(b);
                    DecodeState::Data
                }
                (DecodeState::Command, IAC) => {
                    data.push(IAC);
                    DecodeState::Data
                }
                (DecodeState::Command, DO | DONT | WILL | WONT) => DecodeState::Option(byte),
                (DecodeState::Command, SB) => DecodeState::Subnegotiation,
                (DecodeState::Command, _) => DecodeState::Data,
                (DecodeState::Option(verb), option) => {
                    match verb {
                        DO => replies.extend_from_slice(&[IAC, WONT, option]),
                        WILL => replies.extend_from_slice(&[IAC, DONT, option]),
                        _ => {}
                    }
                    DecodeState::Data
                }
                (DecodeState::Subnegotiation, IAC) => DecodeState::SubnegotiationCommand,
                (DecodeState::Subnegotiation, _) => DecodeState::Subnegotiation,
                (DecodeState::SubnegotiationCommand, SE) => DecodeState::Data,
                (DecodeState::SubnegotiationCommand, _) => DecodeState::Subnegotiation,
            };
        }

        (data, replies)
    }
}

/// Encode one line of input
///
/// UTF-8 text never contains the IAC byte, so no escaping is needed.
fn encode_line(line: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(line.len() + 2);
    out.extend_from_slice(line.as_bytes());
    out.extend_from_slice(b"\r\n");
    out
}

/// Line-oriented telnet client connection
pub struct TelnetTransport {
    stream: TcpStream,
    peer: SocketAddr,
    io_timeout: Duration,
    decoder: Decoder,
}

impl TelnetTransport {
    /// Connect to a telnet server
    ///
    /// `io_timeout` bounds every later read and write.
    pub async fn connect(
        peer: SocketAddr,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> Result<Self> {
        let stream = timeout(connect_timeout, TcpStream::connect(peer))
            .await
            .map_err(|_| anyhow!("Connection to {} timed out", peer))??;
        stream.set_nodelay(true)?;

        debug!(peer = %peer, "Telnet connection established");

        Ok(Self {
            stream,
            peer,
            io_timeout,
            decoder: Decoder::default(),
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Read one chunk of output
    ///
    /// Returns `None` once the peer has closed the connection, and an empty
    /// buffer when nothing arrived within the I/O timeout.
    pub async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let mut buf = [0u8; READ_CHUNK];
        let len = match timeout(self.io_timeout, self.stream.read(&mut buf)).await {
            Ok(result) => result?,
            Err(_) => {
                trace!(peer = %self.peer, "No output within read timeout");
                return Ok(Some(Vec::new()));
            }
        };

        if len == 0 {
            debug!(peer = %self.peer, "Connection closed by peer");
            return Ok(None);
        }

        let (data, replies) = self.decoder.feed(&buf[..len]);
        if !replies.is_empty() {
            trace!(peer = %self.peer, bytes = replies.len(), "Refusing telnet options");
            self.write_raw(&replies).await?;
        }

        trace!(peer = %self.peer, received = len, data = data.len(), "Read telnet output");
        Ok(Some(data))
    }

    /// Wait for the first output carrying data
    pub async fn read_banner(&mut self, wait: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + wait;
        loop {
            if Instant::now() >= deadline {
                bail!("No banner from {} within {:?}", self.peer, wait);
            }
            match self.read_chunk().await? {
                None => bail!("Connection closed by {} before banner", self.peer),
                Some(data) if data.is_empty() => continue,
                Some(data) => return Ok(data),
            }
        }
    }

    /// Send one line terminated by CR LF
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        self.write_raw(&encode_line(line)).await
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        timeout(self.io_timeout, async {
            self.stream.write_all(bytes).await?;
            self.stream.flush().await
        })
        .await
        .map_err(|_| anyhow!("Write to {} timed out", self.peer))??;
        Ok(())
    }

    /// Shut down the write side and release the socket
    pub async fn close(mut self) {
        if let Err(e) = timeout(self.io_timeout, self.stream.shutdown()).await {
            trace!(peer = %self.peer, error = %e, "Shutdown timed out");
        }
        debug!(peer = %self.peer, "Telnet connection closed");
    }
}
