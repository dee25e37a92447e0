//! NDCE Telnet - Push configuration commands to network devices
//!
//! Sessions log in over telnet, send each command in order and drain the
//! output. Responses are not interpreted.

pub mod push;
pub mod session;
pub mod transport;

pub use push::{CommandPusher, PushConfig, PushReport};
pub use session::{CommandSession, SessionError, SessionOutcome, SessionState};
pub use transport::TelnetTransport;
