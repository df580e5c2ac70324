//! The protocol engine seam.
//!
//! The broker does not understand debugger packets.  It drives an engine
//! through two operations and inspects what comes back:
//!
//! ```text
//! handshake()          ── Ok ──►  loop { serve_one_packet(timeout) }
//!      │                                   │
//!     Err                       result != Success, interrupted, or done
//!      ▼                                   ▼
//! session ends                        session ends
//! ```
//!
//! [`PlatformEngine`] is the default engine: packet framing plus a handful of
//! platform queries.  Any other engine can be plugged in through
//! [`ProtocolEngine`].

pub mod packet;
pub mod platform;

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use thiserror::Error;

pub use packet::{decode_packet, encode_packet, read_frame, Frame, PacketError};
pub use platform::PlatformEngine;

/// Outcome class of one packet exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketResult {
    Success,
    ErrorSendFailed,
    ErrorReplyTimeout,
    ErrorReplyInvalid,
    ErrorDisconnected,
}

/// Error type reported by a protocol engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The client's first byte was not the expected acknowledgement.
    #[error("expected '+', received 0x{received:02x}")]
    HandshakeRejected { received: u8 },

    #[error("connection closed by client")]
    Disconnected,

    #[error("timed out waiting for a packet")]
    Timeout,

    #[error("malformed packet: {0}")]
    Packet(PacketError),

    #[error("connection I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Everything one call to [`ProtocolEngine::serve_one_packet`] reports.
#[derive(Debug)]
pub struct PacketExchange {
    pub result: PacketResult,
    /// Set when the exchange failed in a way worth reporting.
    pub error: Option<EngineError>,
    /// The client asked to interrupt the session.
    pub interrupted: bool,
    /// The client asked to end the session.
    pub done: bool,
}

impl PacketExchange {
    pub fn success() -> Self {
        Self {
            result: PacketResult::Success,
            error: None,
            interrupted: false,
            done: false,
        }
    }

    pub fn interrupted() -> Self {
        Self {
            interrupted: true,
            ..Self::success()
        }
    }

    pub fn done() -> Self {
        Self {
            done: true,
            ..Self::success()
        }
    }

    pub fn failed(result: PacketResult, error: EngineError) -> Self {
        Self {
            result,
            error: Some(error),
            interrupted: false,
            done: false,
        }
    }
}

/// What the broker needs from a protocol engine.
///
/// An engine owns its connection; the broker never reads or writes the
/// socket itself once the engine has been created.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait ProtocolEngine {
    /// `false` once the engine has observed the peer going away.
    fn is_connected(&self) -> bool;

    /// Performs the initial exchange.  Must succeed before any packet is served.
    fn handshake(&mut self) -> Result<(), EngineError>;

    /// Waits for one packet (up to `timeout`, or forever with `None`) and
    /// answers it.
    fn serve_one_packet(&mut self, timeout: Option<Duration>) -> PacketExchange;
}

/// A bidirectional byte stream an engine can run over.
pub trait ByteStream: Read + Write {
    /// Bounds how long a read may block.  `None` blocks indefinitely.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
}

impl ByteStream for TcpStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }
}

impl ByteStream for UnixStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        UnixStream::set_read_timeout(self, timeout)
    }
}
