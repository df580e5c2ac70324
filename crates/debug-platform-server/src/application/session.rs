//! ProtocolSession: one accepted connection, from handshake to last packet.
//!
//! The session owns a [`ProtocolEngine`] (which in turn owns the connection)
//! and drives it:
//!
//! 1. `handshake()` must succeed first.  A failed handshake is reported once
//!    and the serve loop is never entered.
//! 2. `serve_one_packet()` runs in a loop with no timeout.  The loop ends on
//!    the first result other than `Success`, or when the engine reports
//!    `interrupted` or `done`.
//! 3. If the engine recorded an error along the way, it is reported once when
//!    the loop exits.  A clean `done` reports nothing.
//!
//! A failed exchange is never retried; it ends this session only.

use std::net::SocketAddr;
use std::time::Duration;

use debug_platform_core::{EngineError, PacketResult, ProtocolEngine};
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Timeout handed to the engine for each packet.  `None` waits forever: the
/// broker has no idle disconnect.
pub const SERVE_TIMEOUT: Option<Duration> = None;

/// Why a session ended with an error.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The engine lost its connection before the session started.
    #[error("connection lost before handshake")]
    NotConnected,

    #[error("handshake with client failed: {0}")]
    Handshake(#[source] EngineError),

    /// The serve loop stopped on an engine error after `packets` exchanges.
    #[error("{source}")]
    Serve {
        packets: u64,
        #[source]
        source: EngineError,
    },
}

/// How a session that ended without an error finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    /// Successful exchanges served.
    pub packets: u64,
    pub interrupted: bool,
    pub done: bool,
    /// Last non-success result class, if the loop ended on one.
    pub last_result: PacketResult,
}

/// A connection being served by a [`ProtocolEngine`].
pub struct ProtocolSession<E: ProtocolEngine> {
    engine: E,
    id: Uuid,
    peer: SocketAddr,
}

impl<E: ProtocolEngine> ProtocolSession<E> {
    pub fn new(engine: E, id: Uuid, peer: SocketAddr) -> Self {
        Self { engine, id, peer }
    }

    /// Runs the handshake.  Nothing is reported here; [`run`](Self::run)
    /// does the reporting.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotConnected`] if the engine is already disconnected,
    /// [`SessionError::Handshake`] if the exchange fails.
    pub fn handshake(&mut self) -> Result<(), SessionError> {
        if !self.engine.is_connected() {
            return Err(SessionError::NotConnected);
        }
        self.engine.handshake().map_err(SessionError::Handshake)
    }

    /// Serves packets until the engine signals an end.
    ///
    /// # Errors
    ///
    /// [`SessionError::Serve`] carrying the last error the engine recorded.
    pub fn serve_loop(&mut self, timeout: Option<Duration>) -> Result<SessionSummary, SessionError> {
        let mut summary = SessionSummary {
            packets: 0,
            interrupted: false,
            done: false,
            last_result: PacketResult::Success,
        };
        let mut last_error = None;

        while !summary.interrupted && !summary.done {
            let exchange = self.engine.serve_one_packet(timeout);
            if let Some(e) = exchange.error {
                last_error = Some(e);
            }
            summary.interrupted |= exchange.interrupted;
            summary.done |= exchange.done;
            summary.last_result = exchange.result;
            if exchange.result != PacketResult::Success {
                break;
            }
            summary.packets += 1;
        }

        match last_error {
            Some(source) => Err(SessionError::Serve {
                packets: summary.packets,
                source,
            }),
            None => Ok(summary),
        }
    }

    /// Handshake, then the serve loop with [`SERVE_TIMEOUT`].
    ///
    /// Any error is reported on the error stream exactly once before it is
    /// returned.
    pub fn run(mut self) -> Result<SessionSummary, SessionError> {
        let span = tracing::info_span!("session", id = %self.id, peer = %self.peer);
        let _entered = span.enter();

        if let Err(e) = self.handshake() {
            error!("error: {e}");
            return Err(e);
        }
        debug!("handshake complete");

        match self.serve_loop(SERVE_TIMEOUT) {
            Ok(summary) => {
                info!(
                    packets = summary.packets,
                    interrupted = summary.interrupted,
                    done = summary.done,
                    last_result = ?summary.last_result,
                    "session finished"
                );
                Ok(summary)
            }
            Err(e) => {
                error!("error: {e}");
                Err(e)
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
