//! PlatformEngine: the default protocol engine.
//!
//! Speaks the packet framing from [`super::packet`] and answers the few
//! platform-level requests that involve the broker's stub-port
//! configuration:
//!
//! | request                      | reply                         |
//! |------------------------------|-------------------------------|
//! | `QStartNoAckMode`            | `OK`, then acks stop          |
//! | `qLaunchGDBServer[;…]`       | `port:<n>;` or `E01`          |
//! | `qKillSpawnedProcess:<port>` | `OK` or `E01`                 |
//! | `k`                          | none; the session is done     |
//! | anything else                | empty packet (unsupported)    |
//!
//! Launching the stub process itself is outside this engine; the reply only
//! tells the client which port the stub was given.

use std::io::{self, BufReader};
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::packet::{encode_packet, read_frame, Frame, PacketError, ACK, NACK};
use super::{ByteStream, EngineError, PacketExchange, PacketResult, ProtocolEngine};
use crate::ports::StubPortContext;

const REPLY_OK: &[u8] = b"OK";
const REPLY_ERROR: &[u8] = b"E01";

/// What a dispatched request wants sent back.
#[derive(Debug, PartialEq, Eq)]
enum Reply {
    Packet(Vec<u8>),
    /// `OK`, after which acknowledgements are switched off.
    EnterNoAck,
    EndSession,
}

/// Default [`ProtocolEngine`] over any [`ByteStream`].
pub struct PlatformEngine<S: ByteStream> {
    reader: BufReader<S>,
    ports: StubPortContext,
    listen_port: u16,
    session: Uuid,
    ack_mode: bool,
    connected: bool,
    applied_timeout: Option<Option<Duration>>,
    last_reply: Option<Vec<u8>>,
}

impl<S: ByteStream> PlatformEngine<S> {
    /// Creates an engine that owns `stream`.
    ///
    /// `listen_port` is the broker's client-facing port, used when stub ports
    /// are derived by offset.  `session` marks the ports this engine claims.
    pub fn new(stream: S, ports: StubPortContext, listen_port: u16, session: Uuid) -> Self {
        Self {
            reader: BufReader::new(stream),
            ports,
            listen_port,
            session,
            ack_mode: true,
            connected: true,
            applied_timeout: None,
            last_reply: None,
        }
    }

    /// The engine's port bookkeeping, including its own claims.
    pub fn ports(&self) -> &StubPortContext {
        &self.ports
    }

    pub fn ack_mode(&self) -> bool {
        self.ack_mode
    }

    fn apply_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        if self.applied_timeout != Some(timeout) {
            self.reader.get_mut().set_read_timeout(timeout)?;
            self.applied_timeout = Some(timeout);
        }
        Ok(())
    }

    fn send_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        let stream = self.reader.get_mut();
        stream.write_all(bytes)?;
        stream.flush()
    }

    fn send_packet(&mut self, payload: &[u8]) -> io::Result<()> {
        let frame = encode_packet(payload);
        self.send_raw(&frame)?;
        self.last_reply = Some(frame);
        Ok(())
    }

    fn send_failed(&mut self, e: io::Error) -> PacketExchange {
        self.connected = false;
        PacketExchange::failed(PacketResult::ErrorSendFailed, EngineError::Io(e))
    }

    fn dispatch(&mut self, payload: &[u8]) -> Reply {
        let request = String::from_utf8_lossy(payload);
        debug!(session = %self.session, "request {request:?}");

        if request == "QStartNoAckMode" {
            return Reply::EnterNoAck;
        }
        if request == "k" {
            return Reply::EndSession;
        }
        if request.starts_with("qLaunchGDBServer") {
            return Reply::Packet(self.launch_stub());
        }
        if let Some(port) = request.strip_prefix("qKillSpawnedProcess:") {
            return Reply::Packet(self.release_stub(port));
        }
        Reply::Packet(Vec::new())
    }

    fn launch_stub(&mut self) -> Vec<u8> {
        match self.ports.next_stub_port(self.listen_port, self.session) {
            Some(port) => {
                info!(session = %self.session, "stub port {} assigned", port.number());
                format!("port:{};", port.number()).into_bytes()
            }
            None => {
                warn!(session = %self.session, "no stub port available");
                REPLY_ERROR.to_vec()
            }
        }
    }

    fn release_stub(&mut self, port: &str) -> Vec<u8> {
        match port.parse::<u16>() {
            Ok(port) if self.ports.release(port) => {
                debug!(session = %self.session, "stub port {port} released");
                REPLY_OK.to_vec()
            }
            _ => REPLY_ERROR.to_vec(),
        }
    }
}

impl<S: ByteStream> ProtocolEngine for PlatformEngine<S> {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn handshake(&mut self) -> Result<(), EngineError> {
        self.apply_timeout(None)?;
        match read_frame(&mut self.reader) {
            Ok(Frame::Ack) => Ok(()),
            Ok(Frame::Nack) => Err(EngineError::HandshakeRejected { received: NACK }),
            Ok(Frame::Interrupt) => Err(EngineError::HandshakeRejected { received: 0x03 }),
            Ok(Frame::Packet(_)) => Err(EngineError::HandshakeRejected { received: b'$' }),
            Err(PacketError::UnexpectedEof) => {
                self.connected = false;
                Err(EngineError::Disconnected)
            }
            Err(PacketError::Io(e)) => Err(EngineError::Io(e)),
            Err(other) => Err(EngineError::Packet(other)),
        }
    }

    fn serve_one_packet(&mut self, timeout: Option<Duration>) -> PacketExchange {
        if let Err(e) = self.apply_timeout(timeout) {
            return PacketExchange::failed(PacketResult::ErrorReplyInvalid, EngineError::Io(e));
        }

        let payload = match read_frame(&mut self.reader) {
            Ok(Frame::Packet(payload)) => payload,
            Ok(Frame::Ack) => return PacketExchange::success(),
            Ok(Frame::Nack) => {
                if let Some(frame) = self.last_reply.clone() {
                    if let Err(e) = self.send_raw(&frame) {
                        return self.send_failed(e);
                    }
                }
                return PacketExchange::success();
            }
            Ok(Frame::Interrupt) => return PacketExchange::interrupted(),
            Err(PacketError::ChecksumMismatch { declared, computed }) => {
                debug!(
                    session = %self.session,
                    "checksum mismatch (0x{declared:02x} != 0x{computed:02x}); requesting resend"
                );
                if let Err(e) = self.send_raw(&[NACK]) {
                    return self.send_failed(e);
                }
                return PacketExchange::success();
            }
            Err(PacketError::UnexpectedEof) => {
                self.connected = false;
                return PacketExchange::failed(
                    PacketResult::ErrorDisconnected,
                    EngineError::Disconnected,
                );
            }
            Err(PacketError::Io(e))
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                return PacketExchange::failed(
                    PacketResult::ErrorReplyTimeout,
                    EngineError::Timeout,
                );
            }
            Err(PacketError::Io(e)) => {
                self.connected = false;
                return PacketExchange::failed(PacketResult::ErrorDisconnected, EngineError::Io(e));
            }
            Err(other) => {
                return PacketExchange::failed(
                    PacketResult::ErrorReplyInvalid,
                    EngineError::Packet(other),
                );
            }
        };

        if self.ack_mode {
            if let Err(e) = self.send_raw(&[ACK]) {
                return self.send_failed(e);
            }
        }

        match self.dispatch(&payload) {
            Reply::Packet(body) => match self.send_packet(&body) {
                Ok(()) => PacketExchange::success(),
                Err(e) => self.send_failed(e),
            },
            Reply::EnterNoAck => match self.send_packet(REPLY_OK) {
                Ok(()) => {
                    self.ack_mode = false;
                    PacketExchange::success()
                }
                Err(e) => self.send_failed(e),
            },
            Reply::EndSession => PacketExchange::done(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{PortAllocator, StubPortSpec};
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;

    /// Engine on one end of a socket pair, raw client on the other.
    fn engine_with(ports: StubPortContext) -> (PlatformEngine<UnixStream>, UnixStream) {
        let (server, client) = UnixStream::pair().unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        (PlatformEngine::new(server, ports, 5000, Uuid::new_v4()), client)
    }

    fn ports_of(spec: StubPortSpec) -> StubPortContext {
        let mut allocator = PortAllocator::new();
        allocator.configure(spec).unwrap();
        allocator.context()
    }

    fn read_exact_n(client: &mut UnixStream, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        client.read_exact(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_handshake_accepts_initial_ack() {
        let (mut engine, mut client) = engine_with(StubPortContext::default());
        client.write_all(b"+").unwrap();
        assert!(engine.handshake().is_ok());
    }

    #[test]
    fn test_handshake_rejects_other_bytes() {
        let (mut engine, mut client) = engine_with(StubPortContext::default());
        client.write_all(b"-").unwrap();
        assert!(matches!(
            engine.handshake(),
            Err(EngineError::HandshakeRejected { received: b'-' })
        ));
    }

    #[test]
    fn test_handshake_reports_disconnect() {
        let (mut engine, client) = engine_with(StubPortContext::default());
        drop(client);
        assert!(matches!(engine.handshake(), Err(EngineError::Disconnected)));
        assert!(!engine.is_connected());
    }

    #[test]
    fn test_unknown_request_gets_ack_and_empty_reply() {
        let (mut engine, mut client) = engine_with(StubPortContext::default());
        client.write_all(&encode_packet(b"qSomethingNew")).unwrap();

        let exchange = engine.serve_one_packet(None);

        assert_eq!(exchange.result, PacketResult::Success);
        assert_eq!(read_exact_n(&mut client, 5), b"+$#00".to_vec());
    }

    #[test]
    fn test_launch_gdbserver_claims_mapped_port() {
        let (mut engine, mut client) = engine_with(ports_of(StubPortSpec::ExplicitSet(
            [6000].into_iter().collect(),
        )));
        client
            .write_all(&encode_packet(b"qLaunchGDBServer;host:localhost;"))
            .unwrap();

        let exchange = engine.serve_one_packet(None);

        assert_eq!(exchange.result, PacketResult::Success);
        let expected = [b"+".to_vec(), encode_packet(b"port:6000;")].concat();
        assert_eq!(read_exact_n(&mut client, expected.len()), expected);
        assert!(!engine.ports().map().is_unassigned(6000));
    }

    #[test]
    fn test_launch_gdbserver_without_free_port_replies_error() {
        let (mut engine, mut client) = engine_with(ports_of(StubPortSpec::ExplicitSet(
            [6000].into_iter().collect(),
        )));
        client.write_all(&encode_packet(b"qLaunchGDBServer")).unwrap();
        client.write_all(&encode_packet(b"qLaunchGDBServer")).unwrap();

        engine.serve_one_packet(None);
        engine.serve_one_packet(None);

        let first = [b"+".to_vec(), encode_packet(b"port:6000;")].concat();
        let second = [b"+".to_vec(), encode_packet(b"E01")].concat();
        assert_eq!(
            read_exact_n(&mut client, first.len() + second.len()),
            [first, second].concat()
        );
    }

    #[test]
    fn test_launch_gdbserver_uses_offset_when_map_empty() {
        let (mut engine, mut client) = engine_with(ports_of(StubPortSpec::FixedOffset(1024)));
        client.write_all(&encode_packet(b"qLaunchGDBServer")).unwrap();

        engine.serve_one_packet(None);

        let expected = [b"+".to_vec(), encode_packet(b"port:6024;")].concat();
        assert_eq!(read_exact_n(&mut client, expected.len()), expected);
    }

    #[test]
    fn test_kill_spawned_process_releases_port() {
        let (mut engine, mut client) = engine_with(ports_of(StubPortSpec::ExplicitSet(
            [6000].into_iter().collect(),
        )));
        client.write_all(&encode_packet(b"qLaunchGDBServer")).unwrap();
        client
            .write_all(&encode_packet(b"qKillSpawnedProcess:6000"))
            .unwrap();

        engine.serve_one_packet(None);
        engine.serve_one_packet(None);

        assert!(engine.ports().map().is_unassigned(6000));
    }

    #[test]
    fn test_kill_request_marks_session_done_without_reply() {
        let (mut engine, mut client) = engine_with(StubPortContext::default());
        client.write_all(&encode_packet(b"k")).unwrap();

        let exchange = engine.serve_one_packet(None);

        assert!(exchange.done);
        assert!(exchange.error.is_none());
        assert_eq!(read_exact_n(&mut client, 1), b"+".to_vec());
    }

    #[test]
    fn test_interrupt_byte_sets_interrupted() {
        let (mut engine, mut client) = engine_with(StubPortContext::default());
        client.write_all(&[0x03]).unwrap();

        let exchange = engine.serve_one_packet(None);

        assert!(exchange.interrupted);
        assert_eq!(exchange.result, PacketResult::Success);
    }

    #[test]
    fn test_bad_checksum_is_nacked_and_not_fatal() {
        let (mut engine, mut client) = engine_with(StubPortContext::default());
        client.write_all(b"$OK#00").unwrap();

        let exchange = engine.serve_one_packet(None);

        assert_eq!(exchange.result, PacketResult::Success);
        assert_eq!(read_exact_n(&mut client, 1), b"-".to_vec());
    }

    #[test]
    fn test_nack_resends_last_reply() {
        let (mut engine, mut client) = engine_with(StubPortContext::default());
        client.write_all(&encode_packet(b"qUnknown")).unwrap();
        engine.serve_one_packet(None);
        let _ = read_exact_n(&mut client, 5);

        client.write_all(b"-").unwrap();
        engine.serve_one_packet(None);

        assert_eq!(read_exact_n(&mut client, 4), b"$#00".to_vec());
    }

    #[test]
    fn test_no_ack_mode_stops_acknowledgements() {
        let (mut engine, mut client) = engine_with(StubPortContext::default());
        client.write_all(&encode_packet(b"QStartNoAckMode")).unwrap();
        engine.serve_one_packet(None);
        let first = [b"+".to_vec(), encode_packet(b"OK")].concat();
        assert_eq!(read_exact_n(&mut client, first.len()), first);
        assert!(!engine.ack_mode());

        client.write_all(&encode_packet(b"qUnknown")).unwrap();
        engine.serve_one_packet(None);

        assert_eq!(read_exact_n(&mut client, 4), b"$#00".to_vec());
    }

    #[test]
    fn test_peer_close_reports_disconnected() {
        let (mut engine, client) = engine_with(StubPortContext::default());
        drop(client);

        let exchange = engine.serve_one_packet(None);

        assert_eq!(exchange.result, PacketResult::ErrorDisconnected);
        assert!(matches!(exchange.error, Some(EngineError::Disconnected)));
        assert!(!engine.is_connected());
    }

    #[test]
    fn test_read_timeout_reports_reply_timeout() {
        let (mut engine, _client) = engine_with(StubPortContext::default());

        let exchange = engine.serve_one_packet(Some(Duration::from_millis(20)));

        assert_eq!(exchange.result, PacketResult::ErrorReplyTimeout);
        assert!(matches!(exchange.error, Some(EngineError::Timeout)));
        assert!(engine.is_connected());
    }
}
