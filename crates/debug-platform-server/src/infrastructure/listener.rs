//! ConnectionListener: the client-facing TCP listening socket.
//!
//! Built on `socket2` rather than `std::net::TcpListener` because the broker
//! needs two things std does not expose:
//!
//! - an explicit `listen(2)` backlog (std hard-codes 128 on most targets and
//!   gives no way to choose), and
//! - per-descriptor control of close-on-exec, both for the listening socket
//!   (never inherited) and for each accepted connection (inherited by the
//!   worker that serves it).

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};

use debug_platform_core::{EndpointError, ListenEndpoint};
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tracing::{debug, warn};

use crate::application::supervisor::Acceptor;
use crate::exit::BrokerExit;

/// Error type for [`ConnectionListener::bind`].
#[derive(Debug, Error)]
pub enum ListenError {
    #[error("invalid listen address: {0}")]
    Endpoint(#[from] EndpointError),

    #[error("could not resolve {endpoint}: {source}")]
    Resolve {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("{endpoint} resolved to no addresses")]
    NoAddress { endpoint: String },

    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

impl ListenError {
    pub fn exit_status(&self) -> BrokerExit {
        BrokerExit::SocketError
    }
}

/// A bound, listening TCP socket.
#[derive(Debug)]
pub struct ConnectionListener {
    socket: Socket,
    local_addr: SocketAddr,
}

impl ConnectionListener {
    /// Parses `spec`, then binds and listens on it.
    ///
    /// # Errors
    ///
    /// [`ListenError::Endpoint`] for a malformed specification, otherwise as
    /// [`bind`](Self::bind).
    pub fn bind_spec(spec: &str, inherit_by_children: bool, backlog: i32) -> Result<Self, ListenError> {
        let endpoint = ListenEndpoint::parse(spec)?;
        Self::bind(&endpoint, inherit_by_children, backlog)
    }

    /// Binds and listens on `endpoint`, trying each resolved address in turn.
    ///
    /// The broker passes `inherit_by_children = false`: a forked worker must
    /// never become a listener itself.
    ///
    /// # Errors
    ///
    /// Returns [`ListenError`] if the host does not resolve or no resolved
    /// address can be bound.
    pub fn bind(
        endpoint: &ListenEndpoint,
        inherit_by_children: bool,
        backlog: i32,
    ) -> Result<Self, ListenError> {
        let addrs = (endpoint.host(), endpoint.port())
            .to_socket_addrs()
            .map_err(|source| ListenError::Resolve {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let mut last_failure = None;
        for addr in addrs {
            match listen_on(addr, inherit_by_children, backlog) {
                Ok(socket) => {
                    let local_addr = socket
                        .local_addr()
                        .ok()
                        .and_then(|local| local.as_socket())
                        .unwrap_or(addr);
                    debug!(%local_addr, backlog, "listening");
                    return Ok(Self { socket, local_addr });
                }
                Err(source) => {
                    warn!(%addr, "bind failed: {source}");
                    last_failure = Some(ListenError::Bind { addr, source });
                }
            }
        }

        Err(last_failure.unwrap_or_else(|| ListenError::NoAddress {
            endpoint: endpoint.to_string(),
        }))
    }

    /// The address actually bound; differs from the request when port `0`
    /// was asked for.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Blocks until a client connects.  Interrupted waits are retried.
    ///
    /// # Errors
    ///
    /// Any other `accept(2)` failure.
    pub fn accept(&self, inherit_by_children: bool) -> io::Result<(TcpStream, SocketAddr)> {
        loop {
            match self.socket.accept() {
                Ok((socket, peer)) => {
                    socket.set_cloexec(!inherit_by_children)?;
                    let peer = peer.as_socket().ok_or_else(|| {
                        io::Error::new(io::ErrorKind::InvalidData, "peer is not an IP address")
                    })?;
                    return Ok((socket.into(), peer));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl Acceptor for ConnectionListener {
    type Connection = TcpStream;

    fn accept(&mut self, inherit_by_children: bool) -> io::Result<(TcpStream, SocketAddr)> {
        ConnectionListener::accept(self, inherit_by_children)
    }

    fn local_port(&self) -> u16 {
        self.local_addr.port()
    }
}

fn listen_on(addr: SocketAddr, inherit_by_children: bool, backlog: i32) -> io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_cloexec(!inherit_by_children)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    Ok(socket)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::thread;

    use nix::fcntl::{fcntl, FcntlArg, FdFlag};
    use std::os::fd::AsRawFd;

    fn cloexec(fd: &impl AsRawFd) -> bool {
        let flags = fcntl(fd.as_raw_fd(), FcntlArg::F_GETFD).unwrap();
        FdFlag::from_bits_truncate(flags).contains(FdFlag::FD_CLOEXEC)
    }

    fn loopback_any_port() -> ListenEndpoint {
        ListenEndpoint::new("127.0.0.1", 0)
    }

    #[test]
    fn test_bind_port_zero_reports_real_port() {
        let listener = ConnectionListener::bind(&loopback_any_port(), false, 100).unwrap();
        assert_ne!(listener.local_addr().port(), 0);
        assert_eq!(Acceptor::local_port(&listener), listener.local_addr().port());
    }

    #[test]
    fn test_listening_socket_is_not_inherited() {
        let listener = ConnectionListener::bind(&loopback_any_port(), false, 100).unwrap();
        assert!(cloexec(&listener.socket));
    }

    #[test]
    fn test_accept_yields_inheritable_connection() {
        // Arrange
        let listener = ConnectionListener::bind(&loopback_any_port(), false, 100).unwrap();
        let addr = listener.local_addr();
        let client = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(b"+").unwrap();
        });

        // Act
        let (mut stream, peer) = listener.accept(true).unwrap();

        // Assert
        assert!(!cloexec(&stream));
        assert!(peer.ip().is_loopback());
        let mut byte = [0u8; 1];
        stream.read_exact(&mut byte).unwrap();
        assert_eq!(&byte, b"+");
        client.join().unwrap();
    }

    #[test]
    fn test_bind_spec_rejects_malformed_endpoint() {
        let result = ConnectionListener::bind_spec("::1:5000", false, 100);
        assert!(matches!(result, Err(ListenError::Endpoint(_))));
    }

    #[test]
    fn test_bind_conflict_is_reported() {
        // Arrange: a second listener on a port that is already listening.
        let first = ConnectionListener::bind(&loopback_any_port(), false, 100).unwrap();
        let taken = ListenEndpoint::new("127.0.0.1", first.local_addr().port());

        // Act
        let second = ConnectionListener::bind(&taken, false, 100);

        // Assert
        let error = second.unwrap_err();
        assert!(matches!(error, ListenError::Bind { .. }));
        assert_eq!(error.exit_status().code(), 255);
    }
}
