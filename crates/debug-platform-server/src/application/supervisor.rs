//! SessionSupervisor: the broker's process model.
//!
//! One accept cycle moves through these states:
//!
//! ```text
//!            accept()                SingleShot
//! Idle ───────────────► Accepted ──────────────────► Direct ──► Serving ──► Terminated
//!   ▲                      │
//!   │                      │ Forking: spawn()
//!   │                      ▼
//!   └──── parent ───── Dispatched ──── worker ──────────────► Serving ──► Terminated
//! ```
//!
//! - **SingleShot**: the listener is dropped before serving so no second
//!   connection can queue behind the first.  The supervisor never returns
//!   to `Idle`.
//! - **Forking**: finished workers are reaped before every accept.  After an
//!   accept the supervisor forks; the parent closes its copy of the
//!   connection and goes back to accepting, while the worker releases the
//!   listener and serves the one connection it was handed.
//!
//! The supervisor talks to the outside world only through the three traits
//! below, so the state machine can be driven in tests without sockets or
//! processes.

use std::io::{self, Write};
use std::net::SocketAddr;

use debug_platform_core::{
    ByteStream, PlatformEngine, ProcessModel, ProtocolEngine, StubPortContext,
};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use super::session::{ProtocolSession, SessionError, SessionSummary};
use crate::exit::BrokerExit;

// ── Seams ─────────────────────────────────────────────────────────────────────

/// A bound listening socket.
pub trait Acceptor {
    type Connection;

    /// Blocks until a peer connects.
    ///
    /// With `inherit_by_children` the returned connection stays open across
    /// `exec` in a forked worker.
    fn accept(&mut self, inherit_by_children: bool)
        -> io::Result<(Self::Connection, SocketAddr)>;

    /// The port actually bound.
    fn local_port(&self) -> u16;
}

/// Which side of a spawn the caller is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnRole {
    Parent { worker: u32 },
    Worker,
}

/// Creates and collects worker processes.
pub trait WorkerSpawner {
    /// Collects every finished worker without blocking.  Returns how many
    /// were collected.
    fn reap_finished(&mut self) -> usize;

    /// Splits the current process in two.
    fn spawn(&mut self) -> io::Result<SpawnRole>;
}

/// Builds the protocol engine for one accepted connection.
pub trait EngineFactory<C> {
    type Engine: ProtocolEngine;

    fn create(
        &self,
        connection: C,
        ports: StubPortContext,
        listen_port: u16,
        session: Uuid,
    ) -> Self::Engine;
}

/// Builds a [`PlatformEngine`] over the accepted stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformEngineFactory;

impl<S: ByteStream> EngineFactory<S> for PlatformEngineFactory {
    type Engine = PlatformEngine<S>;

    fn create(
        &self,
        connection: S,
        ports: StubPortContext,
        listen_port: u16,
        session: Uuid,
    ) -> PlatformEngine<S> {
        PlatformEngine::new(connection, ports, listen_port, session)
    }
}

// ── State and outcomes ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Accepted,
    Dispatched,
    Direct,
    Serving,
    Terminated,
}

/// A session that ran in this process.
#[derive(Debug)]
pub struct SessionReport {
    pub id: Uuid,
    pub peer: SocketAddr,
    pub outcome: Result<SessionSummary, SessionError>,
}

/// Result of one [`SessionSupervisor::run_cycle`].
#[derive(Debug)]
pub enum CycleOutcome {
    /// Forking parent: the connection went to `worker`.
    Dispatched { worker: u32 },
    /// A session was served in this process, which should now exit.
    Served(SessionReport),
}

/// Transport failures.  All of them end the broker.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// `run_cycle` was called after the listener was released.
    #[error("listener already released")]
    NotListening,

    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    #[error("failed to fork worker: {0}")]
    Spawn(#[source] io::Error),
}

impl SupervisorError {
    pub fn exit_status(&self) -> BrokerExit {
        BrokerExit::SocketError
    }
}

// ── Supervisor ────────────────────────────────────────────────────────────────

/// Drives accept cycles according to a [`ProcessModel`].
pub struct SessionSupervisor<A, S, F>
where
    A: Acceptor,
    S: WorkerSpawner,
    F: EngineFactory<A::Connection>,
{
    listener: Option<A>,
    listen_port: u16,
    spawner: S,
    engines: F,
    ports: StubPortContext,
    process_model: ProcessModel,
    state: SupervisorState,
    operator: Box<dyn Write>,
}

impl<A, S, F> SessionSupervisor<A, S, F>
where
    A: Acceptor,
    S: WorkerSpawner,
    F: EngineFactory<A::Connection>,
{
    /// `ports` is cloned into every session's engine; the supervisor's own
    /// copy is never modified.
    pub fn new(
        listener: A,
        spawner: S,
        engines: F,
        ports: StubPortContext,
        process_model: ProcessModel,
    ) -> Self {
        Self {
            listen_port: listener.local_port(),
            listener: Some(listener),
            spawner,
            engines,
            ports,
            process_model,
            state: SupervisorState::Idle,
            operator: Box::new(io::stdout()),
        }
    }

    /// Redirects the operator progress line (stdout by default).
    pub fn with_operator_output(mut self, operator: Box<dyn Write>) -> Self {
        self.operator = operator;
        self
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// `false` once this process has given up its listener.
    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// Runs one accept cycle.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError`] when accept or spawn fails, or when the
    /// listener has already been released.
    pub fn run_cycle(&mut self) -> Result<CycleOutcome, SupervisorError> {
        if self.process_model == ProcessModel::Forking {
            let reaped = self.spawner.reap_finished();
            if reaped > 0 {
                debug!(reaped, "collected finished workers");
            }
        }

        let listener = self.listener.as_mut().ok_or(SupervisorError::NotListening)?;
        self.state = SupervisorState::Idle;
        let (connection, peer) = listener.accept(true).map_err(SupervisorError::Accept)?;
        self.state = SupervisorState::Accepted;
        self.announce(peer);

        match self.process_model {
            ProcessModel::SingleShot => {
                self.listener = None;
                self.state = SupervisorState::Direct;
                Ok(CycleOutcome::Served(self.serve(connection, peer)))
            }
            ProcessModel::Forking => {
                self.state = SupervisorState::Dispatched;
                match self.spawner.spawn().map_err(SupervisorError::Spawn)? {
                    SpawnRole::Parent { worker } => {
                        drop(connection);
                        debug!(worker, %peer, "connection handed to worker");
                        Ok(CycleOutcome::Dispatched { worker })
                    }
                    SpawnRole::Worker => {
                        self.listener = None;
                        Ok(CycleOutcome::Served(self.serve(connection, peer)))
                    }
                }
            }
        }
    }

    /// Runs cycles until a session has been served in this process.
    ///
    /// In `SingleShot` mode that is the first connection.  In `Forking` mode
    /// the parent only returns on error; each worker returns after its one
    /// session.
    ///
    /// # Errors
    ///
    /// Propagates the first [`SupervisorError`].
    pub fn run(&mut self) -> Result<SessionReport, SupervisorError> {
        loop {
            match self.run_cycle()? {
                CycleOutcome::Dispatched { .. } => continue,
                CycleOutcome::Served(report) => return Ok(report),
            }
        }
    }

    fn announce(&mut self, peer: SocketAddr) {
        info!(%peer, "connection established");
        if let Err(e) = writeln!(self.operator, "Connection established.")
            .and_then(|()| self.operator.flush())
        {
            debug!("could not write progress line: {e}");
        }
    }

    fn serve(&mut self, connection: A::Connection, peer: SocketAddr) -> SessionReport {
        self.state = SupervisorState::Serving;
        let id = Uuid::new_v4();
        let engine = self
            .engines
            .create(connection, self.ports.clone(), self.listen_port, id);
        let outcome = ProtocolSession::new(engine, id, peer).run();
        self.state = SupervisorState::Terminated;
        SessionReport { id, peer, outcome }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
