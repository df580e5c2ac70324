//! Application layer of the broker.
//!
//! This layer holds the broker's behaviour and nothing that touches the
//! operating system directly.  Sockets, `fork` and signals are reached
//! through traits ([`supervisor::Acceptor`], [`supervisor::WorkerSpawner`])
//! that the infrastructure layer implements.
//!
//! # Sub-modules
//!
//! - **`config`** – Merges raw settings from the config file and the command
//!   line and validates them into an immutable `BrokerConfig`.
//!
//! - **`session`** – `ProtocolSession`: handshake, then the serve loop over a
//!   protocol engine, with exactly one error report per failed session.
//!
//! - **`supervisor`** – `SessionSupervisor`: the accept cycle and the
//!   SingleShot / Forking process models.
//!
//! - **`startup_commands`** – Runs `--lldb-command` values once at startup.

pub mod config;
pub mod session;
pub mod startup_commands;
pub mod supervisor;
