//! # debug-platform-core
//!
//! Shared library for the debug platform broker: everything the broker needs
//! that does not touch a socket, a process or a signal.
//!
//! # Architecture overview
//!
//! The broker listens on a client-facing TCP endpoint, accepts debugger
//! clients, and relays request/response packets for each of them.  Every
//! session may ask for a *stub port*: the port on which a separately launched
//! debug stub will listen.  This crate holds the pieces of that picture that
//! are pure data and pure logic:
//!
//! - **`ports`** – The valid stub-port window, the stub-port configuration
//!   modes (`StubPortSpec`), the broker-held `PortMap`, the `PortAllocator`
//!   that validates and stores the configuration, and the `StubPortContext`
//!   handed to each protocol engine.
//!
//! - **`domain`** – Configuration value types: where the broker listens
//!   (`ListenEndpoint`), how it serves connections (`ProcessModel`), and how
//!   chatty it is (`Verbosity`).
//!
//! - **`protocol`** – The `ProtocolEngine` trait that the broker drives, the
//!   packet framing codec, and `PlatformEngine`, the default engine used by the
//!   `debug-platform` binary.

pub mod domain;
pub mod ports;
pub mod protocol;

pub use domain::{EndpointError, ListenEndpoint, ProcessModel, Verbosity};
pub use ports::{
    parse_port_value, Occupant, PortAllocator, PortError, PortMap, PortValueError,
    StubPort, StubPortContext, StubPortSpec, HIGH_PORT, LOW_PORT,
};
pub use protocol::{
    ByteStream, EngineError, PacketExchange, PacketResult, PlatformEngine, ProtocolEngine,
};
