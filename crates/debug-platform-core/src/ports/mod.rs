//! Stub-port configuration and bookkeeping.
//!
//! # What is a stub port?
//!
//! The broker itself listens on one client-facing port.  When a debugger
//! client asks the broker to start a debug stub, that stub needs a port of
//! its own.  Operators constrain which ports may be used in one of three ways:
//!
//! ```text
//! --gdbserver-port 6000 --gdbserver-port 6004   explicit set   {6000, 6004}
//! --min-gdbserver-port 6000 --max-…-port 6003   half-open range {6000, 6001, 6002}
//! --port-offset 1000                            listen port + 1000
//! ```
//!
//! The explicit set and the range both land in the same [`PortMap`]; the
//! offset is kept separately and only applies when the map is empty.
//!
//! # Who mutates what?
//!
//! [`PortAllocator`] validates the configuration and owns the broker's map,
//! which is read-only once the first connection is accepted.  Each protocol
//! engine receives its own [`StubPortContext`] copy and does its per-session
//! claiming there, so the broker never needs a lock.

mod allocator;
mod map;

pub use allocator::{parse_port_value, PortAllocator, PortError, PortValueError, StubPortSpec};
pub use map::{Occupant, PortMap, StubPort, StubPortContext};

/// Lowest port a stub may use: the first port above the privileged range.
pub const LOW_PORT: u16 = 1024;

/// Highest port a stub may use.
///
/// Elsewhere this is the top of the IANA registered range; on macOS it is the
/// first port handed out automatically by the kernel.
#[cfg(target_os = "macos")]
pub const HIGH_PORT: u16 = 49152;
#[cfg(not(target_os = "macos"))]
pub const HIGH_PORT: u16 = 49151;

/// Returns `true` when `port` lies inside `[LOW_PORT, HIGH_PORT]`.
pub fn in_stub_window(port: u64) -> bool {
    (u64::from(LOW_PORT)..=u64::from(HIGH_PORT)).contains(&port)
}
