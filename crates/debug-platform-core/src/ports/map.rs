//! PortMap and the per-engine StubPortContext.

use std::collections::BTreeMap;

use uuid::Uuid;

/// Who currently holds a stub port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occupant {
    Unassigned,
    /// Claimed on behalf of the session with this id.
    Session(Uuid),
}

/// Stub port → occupant.
///
/// Keys are only ever inserted by [`super::PortAllocator`], which has already
/// checked them against `[LOW_PORT, HIGH_PORT]`.  A `BTreeMap` keeps the
/// iteration order ascending, so "first free port" is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortMap {
    entries: BTreeMap<u16, Occupant>,
}

impl PortMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, port: u16) -> bool {
        self.entries.contains_key(&port)
    }

    /// Returns the occupant of `port`, or `None` if the port is not in the map.
    pub fn occupant(&self, port: u16) -> Option<Occupant> {
        self.entries.get(&port).copied()
    }

    pub fn is_unassigned(&self, port: u16) -> bool {
        self.occupant(port) == Some(Occupant::Unassigned)
    }

    /// Configured ports in ascending order.
    pub fn ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.entries.keys().copied()
    }

    /// Number of ports no session holds.
    pub fn unassigned_count(&self) -> usize {
        self.entries
            .values()
            .filter(|o| **o == Occupant::Unassigned)
            .count()
    }

    /// Inserts `port` as unassigned; an existing occupant is reset.
    pub(super) fn insert_unassigned(&mut self, port: u16) {
        self.entries.insert(port, Occupant::Unassigned);
    }

    fn claim_first_unassigned(&mut self, session: Uuid) -> Option<u16> {
        let (&port, occupant) = self
            .entries
            .iter_mut()
            .find(|(_, o)| **o == Occupant::Unassigned)?;
        *occupant = Occupant::Session(session);
        Some(port)
    }

    fn release(&mut self, port: u16) -> bool {
        match self.entries.get_mut(&port) {
            Some(occupant) if matches!(occupant, Occupant::Session(_)) => {
                *occupant = Occupant::Unassigned;
                true
            }
            _ => false,
        }
    }
}

/// The port a stub should listen on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubPort {
    Assigned(u16),
    /// No constraint configured: the stub binds port 0 and the OS chooses.
    Ephemeral,
}

impl StubPort {
    /// The number to put on the wire (`0` for [`StubPort::Ephemeral`]).
    pub fn number(self) -> u16 {
        match self {
            StubPort::Assigned(port) => port,
            StubPort::Ephemeral => 0,
        }
    }
}

/// A protocol engine's private view of the stub-port configuration.
///
/// Produced by [`super::PortAllocator::context`].  Claims made here stay here:
/// in forking mode every worker process has its own copy anyway, and in
/// single-shot mode there is only one engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StubPortContext {
    map: PortMap,
    offset: Option<u16>,
}

impl StubPortContext {
    pub fn new(map: PortMap, offset: Option<u16>) -> Self {
        Self { map, offset }
    }

    pub fn map(&self) -> &PortMap {
        &self.map
    }

    pub fn offset(&self) -> Option<u16> {
        self.offset
    }

    /// Chooses the stub port for a new stub.
    ///
    /// A non-empty map takes precedence: the lowest unassigned port is claimed
    /// for `session`, and `None` means every mapped port is taken.  Otherwise a
    /// configured offset is added to `listen_port` (`None` if that overflows).
    /// With neither, the stub gets [`StubPort::Ephemeral`].
    pub fn next_stub_port(&mut self, listen_port: u16, session: Uuid) -> Option<StubPort> {
        if !self.map.is_empty() {
            return self.map.claim_first_unassigned(session).map(StubPort::Assigned);
        }
        match self.offset {
            Some(offset) => listen_port.checked_add(offset).map(StubPort::Assigned),
            None => Some(StubPort::Ephemeral),
        }
    }

    /// Returns a claimed port to the pool.  Returns `false` if `port` was not
    /// claimed (or is not mapped at all).
    pub fn release(&mut self, port: u16) -> bool {
        self.map.release(port)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
