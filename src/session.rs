//! Session entities for both rendezvous variants.

use std::net::SocketAddr;
use std::time::Duration;

use crate::clock::Instant;

/// A rendezvous grouping, identified by a short code, awaiting participants.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    created_at: Instant,
    kind: SessionKind,
}

/// Variant-specific session payload.
#[derive(Debug, Clone)]
pub enum SessionKind {
    /// 1-host, N-guest: guests only ever query the host's address, they
    /// never join the registry themselves.
    HostGuest { host: SocketAddr },
    /// N-way group rendezvous accumulating named clients until complete.
    Group(GroupState),
}

/// Group state machine: `Accumulating` until the expected number of clients
/// has registered, then `Exchanging` until the broadcast tears the session
/// down. There is no lingering "complete" state.
#[derive(Debug, Clone)]
pub struct GroupState {
    expected_clients: usize,
    /// Client names in registration order, append-only until the exchange.
    /// The client registry is the source of truth for the clients themselves.
    registered: Vec<String>,
    phase: Phase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Accumulating,
    Exchanging,
}

/// What a group registration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// Appended; the group is still waiting for more clients.
    Accumulating,
    /// Appended, and the group just became complete.
    Complete,
    /// Name already present, or the session is already exchanging. No-op.
    Ignored,
}

impl Session {
    pub fn host_guest(id: impl Into<String>, host: SocketAddr) -> Self {
        Self {
            id: id.into(),
            created_at: Instant::now(),
            kind: SessionKind::HostGuest { host },
        }
    }

    pub fn group(id: impl Into<String>, expected_clients: usize) -> Self {
        Self {
            id: id.into(),
            created_at: Instant::now(),
            kind: SessionKind::Group(GroupState {
                expected_clients,
                registered: Vec::new(),
                phase: Phase::Accumulating,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.duration_since(self.created_at)
    }

    /// Host address, for host/guest sessions.
    pub fn host(&self) -> Option<SocketAddr> {
        match &self.kind {
            SessionKind::HostGuest { host } => Some(*host),
            SessionKind::Group(_) => None,
        }
    }

    pub fn group_state(&self) -> Option<&GroupState> {
        match &self.kind {
            SessionKind::Group(group) => Some(group),
            SessionKind::HostGuest { .. } => None,
        }
    }

    pub fn group_state_mut(&mut self) -> Option<&mut GroupState> {
        match &mut self.kind {
            SessionKind::Group(group) => Some(group),
            SessionKind::HostGuest { .. } => None,
        }
    }
}

impl GroupState {
    /// Append a client by name. Duplicate names and sessions already past
    /// accumulation are ignored; reaching the expected count transitions to
    /// `Exchanging` in the same step.
    pub fn register(&mut self, name: &str) -> RegisterOutcome {
        if self.phase != Phase::Accumulating {
            return RegisterOutcome::Ignored;
        }
        if self.registered.iter().any(|n| n == name) {
            return RegisterOutcome::Ignored;
        }
        self.registered.push(name.to_string());
        if self.registered.len() == self.expected_clients {
            self.phase = Phase::Exchanging;
            RegisterOutcome::Complete
        } else {
            RegisterOutcome::Accumulating
        }
    }

    pub fn registered(&self) -> &[String] {
        &self.registered
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }
}
