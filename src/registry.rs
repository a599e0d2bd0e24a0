//! Session and client registries.
//!
//! The session registry is the exclusive owner of all sessions, the client
//! registry of all clients; sessions hold client names only. Both are owned
//! by the single dispatch task, so no locking is involved.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use rand::Rng;

use crate::clock::Instant;
use crate::error::{ProtocolError, ProtocolResult};
use crate::session::Session;

/// Length of a server-generated session code.
pub const CODE_LEN: usize = 5;

/// Attempt bound for the code-generation retry loop. With 26^5 possible
/// codes this only trips when the registry is nearly saturated.
pub const MAX_CODE_ATTEMPTS: usize = 10_000;

/// Owner of all active sessions, keyed by session id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce a fresh 5-letter uppercase code that is not in use.
    ///
    /// Collisions retry with a new random candidate in a bounded loop;
    /// running out of attempts is an explicit error, never unbounded
    /// recursion.
    pub fn generate_code<R: Rng>(&self, rng: &mut R) -> ProtocolResult<String> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code: String = (0..CODE_LEN).map(|_| rng.random_range('A'..='Z')).collect();
            if !self.sessions.contains_key(&code) {
                return Ok(code);
            }
        }
        Err(ProtocolError::CodeSpaceExhausted(MAX_CODE_ATTEMPTS))
    }

    /// Insert a new session. An existing session with the same id is never
    /// overwritten; the caller logs the duplicate and drops the request.
    pub fn create(&mut self, session: Session) -> ProtocolResult<()> {
        if self.sessions.contains_key(session.id()) {
            return Err(ProtocolError::duplicate("session", session.id()));
        }
        self.sessions.insert(session.id().to_string(), session);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    /// Unconditional removal, used after a completed peer exchange.
    pub fn remove(&mut self, id: &str) -> Option<Session> {
        self.sessions.remove(id)
    }

    /// Host-authorized removal: the session is deleted only when the
    /// requester's address matches the recorded host. Unknown ids and
    /// non-host requesters produce an error for the caller to log; the
    /// protocol sends no rejection datagram for either case.
    pub fn remove_authorized(
        &mut self,
        id: &str,
        requester: SocketAddr,
    ) -> ProtocolResult<Session> {
        let session = self
            .sessions
            .get(id)
            .ok_or_else(|| ProtocolError::not_found("session", id))?;
        if session.host() != Some(requester) {
            return Err(ProtocolError::Unauthorized(id.to_string()));
        }
        self.sessions
            .remove(id)
            .ok_or_else(|| ProtocolError::not_found("session", id))
    }

    /// Remove every session older than `max_age` and return them so the
    /// caller can release any clients they still reference.
    pub fn sweep_expired(&mut self, now: Instant, max_age: Duration) -> Vec<Session> {
        let expired: Vec<String> = self
            .sessions
            .values()
            .filter(|session| session.age(now) > max_age)
            .map(|session| session.id().to_string())
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.sessions.remove(&id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// A registered participant of a group session.
///
/// The address is taken from the registration datagram's sender, never from
/// the message payload, so a client cannot claim someone else's address.
#[derive(Debug, Clone)]
pub struct Client {
    pub name: String,
    pub session_id: String,
    pub addr: SocketAddr,
    /// Acknowledgment flag carried by the data model; nothing reads it until
    /// an at-least-once delivery guarantee exists.
    pub confirmed: bool,
}

impl Client {
    pub fn new(name: impl Into<String>, session_id: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            session_id: session_id.into(),
            addr,
            confirmed: false,
        }
    }
}

/// Owner of all registered clients, keyed by globally unique name.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<String, Client>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new client. A name that is already registered keeps its
    /// original entry untouched.
    pub fn register(&mut self, client: Client) -> ProtocolResult<()> {
        if self.clients.contains_key(&client.name) {
            return Err(ProtocolError::duplicate("client", client.name));
        }
        self.clients.insert(client.name.clone(), client);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Client> {
        self.clients.get(name)
    }

    /// Remove a client after its session concluded. Absence is a no-op the
    /// caller may log.
    pub fn checkout(&mut self, name: &str) -> Option<Client> {
        self.clients.remove(name)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
