//! Protocol dispatch: one datagram in, replies and broadcasts out.
//!
//! The two protocol variants are independent handlers sharing only the
//! session/client registry abstractions. Handlers are synchronous and never
//! block; timing concerns (the exchange grace delay, the expiry sweep) live
//! in the serve loop.

use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, info, warn};

use crate::clock::Instant;
use crate::error::ProtocolError;
use crate::protocol::{self, GroupRequest, HostGuestRequest};
use crate::registry::{Client, ClientRegistry, SessionRegistry};
use crate::session::{RegisterOutcome, Session};

/// Which protocol variant a server instance speaks.
///
/// The `rs`/`rc` tags differ only in arity between the variants, so the
/// variant is fixed at startup instead of being sniffed per datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolMode {
    /// 1-host/N-guest rendezvous: guests fetch the host's address.
    HostGuest,
    /// N-way group rendezvous with a peer-exchange broadcast.
    Group,
}

/// One outgoing datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub to: SocketAddr,
    pub payload: String,
}

/// Everything a single inbound datagram produced.
#[derive(Debug, Default)]
pub struct Dispatch {
    /// Datagrams to send right away.
    pub outbound: Vec<Datagram>,
    /// Session ids whose peer exchange should run after the grace delay.
    pub scheduled_exchanges: Vec<String>,
}

impl Dispatch {
    fn reply(&mut self, to: SocketAddr, payload: String) {
        self.outbound.push(Datagram { to, payload });
    }
}

/// Protocol engine for the variant selected at startup.
pub enum Engine {
    HostGuest(HostGuestEngine),
    Group(GroupEngine),
}

impl Engine {
    pub fn new(mode: ProtocolMode) -> Self {
        match mode {
            ProtocolMode::HostGuest => Engine::HostGuest(HostGuestEngine::new()),
            ProtocolMode::Group => Engine::Group(GroupEngine::new()),
        }
    }

    /// Parse and route one inbound datagram.
    ///
    /// Every failure is recovered here: the datagram is logged and dropped,
    /// and the serve loop keeps going.
    pub fn handle_datagram(&mut self, payload: &[u8], from: SocketAddr) -> Dispatch {
        let text = match protocol::decode(payload) {
            Ok(text) => text,
            Err(err) => {
                debug!("dropping datagram from {from}: {err}");
                return Dispatch::default();
            }
        };
        match self {
            Engine::HostGuest(engine) => match protocol::parse_host_guest(text) {
                Ok(request) => engine.handle(request, from),
                Err(err) => {
                    debug!("dropping datagram from {from}: {err}");
                    Dispatch::default()
                }
            },
            Engine::Group(engine) => match protocol::parse_group(text) {
                Ok(request) => engine.handle(request, from),
                Err(err) => {
                    debug!("dropping datagram from {from}: {err}");
                    Dispatch::default()
                }
            },
        }
    }

    /// Run a previously scheduled peer exchange. A no-op for the host/guest
    /// variant, which has no broadcast step.
    pub fn run_exchange(&mut self, session_id: &str) -> Vec<Datagram> {
        match self {
            Engine::HostGuest(_) => Vec::new(),
            Engine::Group(engine) => engine.run_exchange(session_id),
        }
    }

    /// Remove sessions older than `max_age`. Returns how many were removed.
    pub fn sweep(&mut self, now: Instant, max_age: Duration) -> usize {
        match self {
            Engine::HostGuest(engine) => engine.sweep(now, max_age),
            Engine::Group(engine) => engine.sweep(now, max_age),
        }
    }

    pub fn active_sessions(&self) -> usize {
        match self {
            Engine::HostGuest(engine) => engine.sessions.len(),
            Engine::Group(engine) => engine.sessions.len(),
        }
    }

    pub fn active_clients(&self) -> usize {
        match self {
            Engine::HostGuest(_) => 0,
            Engine::Group(engine) => engine.clients.len(),
        }
    }
}

/// Handler for the host/guest variant. The host's own address, captured from
/// the registration datagram, is the payload returned to guests.
#[derive(Default)]
pub struct HostGuestEngine {
    sessions: SessionRegistry,
}

impl HostGuestEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&mut self, request: HostGuestRequest, from: SocketAddr) -> Dispatch {
        let mut dispatch = Dispatch::default();
        match request {
            HostGuestRequest::RegisterSession => {
                let mut rng = rand::rng();
                let code = match self.sessions.generate_code(&mut rng) {
                    Ok(code) => code,
                    Err(err) => {
                        warn!("{err}");
                        return dispatch;
                    }
                };
                dispatch.reply(from, protocol::ok_with_code(from.port(), &code));
                if let Err(err) = self.sessions.create(Session::host_guest(&code, from)) {
                    warn!("{err}");
                } else {
                    info!("session {code} registered by host {from}");
                }
            }
            HostGuestRequest::RegisterClient { session_id } => {
                match self.sessions.get(&session_id).and_then(Session::host) {
                    Some(host) => {
                        dispatch.reply(from, protocol::ok_with_host(from.port(), host));
                        info!("guest {from} received host address for session {session_id}");
                    }
                    None => {
                        debug!("{}", ProtocolError::not_found("session", &session_id));
                        dispatch.reply(from, protocol::REPLY_UNKNOWN_SESSION.to_string());
                    }
                }
            }
            HostGuestRequest::TerminateSession { session_id } => {
                // The protocol acknowledges unconditionally and gives no
                // rejection datagram; only the recorded host can delete.
                dispatch.reply(from, protocol::REPLY_OK.to_string());
                match self.sessions.remove_authorized(&session_id, from) {
                    Ok(session) => info!("session {} terminated by host", session.id()),
                    Err(err) => warn!("{err}"),
                }
            }
        }
        dispatch
    }

    fn sweep(&mut self, now: Instant, max_age: Duration) -> usize {
        let removed = self.sessions.sweep_expired(now, max_age);
        for session in &removed {
            info!("session {} expired", session.id());
        }
        removed.len()
    }
}

/// Handler for the group rendezvous variant.
#[derive(Default)]
pub struct GroupEngine {
    sessions: SessionRegistry,
    clients: ClientRegistry,
}

impl GroupEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&mut self, request: GroupRequest, from: SocketAddr) -> Dispatch {
        let mut dispatch = Dispatch::default();
        match request {
            GroupRequest::RegisterSession {
                session_id,
                max_clients,
            } => match self.sessions.create(Session::group(&session_id, max_clients)) {
                Ok(()) => {
                    info!("group session {session_id} created, waiting for {max_clients} clients");
                    dispatch.reply(from, protocol::ok_with_port(from.port()));
                }
                Err(err) => warn!("{err}"),
            },
            GroupRequest::RegisterClient { name, session_id } => {
                self.register_client(name, session_id, from, &mut dispatch);
            }
            GroupRequest::ExchangePeers { session_id } => {
                info!("peer exchange forced for session {session_id}");
                let broadcasts = self.run_exchange(&session_id);
                dispatch.outbound.extend(broadcasts);
            }
            GroupRequest::Checkout { name } => match self.clients.checkout(&name) {
                Some(client) => {
                    info!("client {name} checked out of session {}", client.session_id)
                }
                None => debug!("{}", ProtocolError::not_found("client", &name)),
            },
        }
        dispatch
    }

    fn register_client(
        &mut self,
        name: String,
        session_id: String,
        from: SocketAddr,
        dispatch: &mut Dispatch,
    ) {
        // Names are globally unique; a duplicate leaves the original entry
        // untouched and gets no reply.
        if self.clients.get(&name).is_some() {
            warn!("{}", ProtocolError::duplicate("client", &name));
            return;
        }
        // Clients register only for live sessions; otherwise no entry is
        // created at all.
        let Some(group) = self
            .sessions
            .get_mut(&session_id)
            .and_then(Session::group_state_mut)
        else {
            warn!("{}", ProtocolError::not_found("session", &session_id));
            return;
        };

        match group.register(&name) {
            RegisterOutcome::Ignored => {
                debug!("client {name} ignored by session {session_id}");
            }
            outcome => {
                if let Err(err) = self.clients.register(Client::new(&name, &session_id, from)) {
                    warn!("{err}");
                    return;
                }
                info!("client {name} registered for session {session_id} from {from}");
                dispatch.reply(from, protocol::ok_with_port(from.port()));
                if outcome == RegisterOutcome::Complete {
                    dispatch.scheduled_exchanges.push(session_id);
                }
            }
        }
    }

    /// Broadcast to every registered client the list of all other clients'
    /// `name:ip:port` triples, then check the clients out and drop the
    /// session. Best-effort: nothing is acknowledged or retried.
    pub fn run_exchange(&mut self, session_id: &str) -> Vec<Datagram> {
        let Some(session) = self.sessions.remove(session_id) else {
            // Already exchanged, or swept while the exchange was pending.
            debug!("{}", ProtocolError::not_found("session", session_id));
            return Vec::new();
        };
        let Some(group) = session.group_state() else {
            warn!("session {session_id} is not a group session");
            return Vec::new();
        };

        let peers: Vec<(String, SocketAddr)> = group
            .registered()
            .iter()
            .filter_map(|name| self.clients.get(name).map(|c| (c.name.clone(), c.addr)))
            .collect();

        let mut broadcasts = Vec::with_capacity(peers.len());
        for (name, addr) in &peers {
            let others: Vec<(String, SocketAddr)> = peers
                .iter()
                .filter(|(peer, _)| peer != name)
                .cloned()
                .collect();
            broadcasts.push(Datagram {
                to: *addr,
                payload: protocol::peer_list(&others),
            });
        }

        for (name, _) in &peers {
            self.clients.checkout(name);
        }
        info!(
            "session {session_id} exchanged addresses between {} peers",
            peers.len()
        );
        broadcasts
    }

    fn sweep(&mut self, now: Instant, max_age: Duration) -> usize {
        let removed = self.sessions.sweep_expired(now, max_age);
        for session in &removed {
            // Orphaned clients of an expired session go with it.
            if let Some(group) = session.group_state() {
                for name in group.registered() {
                    self.clients.checkout(name);
                }
            }
            info!("session {} expired", session.id());
        }
        removed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn single_reply(dispatch: &Dispatch) -> &Datagram {
        assert_eq!(dispatch.outbound.len(), 1, "expected exactly one reply");
        &dispatch.outbound[0]
    }

    #[test]
    fn test_group_rendezvous_for_two() {
        let mut engine = Engine::new(ProtocolMode::Group);
        let creator = addr("203.0.113.1:9999");
        let alice = addr("198.51.100.1:1111");
        let bob = addr("198.51.100.2:2222");

        let d = engine.handle_datagram(b"rs:game1:2", creator);
        assert_eq!(single_reply(&d).payload, "ok:9999");

        let d = engine.handle_datagram(b"rc:alice:game1", alice);
        assert_eq!(single_reply(&d).payload, "ok:1111");
        assert!(d.scheduled_exchanges.is_empty());

        // The second registration completes the group and schedules the
        // exchange instead of blocking the dispatch path.
        let d = engine.handle_datagram(b"rc:bob:game1", bob);
        assert_eq!(single_reply(&d).payload, "ok:2222");
        assert_eq!(d.scheduled_exchanges, vec!["game1".to_string()]);
        assert_eq!(engine.active_clients(), 2);

        let broadcasts = engine.run_exchange("game1");
        assert_eq!(
            broadcasts,
            vec![
                Datagram {
                    to: alice,
                    payload: "peers:bob:198.51.100.2:2222".to_string()
                },
                Datagram {
                    to: bob,
                    payload: "peers:alice:198.51.100.1:1111".to_string()
                },
            ]
        );

        // Exchange tears everything down, and running it again is a no-op.
        assert_eq!(engine.active_sessions(), 0);
        assert_eq!(engine.active_clients(), 0);
        assert!(engine.run_exchange("game1").is_empty());
    }

    #[test]
    fn test_register_for_unknown_session_creates_nothing() {
        let mut engine = Engine::new(ProtocolMode::Group);
        let d = engine.handle_datagram(b"rc:alice:nosuch", addr("198.51.100.1:1111"));
        assert!(d.outbound.is_empty());
        assert_eq!(engine.active_clients(), 0);
    }

    #[test]
    fn test_duplicate_name_keeps_original_and_sends_no_reply() {
        let mut engine = Engine::new(ProtocolMode::Group);
        engine.handle_datagram(b"rs:game1:3", addr("203.0.113.1:9999"));
        engine.handle_datagram(b"rc:alice:game1", addr("198.51.100.1:1111"));

        let d = engine.handle_datagram(b"rc:alice:game1", addr("198.51.100.9:7777"));
        assert!(d.outbound.is_empty());
        assert!(d.scheduled_exchanges.is_empty());
        assert_eq!(engine.active_clients(), 1);
    }

    #[test]
    fn test_duplicate_group_session_gets_no_reply() {
        let mut engine = Engine::new(ProtocolMode::Group);
        engine.handle_datagram(b"rs:game1:2", addr("203.0.113.1:9999"));
        let d = engine.handle_datagram(b"rs:game1:4", addr("203.0.113.2:8888"));
        assert!(d.outbound.is_empty());
        assert_eq!(engine.active_sessions(), 1);
    }

    #[test]
    fn test_forced_exchange_broadcasts_to_partial_group() {
        let mut engine = Engine::new(ProtocolMode::Group);
        let alice = addr("198.51.100.1:1111");
        engine.handle_datagram(b"rs:game1:3", addr("203.0.113.1:9999"));
        engine.handle_datagram(b"rc:alice:game1", alice);

        let d = engine.handle_datagram(b"ep:game1", addr("203.0.113.1:9999"));
        assert_eq!(
            d.outbound,
            vec![Datagram {
                to: alice,
                payload: "peers:".to_string()
            }]
        );
        assert_eq!(engine.active_sessions(), 0);
        assert_eq!(engine.active_clients(), 0);
    }

    #[test]
    fn test_checkout_removes_client() {
        let mut engine = Engine::new(ProtocolMode::Group);
        engine.handle_datagram(b"rs:game1:3", addr("203.0.113.1:9999"));
        engine.handle_datagram(b"rc:alice:game1", addr("198.51.100.1:1111"));
        assert_eq!(engine.active_clients(), 1);

        let d = engine.handle_datagram(b"cc:alice", addr("198.51.100.1:1111"));
        assert!(d.outbound.is_empty());
        assert_eq!(engine.active_clients(), 0);

        // Checking out an absent client stays a no-op.
        engine.handle_datagram(b"cc:alice", addr("198.51.100.1:1111"));
        assert_eq!(engine.active_clients(), 0);
    }

    #[test]
    fn test_host_guest_flow() {
        let mut engine = Engine::new(ProtocolMode::HostGuest);
        let host = addr("203.0.113.1:4567");
        let guest = addr("198.51.100.7:7654");

        let d = engine.handle_datagram(b"rs", host);
        let reply = single_reply(&d).payload.clone();
        assert!(reply.starts_with("ok:4567:"));
        let code = reply.rsplit(':').next().unwrap().to_string();
        assert_eq!(code.len(), 5);

        let d = engine.handle_datagram(format!("rc:{code}").as_bytes(), guest);
        assert_eq!(single_reply(&d).payload, "ok:7654:203.0.113.1:4567");

        // Unknown code gets the explicit failure reply.
        let d = engine.handle_datagram(b"rc:ZZZZZ", guest);
        assert_eq!(single_reply(&d).payload, "ex");
    }

    #[test]
    fn test_terminate_requires_host_address() {
        let mut engine = Engine::new(ProtocolMode::HostGuest);
        let host = addr("203.0.113.1:4567");
        let guest = addr("198.51.100.7:7654");

        let d = engine.handle_datagram(b"rs", host);
        let code = single_reply(&d).payload.rsplit(':').next().unwrap().to_string();

        // A non-host gets the same "ok" but the session survives.
        let d = engine.handle_datagram(format!("ts:{code}").as_bytes(), guest);
        assert_eq!(single_reply(&d).payload, "ok");
        let d = engine.handle_datagram(format!("rc:{code}").as_bytes(), guest);
        assert!(single_reply(&d).payload.starts_with("ok:"));

        // The host's termination sticks.
        let d = engine.handle_datagram(format!("ts:{code}").as_bytes(), host);
        assert_eq!(single_reply(&d).payload, "ok");
        let d = engine.handle_datagram(format!("rc:{code}").as_bytes(), guest);
        assert_eq!(single_reply(&d).payload, "ex");
    }

    #[test]
    fn test_sweep_expires_both_variants_and_checks_out_clients() {
        MockClock::set_time(Duration::ZERO);
        let max_age = Duration::from_secs(24 * 3600);

        let mut host_guest = Engine::new(ProtocolMode::HostGuest);
        host_guest.handle_datagram(b"rs", addr("203.0.113.1:4567"));

        let mut group = Engine::new(ProtocolMode::Group);
        group.handle_datagram(b"rs:game1:3", addr("203.0.113.1:9999"));
        group.handle_datagram(b"rc:alice:game1", addr("198.51.100.1:1111"));

        MockClock::advance(Duration::from_secs(25 * 3600));

        assert_eq!(host_guest.sweep(Instant::now(), max_age), 1);
        assert_eq!(host_guest.active_sessions(), 0);

        assert_eq!(group.sweep(Instant::now(), max_age), 1);
        assert_eq!(group.active_sessions(), 0);
        assert_eq!(group.active_clients(), 0);
    }

    #[test]
    fn test_malformed_datagrams_are_dropped() {
        let mut engine = Engine::new(ProtocolMode::Group);
        for bad in [
            &b""[..],
            &b"x"[..],
            &b"zz:wat"[..],
            &b"rs"[..],
            &b"rs:game1:none"[..],
            &b"rc:alice"[..],
            &[0xff, 0xfe][..],
        ] {
            let d = engine.handle_datagram(bad, addr("198.51.100.1:1111"));
            assert!(d.outbound.is_empty(), "reply for {bad:?}");
            assert!(d.scheduled_exchanges.is_empty());
        }
        assert_eq!(engine.active_sessions(), 0);
        assert_eq!(engine.active_clients(), 0);
    }
}
