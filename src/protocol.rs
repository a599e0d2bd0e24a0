//! Wire grammar for the rendezvous protocol.
//!
//! Messages are UTF-8 text, `:`-separated, with a two-character type tag as
//! the first field. There is no length prefix; message boundary = datagram
//! boundary.
//!
//! Two protocol variants share the tag space:
//! - host/guest: `rs`, `rc:<session_id>`, `ts:<session_id>`
//! - group: `rs:<session_id>:<max_clients>`, `rc:<name>:<session_id>`,
//!   `ep:<session_id>`, `cc:<name>`
//!
//! The `rs`/`rc` tags differ only in arity between the variants, so the
//! variant served is chosen at startup rather than sniffed per datagram.

use std::net::SocketAddr;

use crate::error::ProtocolError;

/// Register a session (become host / create a group).
pub const TAG_REGISTER_SESSION: &str = "rs";
/// Register a client for an existing session.
pub const TAG_REGISTER_CLIENT: &str = "rc";
/// Terminate a session (host/guest variant, host-authorized).
pub const TAG_TERMINATE_SESSION: &str = "ts";
/// Force the peer exchange for a session (group variant).
pub const TAG_EXCHANGE_PEERS: &str = "ep";
/// Check a client out of the registry (group variant).
pub const TAG_CHECKOUT_CLIENT: &str = "cc";

/// Bare acknowledgment reply (`ts`).
pub const REPLY_OK: &str = "ok";
/// Reply for a `rc` naming a session that does not exist (host/guest).
pub const REPLY_UNKNOWN_SESSION: &str = "ex";

/// Request in the host/guest variant: one client registers a session and
/// becomes host, guests query the host address for a code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostGuestRequest {
    /// `rs`
    RegisterSession,
    /// `rc:<session_id>`
    RegisterClient { session_id: String },
    /// `ts:<session_id>`
    TerminateSession { session_id: String },
}

/// Request in the group rendezvous variant: named clients accumulate until
/// the group is complete, then everyone receives the peer list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupRequest {
    /// `rs:<session_id>:<max_clients>`
    RegisterSession {
        session_id: String,
        max_clients: usize,
    },
    /// `rc:<name>:<session_id>`
    RegisterClient { name: String, session_id: String },
    /// `ep:<session_id>`
    ExchangePeers { session_id: String },
    /// `cc:<name>`
    Checkout { name: String },
}

/// Decode a raw datagram into protocol text.
///
/// Trailing whitespace is stripped so clients that append a newline still
/// parse. Anything shorter than a type tag is rejected.
pub fn decode(payload: &[u8]) -> Result<&str, ProtocolError> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| ProtocolError::Parse("datagram is not valid UTF-8".into()))?;
    let text = text.trim_end();
    if text.len() < 2 {
        return Err(ProtocolError::Parse(
            "datagram shorter than a type tag".into(),
        ));
    }
    Ok(text)
}

/// Parse a host/guest request. Extra fields beyond the expected arity are
/// ignored, missing or empty required fields are a parse error.
pub fn parse_host_guest(text: &str) -> Result<HostGuestRequest, ProtocolError> {
    let fields: Vec<&str> = text.split(':').collect();
    match fields[0] {
        TAG_REGISTER_SESSION => Ok(HostGuestRequest::RegisterSession),
        TAG_REGISTER_CLIENT => Ok(HostGuestRequest::RegisterClient {
            session_id: required_field(&fields, 1, "session id")?.to_string(),
        }),
        TAG_TERMINATE_SESSION => Ok(HostGuestRequest::TerminateSession {
            session_id: required_field(&fields, 1, "session id")?.to_string(),
        }),
        other => Err(ProtocolError::Parse(format!(
            "unknown message tag {other:?}"
        ))),
    }
}

/// Parse a group rendezvous request.
pub fn parse_group(text: &str) -> Result<GroupRequest, ProtocolError> {
    let fields: Vec<&str> = text.split(':').collect();
    match fields[0] {
        TAG_REGISTER_SESSION => {
            let session_id = required_field(&fields, 1, "session id")?.to_string();
            let raw = required_field(&fields, 2, "client count")?;
            let max_clients: usize = raw
                .parse()
                .map_err(|_| ProtocolError::Parse(format!("bad client count {raw:?}")))?;
            if max_clients == 0 {
                return Err(ProtocolError::Parse(
                    "client count must be at least 1".into(),
                ));
            }
            Ok(GroupRequest::RegisterSession {
                session_id,
                max_clients,
            })
        }
        TAG_REGISTER_CLIENT => Ok(GroupRequest::RegisterClient {
            name: required_field(&fields, 1, "client name")?.to_string(),
            session_id: required_field(&fields, 2, "session id")?.to_string(),
        }),
        TAG_EXCHANGE_PEERS => Ok(GroupRequest::ExchangePeers {
            session_id: required_field(&fields, 1, "session id")?.to_string(),
        }),
        TAG_CHECKOUT_CLIENT => Ok(GroupRequest::Checkout {
            name: required_field(&fields, 1, "client name")?.to_string(),
        }),
        other => Err(ProtocolError::Parse(format!(
            "unknown message tag {other:?}"
        ))),
    }
}

fn required_field<'a>(
    fields: &[&'a str],
    index: usize,
    what: &str,
) -> Result<&'a str, ProtocolError> {
    match fields.get(index) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ProtocolError::Parse(format!("missing {what}"))),
    }
}

/// `ok:<observed_port>`: acknowledgment echoing the sender's public port.
///
/// NAT rewrites the source port, so this echo is how a client learns its own
/// public port.
pub fn ok_with_port(port: u16) -> String {
    format!("ok:{port}")
}

/// `ok:<observed_port>:<code>`: host acknowledgment with the generated code.
pub fn ok_with_code(port: u16, code: &str) -> String {
    format!("ok:{port}:{code}")
}

/// `ok:<observed_port>:<host_ip>:<host_port>`: guest reply carrying the
/// host's public address.
pub fn ok_with_host(port: u16, host: SocketAddr) -> String {
    format!("ok:{}:{}:{}", port, host.ip(), host.port())
}

/// `peers:<name>:<ip>:<port>,...`: exchange broadcast payload. The caller
/// is responsible for excluding the recipient from `peers`.
pub fn peer_list(peers: &[(String, SocketAddr)]) -> String {
    let body = peers
        .iter()
        .map(|(name, addr)| format!("{}:{}:{}", name, addr.ip(), addr.port()))
        .collect::<Vec<_>>()
        .join(",");
    format!("peers:{body}")
}
