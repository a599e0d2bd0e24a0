//! Error types for the rendezvous protocol engine.

use thiserror::Error;

/// Errors produced while handling a single datagram.
///
/// Every variant is recovered locally by the dispatch path: the datagram is
/// dropped and the error logged. None of these may propagate as a fault that
/// stops the serve loop; one malformed datagram must never take down session
/// processing for other clients.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Malformed, truncated, or non-UTF-8 message.
    #[error("unparseable datagram: {0}")]
    Parse(String),

    /// Session id or client name already exists.
    #[error("duplicate {kind} {id:?}")]
    Duplicate { kind: &'static str, id: String },

    /// Referenced session or client does not exist.
    #[error("unknown {kind} {id:?}")]
    NotFound { kind: &'static str, id: String },

    /// Session termination attempted by someone other than the host.
    #[error("refusing to terminate session {0:?}: requester is not the host")]
    Unauthorized(String),

    /// The bounded code-generation loop ran out of attempts.
    #[error("no free session code found after {0} attempts")]
    CodeSpaceExhausted(usize),
}

impl ProtocolError {
    pub fn duplicate(kind: &'static str, id: impl Into<String>) -> Self {
        ProtocolError::Duplicate {
            kind,
            id: id.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        ProtocolError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
