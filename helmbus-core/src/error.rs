//! Broker-level error types
//!
//! These are request-fatal, never broker-fatal: the offending message is
//! rejected and logged, the broker keeps serving. Wire-level failures
//! live in [`crate::protocol::ProtocolError`] and close the connection
//! that produced them.

use std::fmt;

use crate::message::PayloadKind;

#[derive(Debug, Clone, PartialEq)]
pub enum BrokerError {
    /// No session with this id (already disconnected, or never opened).
    SessionNotFound { session_id: u64 },
    /// Another live session already registered this identity.
    IdentityInUse { identity: String },
    /// A publish or subscribe arrived before `Register`.
    NotRegistered { session_id: u64 },
    /// A write whose payload kind disagrees with the variable's latched
    /// type.
    TypeMismatch {
        key: String,
        expected: PayloadKind,
        actual: PayloadKind,
    },
    /// Client identity fields must be non-empty.
    EmptyIdentity,
    /// Introspection query the broker does not know.
    UnknownQuery { what: String },
}

impl BrokerError {
    /// True for errors that condemn one request rather than the session.
    /// The server rejects the message and keeps the connection; anything
    /// else means the session itself is unusable.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            BrokerError::TypeMismatch { .. } | BrokerError::UnknownQuery { .. }
        )
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::SessionNotFound { session_id } => {
                write!(f, "no such session: {}", session_id)
            }
            BrokerError::IdentityInUse { identity } => {
                write!(f, "identity already in use: \"{}\"", identity)
            }
            BrokerError::NotRegistered { session_id } => {
                write!(f, "session {} has not registered an identity", session_id)
            }
            BrokerError::TypeMismatch {
                key,
                expected,
                actual,
            } => write!(
                f,
                "variable \"{}\" holds {} data, write carried {}",
                key, expected, actual
            ),
            BrokerError::EmptyIdentity => write!(f, "client identity must not be empty"),
            BrokerError::UnknownQuery { what } => write!(f, "unknown query: \"{}\"", what),
        }
    }
}

impl std::error::Error for BrokerError {}

pub type Result<T> = std::result::Result<T, BrokerError>;
