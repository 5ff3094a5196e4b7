//! Wire protocol error types
//!
//! All of these are fatal to the connection that produced the bytes,
//! never to the broker itself.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Declared and actual lengths disagree, or a record overruns its
    /// packet.
    Framing { detail: &'static str },
    /// The input ended in the middle of a record that the packet header
    /// promised would be complete.
    TruncatedInput { available: usize, needed: usize },
    /// Unrecognized record tag.
    UnknownTag { tag: u8 },
    /// A key, source, or string payload was not valid UTF-8.
    InvalidUtf8,
    /// Declared packet length exceeds the configured maximum.
    PacketTooLarge { declared: usize, max: usize },
    /// A control record carried the wrong payload form, e.g. a timing
    /// record whose payload is not 24 bytes.
    InvalidControlPayload { tag: u8 },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Framing { detail } => write!(f, "framing error: {}", detail),
            ProtocolError::TruncatedInput { available, needed } => write!(
                f,
                "truncated input: {} bytes available, {} needed",
                available, needed
            ),
            ProtocolError::UnknownTag { tag } => write!(f, "unknown record tag: {:#04x}", tag),
            ProtocolError::InvalidUtf8 => write!(f, "invalid UTF-8 in string field"),
            ProtocolError::PacketTooLarge { declared, max } => {
                write!(f, "packet too large: {} bytes declared, max {}", declared, max)
            }
            ProtocolError::InvalidControlPayload { tag } => {
                write!(f, "invalid payload for control record {:#04x}", tag)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}
