//! # helmbus-core
//!
//! Core pub/sub broker library for a distributed real-time robotics stack.
//!
//! Many independent processes connect to a single central broker, publish
//! named, timestamped values, and subscribe — by exact name or wildcard
//! pattern — to values published by others, at a bounded delivery rate.
//! This crate contains the broker logic, the wire protocol, and the
//! clock-skew estimator. It is runtime-agnostic: no async, no sockets.
//! The `helmbus-tokio` crate puts it on the network.
//!
//! ## Modules
//!
//! - [`message`] — the `Message` data model carried on the wire
//! - [`protocol`] — length-prefixed wire framing (encode/decode)
//! - [`matcher`] — glob-style subscription pattern matching
//! - [`directory`] — the variable directory: values, stats, subscribers,
//!   delivery throttling
//! - [`skew`] — convex-envelope clock-skew estimation between broker and
//!   client clocks
//! - [`broker`] — ties the above together behind a single serialization
//!   point
//!
//! ## Guarantees
//!
//! - A subscriber sees one publisher's writes to one variable in publish
//!   order (per-client outboxes are FIFO).
//! - Delivery is throttled per subscription: bursts above the requested
//!   rate are superseded by the freshest value, never queued.
//! - Malformed wire data closes the offending connection only.

pub mod broker;
pub mod directory;
pub mod error;
pub mod matcher;
pub mod message;
pub mod protocol;
pub mod session;
pub mod skew;
pub mod time;

pub use broker::{Broker, BrokerConfig};
pub use directory::VariableDirectory;
pub use error::{BrokerError, Result};
pub use matcher::{wildcard_match, MsgFilter};
pub use message::{Message, MessageKind, Payload, PayloadKind};
pub use protocol::{decode_frame, encode_frame, FrameStatus, ProtocolError};
pub use session::{ClientSession, SessionState};
pub use skew::{ConditionedSkewFilter, SkewEstimate, SkewFilter};
pub use time::TimeSource;
