//! # helmbus-tokio
//!
//! A Tokio TCP server for the helmbus pub/sub broker.
//!
//! This crate puts `helmbus-core` on the network: one task per client
//! connection, a shared broker behind a mutex, and per-session wakeups
//! when fan-out puts mail in an outbox.
//!
//! ## Example
//!
//! ```no_run
//! use helmbus_tokio::BusServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = BusServer::default();
//!     server.run("0.0.0.0:9000").await?;
//!     Ok(())
//! }
//! ```

// Re-export core types for convenience
pub use helmbus_core::{Broker, BrokerConfig, Message, MessageKind, Payload};

// Public API
pub mod server;
pub use server::{BusServer, BusServerConfig, SharedBroker};

pub mod time;
pub use time::WallClock;

// Modules (private)
mod handler;
mod io;
mod state;
