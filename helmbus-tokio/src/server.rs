//! The TCP server: accept loop and shared broker.

use std::sync::Arc;

use helmbus_core::{Broker, BrokerConfig, TimeSource};
use log::{info, warn};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use crate::handler::{handle_connection, HandlerConfig};
use crate::state::ServerState;
use crate::time::WallClock;

/// The broker behind its single serialization point.
pub type SharedBroker = Arc<Mutex<Broker>>;

#[derive(Debug, Clone)]
pub struct BusServerConfig {
    /// Name announced to registering clients.
    pub community: String,
    /// Inbound silence after which a connection is dropped. Zero
    /// disables the check.
    pub idle_timeout_secs: u64,
    pub frame_channel_capacity: usize,
}

impl Default for BusServerConfig {
    fn default() -> Self {
        Self {
            community: "helmbus".to_owned(),
            idle_timeout_secs: 60,
            frame_channel_capacity: 32,
        }
    }
}

/// One broker plus its accept loop.
pub struct BusServer {
    broker: SharedBroker,
    state: Arc<ServerState>,
    handler_config: HandlerConfig,
    clock: Arc<dyn TimeSource>,
}

impl Default for BusServer {
    fn default() -> Self {
        Self::new(BusServerConfig::default())
    }
}

impl BusServer {
    pub fn new(config: BusServerConfig) -> Self {
        Self::with_clock(config, WallClock)
    }

    /// Run against an injected clock. Tests pin time with this; the
    /// normal path uses [`WallClock`].
    pub fn with_clock(config: BusServerConfig, clock: impl TimeSource) -> Self {
        let broker = Broker::new(BrokerConfig {
            community: config.community.clone(),
            // The handler owns liveness; the broker-side check stays off.
            idle_timeout_secs: 0.0,
        });
        BusServer {
            broker: Arc::new(Mutex::new(broker)),
            state: Arc::new(ServerState::new()),
            handler_config: HandlerConfig {
                idle_timeout_secs: config.idle_timeout_secs,
                frame_channel_capacity: config.frame_channel_capacity,
            },
            clock: Arc::new(clock),
        }
    }

    /// Handle on the shared broker, for inspection and tooling.
    pub fn broker(&self) -> SharedBroker {
        Arc::clone(&self.broker)
    }

    pub fn connection_count(&self) -> usize {
        self.state.connection_count()
    }

    /// Bind and serve forever.
    pub async fn run(&self, addr: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("listening on {}", addr);
        self.serve(listener).await
    }

    /// Serve on an already-bound listener. Useful when the caller needs
    /// the ephemeral port before the loop starts.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (socket, peer_addr) = listener.accept().await?;
            let peer_addr = peer_addr.to_string();
            let state = Arc::clone(&self.state);
            let broker = Arc::clone(&self.broker);
            let config = self.handler_config.clone();
            let clock = Arc::clone(&self.clock);

            tokio::spawn(async move {
                if let Err(e) =
                    handle_connection(socket, peer_addr.clone(), state, broker, &config, clock)
                        .await
                {
                    warn!("connection {} ended with error: {}", peer_addr, e);
                }
            });
        }
    }
}
