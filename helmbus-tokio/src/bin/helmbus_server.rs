//! Standalone broker server.
//!
//! ```text
//! helmbus-server [BIND_ADDR]
//! ```
//!
//! Environment:
//! - `HELMBUS_BIND`       bind address, default 0.0.0.0:9000
//! - `HELMBUS_COMMUNITY`  community name, default helmbus
//! - `RUST_LOG`           log filter, e.g. debug

use helmbus_tokio::{BusServer, BusServerConfig};
use log::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let bind = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("HELMBUS_BIND").ok())
        .unwrap_or_else(|| "0.0.0.0:9000".to_owned());
    let community = std::env::var("HELMBUS_COMMUNITY").unwrap_or_else(|_| "helmbus".to_owned());

    info!("starting broker for community \"{}\" on {}", community, bind);

    let server = BusServer::new(BusServerConfig {
        community,
        ..Default::default()
    });
    server.run(&bind).await?;
    Ok(())
}
