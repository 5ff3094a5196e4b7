use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use helmbus_core::{Broker, Message, TimeSource};
use log::{debug, info, trace, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration, Instant};

use crate::io::{encode_packet, read_packet};
use crate::state::{ConnectionHandle, ServerState};

/// Per-connection tuning.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Inbound silence after which the connection is dropped. Zero
    /// disables the check.
    pub idle_timeout_secs: u64,
    pub frame_channel_capacity: usize,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 60,
            frame_channel_capacity: 32,
        }
    }
}

fn describe(msg: &Message) -> String {
    format!("{} key=\"{}\" src=\"{}\"", msg.kind, msg.key, msg.source)
}

/// Drive one client connection until it disconnects.
///
/// The task multiplexes four things: inbound packets, wakeups from other
/// connections' fan-outs, its own outbound write queue, and the idle
/// timer. The broker lock is held only while dispatching or draining,
/// never across socket I/O.
pub async fn handle_connection(
    mut socket: TcpStream,
    peer_addr: String,
    state: Arc<ServerState>,
    broker: Arc<tokio::sync::Mutex<Broker>>,
    config: &HandlerConfig,
    clock: Arc<dyn TimeSource>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Admit the session.
    let session_id = {
        let mut broker_guard = broker.lock().await;
        broker_guard.open_session(clock.now())
    };
    info!("session {} accepted from {}", session_id, peer_addr);

    // Wakeups from fan-out on other connections.
    let (notify_tx, mut notify_rx) = mpsc::channel(8);
    state.register_notification(session_id, notify_tx);
    state.connections.insert(
        session_id,
        ConnectionHandle {
            session_id,
            peer_addr: peer_addr.clone(),
        },
    );

    // Outbound frames, decoupled from the branches that produce them.
    let (frame_tx, mut frame_rx) = mpsc::channel::<Bytes>(config.frame_channel_capacity);

    let mut read_buffer = BytesMut::with_capacity(4096);

    let mut last_activity = Instant::now();
    let idle_timeout = if config.idle_timeout_secs > 0 {
        Duration::from_secs(config.idle_timeout_secs)
    } else {
        Duration::from_secs(u64::MAX / 4)
    };

    loop {
        let time_until_timeout = idle_timeout.saturating_sub(last_activity.elapsed());

        tokio::select! {
            read_result = read_packet(&mut socket, &mut read_buffer) => {
                match read_result {
                    Ok(Some(messages)) => {
                        last_activity = Instant::now();

                        let mut broker_guard = broker.lock().await;
                        let now = clock.now();
                        let mut failed = false;
                        for msg in &messages {
                            debug!("session {}: received {}", session_id, describe(msg));
                            if let Err(e) = broker_guard.handle_message(session_id, msg, now) {
                                // Bad requests are rejected per message; only
                                // session-level failures drop the connection.
                                warn!("session {}: dispatch error: {}", session_id, e);
                                if !e.is_request_error() {
                                    failed = true;
                                    break;
                                }
                            }
                        }

                        let to_notify = broker_guard.sessions_with_mail();
                        let own_mail = broker_guard.drain_outbox(session_id).unwrap_or_default();
                        drop(broker_guard);

                        // Mail from the valid messages in this batch is
                        // already committed, so wake its recipients even
                        // when a later message killed the session.
                        for sid in to_notify {
                            if sid != session_id {
                                state.notify_session(sid);
                            }
                        }

                        if failed {
                            break;
                        }

                        if !own_mail.is_empty() {
                            debug!("session {}: sending {} messages", session_id, own_mail.len());
                            if frame_tx.send(encode_packet(&own_mail)).await.is_err() {
                                warn!("session {}: frame channel closed", session_id);
                                break;
                            }
                        }
                    }
                    Ok(None) => {
                        info!("session {}: client closed connection", session_id);
                        break;
                    }
                    Err(e) => {
                        warn!("session {}: read error: {}", session_id, e);
                        break;
                    }
                }
            }

            // Another connection's publish put mail in our outbox.
            Some(()) = notify_rx.recv() => {
                trace!("session {}: outbound wakeup", session_id);
                let mut broker_guard = broker.lock().await;
                let mail = broker_guard.drain_outbox(session_id).unwrap_or_default();
                drop(broker_guard);

                if !mail.is_empty() {
                    debug!("session {}: sending {} messages", session_id, mail.len());
                    if frame_tx.send(encode_packet(&mail)).await.is_err() {
                        warn!("session {}: frame channel closed", session_id);
                        break;
                    }
                }
            }

            Some(frame) = frame_rx.recv() => {
                trace!("session {}: writing {} bytes", session_id, frame.len());
                if let Err(e) = socket.write_all(&frame).await {
                    warn!("session {}: write error: {}", session_id, e);
                    break;
                }
                if let Err(e) = socket.flush().await {
                    warn!("session {}: flush error: {}", session_id, e);
                    break;
                }
            }

            _ = sleep(time_until_timeout) => {
                if last_activity.elapsed() >= idle_timeout {
                    info!("session {}: idle timeout", session_id);
                    break;
                }
            }
        }
    }

    // Cleanup must finish before the identity can be reused.
    info!("session {}: closing ({})", session_id, peer_addr);
    state.connections.remove(&session_id);
    state.remove_notification(session_id);
    {
        let mut broker_guard = broker.lock().await;
        broker_guard.close_session(session_id);
    }

    Ok(())
}
