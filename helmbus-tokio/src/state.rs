use dashmap::DashMap;

/// Lightweight per-connection metadata.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub session_id: u64,
    pub peer_addr: String,
}

/// Server state tracking connections and outbox notifications.
///
/// Session ids themselves come from the broker; this only maps them to
/// the channel that wakes the owning connection task when another
/// client's publish lands mail in its outbox.
pub struct ServerState {
    pub connections: DashMap<u64, ConnectionHandle>,
    notification_senders: DashMap<u64, tokio::sync::mpsc::Sender<()>>,
}

impl ServerState {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            notification_senders: DashMap::new(),
        }
    }

    pub fn register_notification(&self, session_id: u64, sender: tokio::sync::mpsc::Sender<()>) {
        self.notification_senders.insert(session_id, sender);
    }

    pub fn remove_notification(&self, session_id: u64) {
        self.notification_senders.remove(&session_id);
    }

    /// Wake the task owning `session_id`. A full channel is fine: one
    /// pending wakeup drains the whole outbox.
    pub fn notify_session(&self, session_id: u64) {
        if let Some(sender) = self.notification_senders.get(&session_id) {
            let _ = sender.try_send(());
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}
