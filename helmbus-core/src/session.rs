//! Per-client session state.
//!
//! A session is the broker-side record of one connection: its identity
//! once registered, its pending outbox, its skew estimator, and where it
//! sits in the connection lifecycle. Sessions are created on accept and
//! torn down on disconnect; subscription state lives in the directory,
//! not here.

use std::collections::VecDeque;

use crate::message::Message;
use crate::skew::ConditionedSkewFilter;

/// Connection lifecycle. `Active` is entered on the first successful
/// publish or delivery after registration; `Disconnected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Registered,
    Active,
    Disconnected,
}

/// One connected client.
#[derive(Debug)]
pub struct ClientSession {
    session_id: u64,
    identity: Option<String>,
    state: SessionState,
    /// FIFO of messages awaiting delivery to this client.
    outbox: VecDeque<Message>,
    /// Skew of this client's clock relative to ours.
    skew: ConditionedSkewFilter,
    last_activity: f64,
}

impl ClientSession {
    pub fn new(session_id: u64, now: f64) -> Self {
        ClientSession {
            session_id,
            identity: None,
            state: SessionState::Connecting,
            outbox: VecDeque::new(),
            skew: ConditionedSkewFilter::new(),
            last_activity: now,
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// The registered identity, or None while still `Connecting`.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn register(&mut self, identity: String, now: f64) {
        self.identity = Some(identity);
        self.state = SessionState::Registered;
        self.last_activity = now;
    }

    /// First publish or delivery promotes a registered session.
    pub fn mark_active(&mut self) {
        if self.state == SessionState::Registered {
            self.state = SessionState::Active;
        }
    }

    pub fn disconnect(&mut self) {
        self.state = SessionState::Disconnected;
        self.outbox.clear();
    }

    pub fn touch(&mut self, now: f64) {
        self.last_activity = now;
    }

    /// Seconds since this session last sent us anything.
    pub fn idle_secs(&self, now: f64) -> f64 {
        now - self.last_activity
    }

    pub fn queue_mail(&mut self, msg: Message) {
        self.outbox.push_back(msg);
    }

    /// Take everything pending, preserving queue order.
    pub fn drain_outbox(&mut self) -> Vec<Message> {
        self.outbox.drain(..).collect()
    }

    pub fn has_mail(&self) -> bool {
        !self.outbox.is_empty()
    }

    pub fn skew(&self) -> &ConditionedSkewFilter {
        &self.skew
    }

    pub fn skew_mut(&mut self) -> &mut ConditionedSkewFilter {
        &mut self.skew
    }
}
