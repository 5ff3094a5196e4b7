//! The broker: sessions, dispatch, and fan-out.
//!
//! Ties the directory, the matcher, and the per-client skew filters
//! together behind one synchronous dispatch surface. The broker is
//! runtime-agnostic: it never touches the network and takes the current
//! time as an argument, so a server layer drives it from connection
//! tasks and tests drive it with a scripted clock.
//!
//! All cross-client state changes happen inside `handle_message`, which
//! callers serialize behind a single lock. Holding it costs only the
//! O(subscriber-count) fan-out of one publish; no network I/O happens
//! under it.

use std::collections::HashMap;

use log::{debug, info, warn};

use crate::directory::VariableDirectory;
use crate::error::{BrokerError, Result};
use crate::message::{Message, MessageKind, Payload};
use crate::session::{ClientSession, SessionState};

/// Query key returning a one-line-per-variable directory dump.
pub const QUERY_VAR_SUMMARY: &str = "VAR_SUMMARY";

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Name this broker announces in its welcome banner.
    pub community: String,
    /// Seconds of inbound silence after which a session is considered
    /// dead. Zero disables the idle check.
    pub idle_timeout_secs: f64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            community: "helmbus".to_owned(),
            idle_timeout_secs: 0.0,
        }
    }
}

#[derive(Debug, Default)]
pub struct Broker {
    config: BrokerConfig,
    directory: VariableDirectory,
    sessions: HashMap<u64, ClientSession>,
    /// Registered identity → session id. An identity frees up only when
    /// its session closes, so reconnects cannot race the cleanup.
    identities: HashMap<String, u64>,
    next_session_id: u64,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        Broker {
            config,
            ..Default::default()
        }
    }

    pub fn community(&self) -> &str {
        &self.config.community
    }

    /// Admit a new connection. The session starts in `Connecting` with
    /// no identity and no subscriptions.
    pub fn open_session(&mut self, now: f64) -> u64 {
        self.next_session_id += 1;
        let id = self.next_session_id;
        self.sessions.insert(id, ClientSession::new(id, now));
        debug!("session {} opened", id);
        id
    }

    /// Tear a session down: drop its directory state and free its
    /// identity. Safe to call twice; the second call is a no-op.
    pub fn close_session(&mut self, session_id: u64) {
        if let Some(mut session) = self.sessions.remove(&session_id) {
            if let Some(identity) = session.identity().map(str::to_owned) {
                self.directory.on_client_disconnect(&identity);
                self.identities.remove(&identity);
                info!("session {} (\"{}\") closed", session_id, identity);
            } else {
                debug!("session {} closed before registering", session_id);
            }
            session.disconnect();
        }
    }

    /// Dispatch one inbound message from a session.
    ///
    /// Control messages mutate session or directory state; data publishes
    /// run the directory fan-out and append skew-corrected copies to each
    /// eligible client's outbox. Errors reflect a misbehaving client and
    /// never leave the directory inconsistent.
    pub fn handle_message(&mut self, session_id: u64, msg: &Message, now: f64) -> Result<()> {
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(BrokerError::SessionNotFound { session_id })?;
        session.touch(now);

        match msg.kind {
            MessageKind::Register => self.handle_register(session_id, msg, now),
            MessageKind::Timing => self.handle_timing(session_id, msg, now),
            MessageKind::Notify => self.handle_publish(session_id, msg, now),
            MessageKind::Subscribe => self.handle_subscribe(session_id, msg, now),
            MessageKind::Unsubscribe => self.handle_unsubscribe(session_id, msg),
            MessageKind::Query => self.handle_query(session_id, msg, now),
            MessageKind::Welcome => {
                warn!("session {} sent a welcome, ignoring", session_id);
                Ok(())
            }
        }
    }

    fn handle_register(&mut self, session_id: u64, msg: &Message, now: f64) -> Result<()> {
        let identity = msg.key.clone();
        if identity.is_empty() {
            return Err(BrokerError::EmptyIdentity);
        }
        if let Some(&holder) = self.identities.get(&identity) {
            if holder != session_id {
                return Err(BrokerError::IdentityInUse { identity });
            }
        }

        // Re-registering under a new name releases the old one and its
        // directory state, so the old identity stays reusable.
        if let Some(previous) = self
            .sessions
            .get(&session_id)
            .and_then(|s| s.identity().map(str::to_owned))
        {
            if previous != identity {
                self.directory.on_client_disconnect(&previous);
                self.identities.remove(&previous);
                info!(
                    "session {} released identity \"{}\"",
                    session_id, previous
                );
            }
        }

        self.identities.insert(identity.clone(), session_id);
        let welcome = Message::welcome(
            &self.config.community,
            &format!("community={}", self.config.community),
            now,
        );
        let session = self.session_mut(session_id)?;
        session.register(identity.clone(), now);
        session.queue_mail(welcome);
        info!("session {} registered as \"{}\"", session_id, identity);
        Ok(())
    }

    /// Skew handshake, allowed in any state.
    ///
    /// First leg: the client sends `(rq, 0, 0)` with its own clock in
    /// `rq`; we echo the triple back with our clock in `tx`. Second leg:
    /// the client returns the completed `(rq, tx, rx)` and we feed it to
    /// that session's skew filter.
    fn handle_timing(&mut self, session_id: u64, msg: &Message, now: f64) -> Result<()> {
        let (rq, tx, rx) = match msg.timing_triple() {
            Some(t) => t,
            None => {
                warn!("session {} sent a malformed timing payload", session_id);
                return Ok(());
            }
        };
        let community = self.config.community.clone();
        let session = self.session_mut(session_id)?;

        if rx == 0.0 {
            session.queue_mail(Message::timing(&community, rq, now, 0.0, now));
            return Ok(());
        }

        let est = session.skew_mut().update(rq, tx, rx);
        debug!(
            "session {} skew {:.6}s ({})",
            session_id,
            est.skew,
            if est.stable { "stable" } else { "settling" }
        );
        Ok(())
    }

    fn handle_publish(&mut self, session_id: u64, msg: &Message, now: f64) -> Result<()> {
        let (identity, corrected_ts) = {
            let session = self.session_ref(session_id)?;
            let identity = session
                .identity()
                .map(str::to_owned)
                .ok_or(BrokerError::NotRegistered { session_id })?;
            // Inbound stamps are on the client's clock; move them onto
            // ours once the estimate is trustworthy.
            let ts = if session.skew().is_stable() {
                msg.timestamp + session.skew().current_skew()
            } else {
                msg.timestamp
            };
            (identity, ts)
        };

        // The broker, not the client, decides the source attribution.
        let stored = Message {
            kind: MessageKind::Notify,
            key: msg.key.clone(),
            source: identity,
            timestamp: corrected_ts,
            payload: msg.payload.clone(),
        };

        let eligible = self.directory.publish(&stored, now)?;
        self.session_mut(session_id)?.mark_active();

        for recipient in eligible {
            self.deliver(&recipient, &stored);
        }
        Ok(())
    }

    fn handle_subscribe(&mut self, session_id: u64, msg: &Message, now: f64) -> Result<()> {
        let identity = self.registered_identity(session_id)?;
        let (app_pattern, period) = msg.subscribe_params();
        let initial = self
            .directory
            .subscribe(&identity, &msg.key, &app_pattern, period, now);

        // Current values of already-written matching variables go out
        // immediately, bypassing the throttle.
        for mail in initial {
            self.deliver(&identity, &mail);
        }
        Ok(())
    }

    fn handle_unsubscribe(&mut self, session_id: u64, msg: &Message) -> Result<()> {
        let identity = self.registered_identity(session_id)?;
        self.directory.unsubscribe(&identity, &msg.key);
        Ok(())
    }

    fn handle_query(&mut self, session_id: u64, msg: &Message, now: f64) -> Result<()> {
        self.registered_identity(session_id)?;
        match msg.key.as_str() {
            QUERY_VAR_SUMMARY => {
                let summary = self.directory.summary();
                let reply = Message {
                    kind: MessageKind::Query,
                    key: QUERY_VAR_SUMMARY.to_owned(),
                    source: self.config.community.clone(),
                    timestamp: now,
                    payload: Payload::Text(summary),
                };
                self.session_mut(session_id)?.queue_mail(reply);
                Ok(())
            }
            other => Err(BrokerError::UnknownQuery {
                what: other.to_owned(),
            }),
        }
    }

    /// Queue one message for `identity`, correcting the timestamp back
    /// onto the recipient's clock. A recipient without a live session is
    /// mid-disconnect; skip it silently.
    fn deliver(&mut self, identity: &str, msg: &Message) {
        let Some(&id) = self.identities.get(identity) else {
            debug!("dropping mail for departed client \"{}\"", identity);
            return;
        };
        let Some(session) = self.sessions.get_mut(&id) else {
            debug!("dropping mail for stale session of \"{}\"", identity);
            return;
        };
        let ts = if session.skew().is_stable() {
            msg.timestamp - session.skew().current_skew()
        } else {
            msg.timestamp
        };
        session.queue_mail(msg.with_timestamp(ts));
        session.mark_active();
    }

    /// Take everything pending for one session, in delivery order.
    pub fn drain_outbox(&mut self, session_id: u64) -> Result<Vec<Message>> {
        Ok(self.session_mut(session_id)?.drain_outbox())
    }

    pub fn sessions_with_mail(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.has_mail())
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Sessions silent past the idle horizon; the caller closes them
    /// through the normal disconnect path.
    pub fn expired_sessions(&self, now: f64) -> Vec<u64> {
        if self.config.idle_timeout_secs <= 0.0 {
            return Vec::new();
        }
        let mut ids: Vec<u64> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.idle_secs(now) > self.config.idle_timeout_secs)
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn session_state(&self, session_id: u64) -> Option<SessionState> {
        self.sessions.get(&session_id).map(|s| s.state())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn directory(&self) -> &VariableDirectory {
        &self.directory
    }

    fn session_ref(&self, session_id: u64) -> Result<&ClientSession> {
        self.sessions
            .get(&session_id)
            .ok_or(BrokerError::SessionNotFound { session_id })
    }

    fn session_mut(&mut self, session_id: u64) -> Result<&mut ClientSession> {
        self.sessions
            .get_mut(&session_id)
            .ok_or(BrokerError::SessionNotFound { session_id })
    }

    fn registered_identity(&self, session_id: u64) -> Result<String> {
        self.session_ref(session_id)?
            .identity()
            .map(str::to_owned)
            .ok_or(BrokerError::NotRegistered { session_id })
    }
}
