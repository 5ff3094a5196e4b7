//! The variable directory
//!
//! The authoritative map of variable name → current value, write
//! statistics, and subscriber list. All cross-client mutation funnels
//! through this one structure; the broker holds it behind a single
//! serialization point.
//!
//! # Design
//!
//! The directory is organized by variables, not by clients: each variable
//! carries its own subscriber map, which makes the hot publish path a
//! single lookup plus an O(subscriber-count) fan-out. Registered wildcard
//! filters live in a separate per-client ordered set and are re-evaluated
//! in exactly two places — at subscribe time against existing variables,
//! and at variable-creation time against existing filters — so late-created
//! variables still reach pre-existing wildcard subscribers.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::{debug, info, warn};

use crate::error::BrokerError;
use crate::matcher::{is_wildcard, wildcard_match, MsgFilter};
use crate::message::{Message, MessageKind, Payload, PayloadKind};

/// Inter-write gaps above this zero the frequency estimate instead of
/// feeding the filter.
const FREQ_MAX_GAP_SECS: f64 = 10.0;
/// IIR coefficient for the rolling write-frequency estimate.
const FREQ_ALPHA: f64 = 0.95;

/// One client's registration against one variable.
#[derive(Debug, Clone)]
pub struct Subscription {
    client: String,
    period: f64,
    last_time_sent: f64,
}

impl Subscription {
    fn new(client: &str, period: f64) -> Self {
        Subscription {
            client: client.to_owned(),
            period,
            // First delivery is always eligible.
            last_time_sent: f64::NEG_INFINITY,
        }
    }

    /// Has enough time passed since the last delivery to this client?
    /// A period of zero means "every publish".
    fn expired(&self, now: f64) -> bool {
        if self.period == 0.0 {
            return true;
        }
        now - self.last_time_sent >= self.period
    }

    fn mark_sent(&mut self, now: f64) {
        self.last_time_sent = now;
    }

    pub fn client(&self) -> &str {
        &self.client
    }

    pub fn period(&self) -> f64 {
        self.period
    }
}

/// One variable: its latest value, its write statistics, and everyone
/// who wants to hear about it.
///
/// A variable exists from the moment any client publishes or subscribes
/// to its name, and is never deleted — only reset by tooling.
#[derive(Debug, Clone, Default)]
pub struct Variable {
    name: String,
    value: Option<Payload>,
    /// Latched on first write; later writes must agree.
    kind: Option<PayloadKind>,
    /// Timestamp carried by the last write.
    timestamp: f64,
    /// Identity of the last writer.
    source: String,
    write_count: u64,
    /// Broker-clock time of the last write.
    last_written: Option<f64>,
    /// Rolling estimate of write frequency, Hz.
    write_freq: f64,
    /// Writes that landed inside one clock tick, folded into the next
    /// measurable interval.
    over_ticks: u32,
    writers: BTreeSet<String>,
    subscribers: BTreeMap<String, Subscription>,
}

impl Variable {
    fn new(name: &str) -> Self {
        Variable {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    /// Attach (or re-attach) a subscriber. Re-subscribing updates the
    /// period in place; there is no duplicate-subscription error.
    fn add_subscriber(&mut self, client: &str, period: f64) {
        debug!("adding subscription of \"{}\" to \"{}\"", client, self.name);
        match self.subscribers.get_mut(client) {
            Some(sub) => sub.period = period,
            None => {
                self.subscribers
                    .insert(client.to_owned(), Subscription::new(client, period));
            }
        }
    }

    fn remove_subscriber(&mut self, client: &str) {
        if self.subscribers.remove(client).is_some() {
            debug!("removing \"{}\"'s subscription to \"{}\"", client, self.name);
        }
    }

    /// Clear value, stats, and subscribers. The variable itself survives.
    fn reset(&mut self) {
        self.value = None;
        self.kind = None;
        self.timestamp = 0.0;
        self.source.clear();
        self.write_count = 0;
        self.last_written = None;
        self.write_freq = 0.0;
        self.over_ticks = 0;
        self.writers.clear();
        self.subscribers.clear();
    }

    fn update_write_freq(&mut self, now: f64) {
        if let Some(last) = self.last_written {
            let dt = now - last;
            if dt > 0.0 {
                if dt > FREQ_MAX_GAP_SECS {
                    self.write_freq = 0.0;
                } else {
                    // Writes that shared a clock tick widen the effective
                    // interval denominator.
                    self.over_ticks += 1;
                    let interval = dt / self.over_ticks as f64;
                    self.write_freq = FREQ_ALPHA * self.write_freq + (1.0 - FREQ_ALPHA) / interval;
                    self.over_ticks = 0;
                }
            } else {
                self.over_ticks += 1;
            }
        }
        self.last_written = Some(now);
    }

    /// The current value as a deliverable message, if ever written.
    pub fn current_message(&self) -> Option<Message> {
        let payload = self.value.clone()?;
        Some(Message {
            kind: MessageKind::Notify,
            key: self.name.clone(),
            source: self.source.clone(),
            timestamp: self.timestamp,
            payload,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn write_count(&self) -> u64 {
        self.write_count
    }

    pub fn write_freq(&self) -> f64 {
        self.write_freq
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn has_subscriber(&self, client: &str) -> bool {
        self.subscribers.contains_key(client)
    }

    pub fn kind(&self) -> Option<PayloadKind> {
        self.kind
    }
}

/// The directory itself: variables plus per-client wildcard filters.
#[derive(Debug, Default)]
pub struct VariableDirectory {
    vars: HashMap<String, Variable>,
    filters: HashMap<String, BTreeSet<MsgFilter>>,
}

impl VariableDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a publish: update value and stats, and return the clients
    /// eligible for delivery *this call* after throttling.
    ///
    /// Creates the variable on first sight, replaying every registered
    /// wildcard filter against the new name so pre-existing subscribers
    /// are attached before the fan-out below runs.
    pub fn publish(&mut self, msg: &Message, now: f64) -> Result<Vec<String>, BrokerError> {
        let filters = &self.filters;
        let var = self.vars.entry(msg.key.clone()).or_insert_with(|| {
            let mut var = Variable::new(&msg.key);
            for (client, set) in filters {
                for filter in set {
                    if filter.matches(&msg.source, &msg.key) {
                        info!(
                            "attaching \"{}\" to new variable \"{}\" via wildcard \"{}\"",
                            client,
                            msg.key,
                            filter.as_string()
                        );
                        var.add_subscriber(client, filter.period());
                    }
                }
            }
            var
        });

        // Type latch: the first write fixes the variable's kind.
        let incoming = msg.payload.kind();
        match var.kind {
            None => var.kind = Some(incoming),
            Some(kind) if kind != incoming => {
                return Err(BrokerError::TypeMismatch {
                    key: msg.key.clone(),
                    expected: kind,
                    actual: incoming,
                });
            }
            Some(_) => {}
        }

        var.value = Some(msg.payload.clone());
        var.timestamp = msg.timestamp;
        var.source = msg.source.clone();
        var.writers.insert(msg.source.clone());
        var.write_count += 1;
        var.update_write_freq(now);

        let mut eligible = Vec::new();
        for sub in var.subscribers.values_mut() {
            if sub.expired(now) {
                eligible.push(sub.client.clone());
                sub.mark_sent(now);
            }
        }
        Ok(eligible)
    }

    /// Register a subscription.
    ///
    /// Exact variable names attach directly (auto-creating an unwritten
    /// variable if needed). Patterns with wildcards are remembered for
    /// future variable creations and applied to every existing variable
    /// now. Returns the current values of already-written matching
    /// variables, to be mailed to the subscriber immediately.
    pub fn subscribe(
        &mut self,
        client: &str,
        var_pattern: &str,
        app_pattern: &str,
        period: f64,
        _now: f64,
    ) -> Vec<Message> {
        let mut initial = Vec::new();

        if !is_wildcard(var_pattern) && app_pattern.is_empty() {
            let var = self
                .vars
                .entry(var_pattern.to_owned())
                .or_insert_with(|| Variable::new(var_pattern));
            var.add_subscriber(client, period);
            if var.write_count > 0 {
                initial.extend(var.current_message());
            }
            return initial;
        }

        let filter = MsgFilter::new(app_pattern, var_pattern, period);
        info!(
            "+ subs of \"{}\" to variables matching \"{}\"",
            client,
            filter.as_string()
        );
        self.filters
            .entry(client.to_owned())
            .or_default()
            .replace(filter.clone());

        for var in self.vars.values_mut() {
            if filter.matches(&var.source, &var.name) {
                var.add_subscriber(client, period);
                if var.write_count > 0 {
                    initial.extend(var.current_message());
                }
            }
        }
        initial
    }

    /// Drop the subscriptions `var_pattern` created for `client`, and the
    /// stored filter itself if the pattern was a wildcard.
    pub fn unsubscribe(&mut self, client: &str, var_pattern: &str) {
        if let Some(filters) = self.filters.get_mut(client) {
            filters.retain(|f| f.var_pattern() != var_pattern);
        }
        if is_wildcard(var_pattern) {
            for var in self.vars.values_mut() {
                if wildcard_match(var_pattern, &var.name) {
                    var.remove_subscriber(client);
                }
            }
        } else if let Some(var) = self.vars.get_mut(var_pattern) {
            var.remove_subscriber(client);
        }
    }

    /// Remove every trace of a departing client's interest: all of its
    /// subscriptions across all variables, and all of its filters.
    /// Variables themselves are never deleted by a disconnect.
    pub fn on_client_disconnect(&mut self, client: &str) {
        for var in self.vars.values_mut() {
            var.remove_subscriber(client);
        }
        if self.filters.remove(client).is_some() {
            debug!("dropped wildcard filters of \"{}\"", client);
        }
    }

    /// Tooling path: clear a variable's value, stats, and subscribers.
    pub fn reset(&mut self, key: &str) {
        if let Some(var) = self.vars.get_mut(key) {
            warn!("resetting variable \"{}\"", key);
            var.reset();
        }
    }

    /// One line per variable: name, type, write count, frequency,
    /// subscriber count.
    pub fn summary(&self) -> String {
        let mut names: Vec<&String> = self.vars.keys().collect();
        names.sort();
        let mut out = String::new();
        for name in names {
            let var = &self.vars[name];
            let kind = var
                .kind
                .map(|k| k.to_string())
                .unwrap_or_else(|| "unset".to_owned());
            out.push_str(&format!(
                "{} type={} writes={} freq={:.2} subs={}\n",
                var.name,
                kind,
                var.write_count,
                var.write_freq,
                var.subscriber_count()
            ));
        }
        out
    }

    pub fn get(&self, key: &str) -> Option<&Variable> {
        self.vars.get(key)
    }

    pub fn var_count(&self) -> usize {
        self.vars.len()
    }
}
