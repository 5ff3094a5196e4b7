//! The message data model
//!
//! A [`Message`] is the unit of exchange between clients and the broker:
//! a named, timestamped value plus a kind discriminating the data plane
//! (`Notify`) from the control plane (register, subscribe, timing, ...).
//! Messages are immutable once constructed and are cloned per subscriber
//! outbox during fan-out.

use std::fmt;

/// Payload variants a variable can hold.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A double-precision numeric value.
    Double(f64),
    /// A UTF-8 string value.
    Text(String),
    /// Arbitrary bytes.
    Binary(Vec<u8>),
}

/// The payload variant without the value, used for the per-variable type
/// latch: the first write to a variable fixes its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Double,
    Text,
    Binary,
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Double(_) => PayloadKind::Double,
            Payload::Text(_) => PayloadKind::Text,
            Payload::Binary(_) => PayloadKind::Binary,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Payload::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadKind::Double => write!(f, "double"),
            PayloadKind::Text => write!(f, "string"),
            PayloadKind::Binary => write!(f, "binary"),
        }
    }
}

/// Message kind: one data-plane kind plus the control-plane operations
/// carried over the same framed channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// A published value (data plane).
    Notify,
    /// Client announces its identity.
    Register,
    /// Client subscribes to a variable-name pattern.
    Subscribe,
    /// Client drops a subscription.
    Unsubscribe,
    /// Clock-skew handshake leg.
    Timing,
    /// Broker's greeting after a successful `Register`.
    Welcome,
    /// Introspection request/reply (e.g. `VAR_SUMMARY`).
    Query,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Notify => "NOTIFY",
            MessageKind::Register => "REGISTER",
            MessageKind::Subscribe => "SUBSCRIBE",
            MessageKind::Unsubscribe => "UNSUBSCRIBE",
            MessageKind::Timing => "TIMING",
            MessageKind::Welcome => "WELCOME",
            MessageKind::Query => "QUERY",
        };
        write!(f, "{}", name)
    }
}

/// A named, timestamped value with a publishing source.
///
/// `timestamp` is seconds since the Unix epoch on the sender's clock;
/// the broker skew-corrects it in transit once the sender's skew filter
/// has stabilized.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub kind: MessageKind,
    /// Variable name (data plane) or operation argument (control plane).
    pub key: String,
    /// Identity of the publishing client.
    pub source: String,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub payload: Payload,
}

impl Message {
    /// A data-plane publish carrying a numeric value.
    pub fn notify_double(key: &str, source: &str, timestamp: f64, value: f64) -> Self {
        Message {
            kind: MessageKind::Notify,
            key: key.to_owned(),
            source: source.to_owned(),
            timestamp,
            payload: Payload::Double(value),
        }
    }

    /// A data-plane publish carrying a string value.
    pub fn notify_text(key: &str, source: &str, timestamp: f64, value: &str) -> Self {
        Message {
            kind: MessageKind::Notify,
            key: key.to_owned(),
            source: source.to_owned(),
            timestamp,
            payload: Payload::Text(value.to_owned()),
        }
    }

    /// A data-plane publish carrying arbitrary bytes.
    pub fn notify_binary(key: &str, source: &str, timestamp: f64, value: Vec<u8>) -> Self {
        Message {
            kind: MessageKind::Notify,
            key: key.to_owned(),
            source: source.to_owned(),
            timestamp,
            payload: Payload::Binary(value),
        }
    }

    /// Identity announcement. `identity` doubles as key and source.
    pub fn register(identity: &str, timestamp: f64) -> Self {
        Message {
            kind: MessageKind::Register,
            key: identity.to_owned(),
            source: identity.to_owned(),
            timestamp,
            payload: Payload::Binary(Vec::new()),
        }
    }

    /// Subscription request. The app pattern and throttle period travel in
    /// the text payload as `"AppPattern=<p>,Interval=<secs>"`.
    pub fn subscribe(
        source: &str,
        var_pattern: &str,
        app_pattern: &str,
        period: f64,
        timestamp: f64,
    ) -> Self {
        Message {
            kind: MessageKind::Subscribe,
            key: var_pattern.to_owned(),
            source: source.to_owned(),
            timestamp,
            payload: Payload::Text(format!("AppPattern={},Interval={}", app_pattern, period)),
        }
    }

    /// Drop all of `source`'s subscriptions created by `var_pattern`.
    pub fn unsubscribe(source: &str, var_pattern: &str, timestamp: f64) -> Self {
        Message {
            kind: MessageKind::Unsubscribe,
            key: var_pattern.to_owned(),
            source: source.to_owned(),
            timestamp,
            payload: Payload::Binary(Vec::new()),
        }
    }

    /// One leg of the clock-skew handshake; the payload packs the
    /// `(rq, tx, rx)` round-trip triple as 24 little-endian bytes.
    pub fn timing(source: &str, rq: f64, tx: f64, rx: f64, timestamp: f64) -> Self {
        let mut buf = Vec::with_capacity(24);
        buf.extend_from_slice(&rq.to_le_bytes());
        buf.extend_from_slice(&tx.to_le_bytes());
        buf.extend_from_slice(&rx.to_le_bytes());
        Message {
            kind: MessageKind::Timing,
            key: String::new(),
            source: source.to_owned(),
            timestamp,
            payload: Payload::Binary(buf),
        }
    }

    pub fn welcome(broker_name: &str, banner: &str, timestamp: f64) -> Self {
        Message {
            kind: MessageKind::Welcome,
            key: broker_name.to_owned(),
            source: broker_name.to_owned(),
            timestamp,
            payload: Payload::Text(banner.to_owned()),
        }
    }

    pub fn query(source: &str, what: &str, timestamp: f64) -> Self {
        Message {
            kind: MessageKind::Query,
            key: what.to_owned(),
            source: source.to_owned(),
            timestamp,
            payload: Payload::Text(String::new()),
        }
    }

    /// Unpack a `Timing` payload into its `(rq, tx, rx)` triple.
    pub fn timing_triple(&self) -> Option<(f64, f64, f64)> {
        match &self.payload {
            Payload::Binary(b) if b.len() == 24 => {
                let rq = f64::from_le_bytes(b[0..8].try_into().ok()?);
                let tx = f64::from_le_bytes(b[8..16].try_into().ok()?);
                let rx = f64::from_le_bytes(b[16..24].try_into().ok()?);
                Some((rq, tx, rx))
            }
            _ => None,
        }
    }

    /// Parse a `Subscribe` payload into `(app_pattern, period)`.
    ///
    /// Missing fields fall back to "any app" and "every publish".
    pub fn subscribe_params(&self) -> (String, f64) {
        let text = self.payload.as_text().unwrap_or("");
        let app = scan_field(text, "AppPattern").unwrap_or("").to_owned();
        let period = scan_field(text, "Interval")
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.0);
        (app, period)
    }

    /// Rebuild this message with a corrected timestamp, leaving everything
    /// else untouched.
    pub fn with_timestamp(&self, timestamp: f64) -> Self {
        let mut msg = self.clone();
        msg.timestamp = timestamp;
        msg
    }
}

/// Pull `name=value` out of a comma-separated field list.
fn scan_field<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    for part in text.split(',') {
        if let Some((field, value)) = part.split_once('=') {
            if field.trim() == name {
                return Some(value.trim());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timing_triple_roundtrip() {
        let msg = Message::timing("nav", 1.5, 2.5, 3.5, 0.0);
        assert_eq!(msg.timing_triple(), Some((1.5, 2.5, 3.5)));
    }

    #[test]
    fn test_timing_triple_rejects_wrong_payload() {
        let msg = Message::notify_text("X", "nav", 0.0, "hello");
        assert_eq!(msg.timing_triple(), None);
    }

    #[test]
    fn test_subscribe_params() {
        let msg = Message::subscribe("helm", "NAV_*", "pNav*", 0.25, 0.0);
        let (app, period) = msg.subscribe_params();
        assert_eq!(app, "pNav*");
        assert_eq!(period, 0.25);
    }

    #[test]
    fn test_subscribe_params_defaults() {
        let mut msg = Message::subscribe("helm", "NAV_X", "", 0.0, 0.0);
        msg.payload = Payload::Text(String::new());
        let (app, period) = msg.subscribe_params();
        assert_eq!(app, "");
        assert_eq!(period, 0.0);
    }

    #[test]
    fn test_scan_field_trims_whitespace() {
        assert_eq!(scan_field("A=1, B = 2 ", "B"), Some("2"));
        assert_eq!(scan_field("A=1", "C"), None);
    }

    #[test]
    fn test_payload_kind() {
        assert_eq!(Payload::Double(1.0).kind(), PayloadKind::Double);
        assert_eq!(Payload::Text("x".into()).kind(), PayloadKind::Text);
        assert_eq!(Payload::Binary(vec![]).kind(), PayloadKind::Binary);
    }
}
