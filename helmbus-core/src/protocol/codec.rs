//! Record and packet codec
//!
//! Encoding is infallible; decoding is defensive. [`decode_frame`] is the
//! streaming entry point: callers feed it whatever bytes they have and it
//! either yields a complete packet (with the byte count to consume) or the
//! minimum number of additional bytes required to make progress.

use crate::message::{Message, MessageKind, Payload};
use crate::protocol::error::ProtocolError;
use crate::protocol::{tag, MAX_PACKET_LEN};

/// Outcome of a streaming decode attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameStatus {
    /// A full packet was decoded; the caller must discard `consumed` bytes
    /// from the front of its buffer.
    Complete {
        messages: Vec<Message>,
        consumed: usize,
    },
    /// At least this many more bytes are required before another attempt
    /// can succeed.
    NeedMore(usize),
}

/// Encode one message as a wire record, appending to `out`.
pub fn encode_record(msg: &Message, out: &mut Vec<u8>) {
    out.push(record_tag(msg));
    put_bytes(out, msg.key.as_bytes());
    put_bytes(out, msg.source.as_bytes());
    out.extend_from_slice(&msg.timestamp.to_le_bytes());
    match &msg.payload {
        Payload::Double(v) => put_bytes(out, &v.to_le_bytes()),
        Payload::Text(s) => put_bytes(out, s.as_bytes()),
        Payload::Binary(b) => put_bytes(out, b),
    }
}

/// Frame a batch of messages into one length-prefixed packet.
pub fn encode_frame(messages: &[Message]) -> Vec<u8> {
    let mut out = Vec::with_capacity(64 * messages.len() + 4);
    out.extend_from_slice(&[0u8; 4]);
    for msg in messages {
        encode_record(msg, &mut out);
    }
    let total = out.len() as u32;
    out[0..4].copy_from_slice(&total.to_le_bytes());
    out
}

/// Attempt to decode one packet from the front of `buf`.
///
/// Never consumes implicitly: on `Complete` the caller advances its buffer
/// by `consumed`. Errors are fatal to the byte stream that produced them.
pub fn decode_frame(buf: &[u8]) -> Result<FrameStatus, ProtocolError> {
    if buf.len() < 4 {
        return Ok(FrameStatus::NeedMore(4 - buf.len()));
    }
    let total = u32::from_le_bytes(buf[0..4].try_into().expect("4-byte slice")) as usize;
    if total < 4 {
        return Err(ProtocolError::Framing {
            detail: "declared packet length smaller than its own prefix",
        });
    }
    if total > MAX_PACKET_LEN {
        return Err(ProtocolError::PacketTooLarge {
            declared: total,
            max: MAX_PACKET_LEN,
        });
    }
    if buf.len() < total {
        return Ok(FrameStatus::NeedMore(total - buf.len()));
    }

    let mut cursor = Cursor::new(&buf[4..total]);
    let mut messages = Vec::new();
    while !cursor.is_empty() {
        // The packet header promised `total` bytes; a record that runs
        // past that is a length disagreement, not stream truncation.
        let msg = decode_record(&mut cursor).map_err(|e| match e {
            ProtocolError::TruncatedInput { .. } => ProtocolError::Framing {
                detail: "record overruns its packet",
            },
            other => other,
        })?;
        messages.push(msg);
    }

    Ok(FrameStatus::Complete {
        messages,
        consumed: total,
    })
}

/// Decode one record at the cursor. Exposed for tests and tooling;
/// networked callers go through [`decode_frame`].
pub fn decode_record(cursor: &mut Cursor<'_>) -> Result<Message, ProtocolError> {
    let tag_byte = cursor.take_u8()?;
    let key = take_string(cursor)?;
    let source = take_string(cursor)?;
    let timestamp = f64::from_le_bytes(cursor.take_array::<8>()?);
    let payload_len = cursor.take_u32()? as usize;
    let payload_bytes = cursor.take_bytes(payload_len)?;

    let (kind, payload) = match tag_byte {
        tag::NOTIFY_DOUBLE => {
            if payload_bytes.len() != 8 {
                return Err(ProtocolError::Framing {
                    detail: "double payload must be exactly 8 bytes",
                });
            }
            let bits: [u8; 8] = payload_bytes.try_into().expect("8-byte slice");
            (MessageKind::Notify, Payload::Double(f64::from_le_bytes(bits)))
        }
        tag::NOTIFY_STRING => (MessageKind::Notify, Payload::Text(utf8(payload_bytes)?)),
        tag::NOTIFY_BINARY => (MessageKind::Notify, Payload::Binary(payload_bytes.to_vec())),
        tag::REGISTER => (MessageKind::Register, Payload::Binary(payload_bytes.to_vec())),
        tag::SUBSCRIBE => (MessageKind::Subscribe, Payload::Text(utf8(payload_bytes)?)),
        tag::UNSUBSCRIBE => (
            MessageKind::Unsubscribe,
            Payload::Binary(payload_bytes.to_vec()),
        ),
        tag::TIMING => {
            if payload_bytes.len() != 24 {
                return Err(ProtocolError::InvalidControlPayload { tag: tag_byte });
            }
            (MessageKind::Timing, Payload::Binary(payload_bytes.to_vec()))
        }
        tag::WELCOME => (MessageKind::Welcome, Payload::Text(utf8(payload_bytes)?)),
        tag::QUERY => (MessageKind::Query, Payload::Text(utf8(payload_bytes)?)),
        other => return Err(ProtocolError::UnknownTag { tag: other }),
    };

    Ok(Message {
        kind,
        key,
        source,
        timestamp,
        payload,
    })
}

fn record_tag(msg: &Message) -> u8 {
    match msg.kind {
        MessageKind::Notify => match msg.payload {
            Payload::Double(_) => tag::NOTIFY_DOUBLE,
            Payload::Text(_) => tag::NOTIFY_STRING,
            Payload::Binary(_) => tag::NOTIFY_BINARY,
        },
        MessageKind::Register => tag::REGISTER,
        MessageKind::Subscribe => tag::SUBSCRIBE,
        MessageKind::Unsubscribe => tag::UNSUBSCRIBE,
        MessageKind::Timing => tag::TIMING,
        MessageKind::Welcome => tag::WELCOME,
        MessageKind::Query => tag::QUERY,
    }
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn take_string(cursor: &mut Cursor<'_>) -> Result<String, ProtocolError> {
    let len = cursor.take_u32()? as usize;
    utf8(cursor.take_bytes(len)?)
}

fn utf8(bytes: &[u8]) -> Result<String, ProtocolError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
}

/// Bounds-checked reader over a byte slice.
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take_u8(&mut self) -> Result<u8, ProtocolError> {
        let b = *self.buf.get(self.pos).ok_or(ProtocolError::TruncatedInput {
            available: 0,
            needed: 1,
        })?;
        self.pos += 1;
        Ok(b)
    }

    fn take_u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(u32::from_le_bytes(self.take_array::<4>()?))
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let bytes = self.take_bytes(N)?;
        Ok(bytes.try_into().expect("length checked"))
    }

    fn take_bytes(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < n {
            return Err(ProtocolError::TruncatedInput {
                available: self.remaining(),
                needed: n,
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, Payload};

    fn roundtrip(messages: Vec<Message>) -> Vec<Message> {
        let frame = encode_frame(&messages);
        match decode_frame(&frame).expect("decode failed") {
            FrameStatus::Complete {
                messages: decoded,
                consumed,
            } => {
                assert_eq!(consumed, frame.len());
                decoded
            }
            FrameStatus::NeedMore(n) => panic!("unexpected NeedMore({})", n),
        }
    }

    // ===== ROUND-TRIP TESTS =====

    #[test]
    fn test_roundtrip_double() {
        let msgs = vec![Message::notify_double("NAV_X", "pNav", 1234.5, -42.25)];
        assert_eq!(roundtrip(msgs.clone()), msgs);
    }

    #[test]
    fn test_roundtrip_text_and_binary() {
        let msgs = vec![
            Message::notify_text("STATUS", "pHelm", 10.0, "mode=survey"),
            Message::notify_binary("SONAR_RAW", "iSonar", 10.01, vec![0, 1, 2, 0xFF, 0]),
        ];
        assert_eq!(roundtrip(msgs.clone()), msgs);
    }

    #[test]
    fn test_roundtrip_empty_fields() {
        let msgs = vec![
            Message::notify_text("K", "", 0.0, ""),
            Message::notify_binary("", "src", 0.0, vec![]),
        ];
        assert_eq!(roundtrip(msgs.clone()), msgs);
    }

    #[test]
    fn test_roundtrip_control_records() {
        let msgs = vec![
            Message::register("pHelm", 1.0),
            Message::subscribe("pHelm", "NAV_*", "pNav*", 0.5, 1.0),
            Message::unsubscribe("pHelm", "NAV_*", 2.0),
            Message::timing("pHelm", 1.0, 2.0, 3.0, 3.0),
            Message::welcome("helmbus", "welcome aboard", 4.0),
            Message::query("pHelm", "VAR_SUMMARY", 5.0),
        ];
        assert_eq!(roundtrip(msgs.clone()), msgs);
    }

    #[test]
    fn test_roundtrip_nan_and_inf_bit_exact() {
        // A quiet NaN with a nonzero payload must survive untouched.
        let odd_nan = f64::from_bits(0x7FF8_0000_DEAD_BEEF);
        let msgs = vec![
            Message::notify_double("A", "s", odd_nan, f64::INFINITY),
            Message::notify_double("B", "s", f64::NEG_INFINITY, odd_nan),
        ];
        let decoded = roundtrip(msgs.clone());
        assert_eq!(decoded[0].timestamp.to_bits(), odd_nan.to_bits());
        assert_eq!(
            decoded[1].payload.as_double().unwrap().to_bits(),
            odd_nan.to_bits()
        );
        assert_eq!(decoded[0].payload.as_double(), Some(f64::INFINITY));
    }

    #[test]
    fn test_roundtrip_empty_packet() {
        assert_eq!(roundtrip(vec![]), vec![]);
    }

    // ===== STREAMING TESTS =====

    #[test]
    fn test_need_more_for_every_prefix() {
        let frame = encode_frame(&[Message::notify_double("NAV_X", "pNav", 1.0, 2.0)]);
        for cut in 0..frame.len() {
            match decode_frame(&frame[..cut]).expect("prefix must not error") {
                FrameStatus::NeedMore(n) => {
                    assert!(n > 0);
                    assert!(cut + n <= frame.len(), "over-asked at cut {}", cut);
                }
                FrameStatus::Complete { .. } => panic!("complete on prefix of {} bytes", cut),
            }
        }
    }

    #[test]
    fn test_decode_leaves_following_packet_untouched() {
        let mut stream = encode_frame(&[Message::notify_double("A", "s", 1.0, 2.0)]);
        let second = encode_frame(&[Message::notify_text("B", "s", 2.0, "x")]);
        stream.extend_from_slice(&second);

        match decode_frame(&stream).unwrap() {
            FrameStatus::Complete { messages, consumed } => {
                assert_eq!(messages.len(), 1);
                assert_eq!(messages[0].key, "A");
                assert_eq!(&stream[consumed..], &second[..]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    // ===== ERROR TESTS =====

    #[test]
    fn test_framing_error_on_length_disagreement() {
        let mut frame = encode_frame(&[Message::notify_double("A", "s", 1.0, 2.0)]);
        // Lie about the packet size: chop a record in half by shrinking
        // the prefix while keeping the record bytes.
        let lie = (frame.len() as u32 - 3).to_le_bytes();
        frame[0..4].copy_from_slice(&lie);
        match decode_frame(&frame[..frame.len() - 3]) {
            Err(ProtocolError::Framing { .. }) => {}
            other => panic!("expected framing error, got {:?}", other),
        }
    }

    #[test]
    fn test_packet_too_large_rejected() {
        let mut frame = vec![0u8; 8];
        frame[0..4].copy_from_slice(&(u32::MAX).to_le_bytes());
        match decode_frame(&frame) {
            Err(ProtocolError::PacketTooLarge { .. }) => {}
            other => panic!("expected PacketTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_undersized_length_prefix_rejected() {
        let frame = [2u8, 0, 0, 0];
        assert!(matches!(
            decode_frame(&frame),
            Err(ProtocolError::Framing { .. })
        ));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let mut frame = encode_frame(&[Message::notify_double("A", "s", 1.0, 2.0)]);
        frame[4] = 0x7F;
        assert!(matches!(
            decode_frame(&frame),
            Err(ProtocolError::UnknownTag { tag: 0x7F })
        ));
    }

    #[test]
    fn test_invalid_utf8_in_key_rejected() {
        let mut frame = encode_frame(&[Message::notify_double("AA", "s", 1.0, 2.0)]);
        // First key byte sits right after tag + keyLen.
        frame[9] = 0xFF;
        assert!(matches!(
            decode_frame(&frame),
            Err(ProtocolError::InvalidUtf8)
        ));
    }

    #[test]
    fn test_timing_payload_must_be_triple() {
        let mut msg = Message::timing("s", 1.0, 2.0, 3.0, 0.0);
        msg.payload = Payload::Binary(vec![0u8; 23]);
        let frame = encode_frame(&[msg]);
        assert!(matches!(
            decode_frame(&frame),
            Err(ProtocolError::InvalidControlPayload { .. })
        ));
    }

    #[test]
    fn test_double_payload_length_enforced() {
        let mut frame = encode_frame(&[Message::notify_double("A", "s", 1.0, 2.0)]);
        // Truncate the double payload by one byte and fix up both lengths.
        let total = frame.len();
        frame.truncate(total - 1);
        let payload_len_at = frame.len() - 7 - 4;
        frame[payload_len_at..payload_len_at + 4].copy_from_slice(&7u32.to_le_bytes());
        let new_total = frame.len() as u32;
        frame[0..4].copy_from_slice(&new_total.to_le_bytes());
        assert!(matches!(
            decode_frame(&frame),
            Err(ProtocolError::Framing { .. })
        ));
    }
}
