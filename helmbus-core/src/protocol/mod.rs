//! Wire protocol
//!
//! Messages travel in length-prefixed packets over an ordered byte stream:
//!
//! ```text
//! Packet  := u32 totalLength (LE, includes these 4 bytes), Record*
//! Record  := u8 tag, u32 keyLen, key, u32 srcLen, src,
//!            f64 timestamp (LE bits), u32 payloadLen, payload
//! ```
//!
//! Data-plane tags carry the payload variant (`0x01` double, `0x02` string,
//! `0x03` binary); control-plane tags fix the payload form per operation.
//! All integers little-endian; timestamps and numeric payloads are raw IEEE
//! 754 bit patterns, so NaN and infinities round-trip byte-exactly.

mod codec;
mod error;

pub use codec::{decode_frame, decode_record, encode_frame, encode_record, Cursor, FrameStatus};
pub use error::ProtocolError;

/// Largest packet the broker will accept. A hostile or corrupt length
/// prefix beyond this is a framing error, not an allocation.
pub const MAX_PACKET_LEN: usize = 64 * 1024 * 1024;

/// Record tags.
///
/// `0x01..=0x03` are data-plane publishes distinguished by payload type;
/// `0x10..` are control-plane operations.
pub mod tag {
    pub const NOTIFY_DOUBLE: u8 = 0x01;
    pub const NOTIFY_STRING: u8 = 0x02;
    pub const NOTIFY_BINARY: u8 = 0x03;

    pub const REGISTER: u8 = 0x10;
    pub const SUBSCRIBE: u8 = 0x11;
    pub const UNSUBSCRIBE: u8 = 0x12;
    pub const TIMING: u8 = 0x13;
    pub const WELCOME: u8 = 0x14;
    pub const QUERY: u8 = 0x15;
}
