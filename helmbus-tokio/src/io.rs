//! Framed reads and writes over a Tokio TCP stream.
//!
//! The core codec is synchronous and pull-based; this module feeds it
//! from a growable read buffer, pulling more bytes from the socket only
//! when the codec reports an incomplete packet.

use std::fmt;

use bytes::{Buf, Bytes, BytesMut};
use helmbus_core::protocol::{decode_frame, encode_frame, FrameStatus, ProtocolError};
use helmbus_core::Message;
use log::trace;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

/// Failure while reading a frame: transport trouble or bad bytes.
#[derive(Debug)]
pub enum ReadError {
    Io(std::io::Error),
    Protocol(ProtocolError),
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::Io(e) => write!(f, "io error: {}", e),
            ReadError::Protocol(e) => write!(f, "protocol error: {}", e),
        }
    }
}

impl std::error::Error for ReadError {}

impl From<std::io::Error> for ReadError {
    fn from(e: std::io::Error) -> Self {
        ReadError::Io(e)
    }
}

impl From<ProtocolError> for ReadError {
    fn from(e: ProtocolError) -> Self {
        ReadError::Protocol(e)
    }
}

/// Read one complete packet, returning its message batch.
///
/// `Ok(None)` means the peer closed the connection cleanly between
/// packets. A close in the middle of a packet is a protocol error.
pub async fn read_packet(
    socket: &mut TcpStream,
    buffer: &mut BytesMut,
) -> Result<Option<Vec<Message>>, ReadError> {
    loop {
        match decode_frame(buffer)? {
            FrameStatus::Complete { messages, consumed } => {
                trace!("decoded {} messages from {} bytes", messages.len(), consumed);
                buffer.advance(consumed);
                return Ok(Some(messages));
            }
            FrameStatus::NeedMore(_) => {}
        }

        let n = socket.read_buf(buffer).await?;
        if n == 0 {
            if buffer.is_empty() {
                return Ok(None);
            }
            return Err(ProtocolError::Framing {
                detail: "connection closed mid-packet",
            }
            .into());
        }
    }
}

/// Encode a batch of messages as one wire packet.
pub fn encode_packet(messages: &[Message]) -> Bytes {
    Bytes::from(encode_frame(messages))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let client = TcpStream::connect(addr).await.expect("connect");
        let (server, _) = listener.accept().await.expect("accept");
        (client, server)
    }

    #[tokio::test]
    async fn test_read_packet_roundtrip() {
        let (mut client, mut server) = pair().await;
        let batch = vec![
            Message::notify_double("NAV_X", "nav", 1.0, 42.0),
            Message::notify_text("MODE", "nav", 1.0, "DRIVE"),
        ];
        client
            .write_all(&encode_packet(&batch))
            .await
            .expect("write");

        let mut buf = BytesMut::new();
        let got = read_packet(&mut server, &mut buf)
            .await
            .expect("read")
            .expect("not eof");
        assert_eq!(got, batch);
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_read_packet_across_split_writes() {
        let (mut client, mut server) = pair().await;
        let frame = encode_packet(&[Message::notify_double("X", "a", 0.0, 1.0)]);
        let (head, tail) = frame.split_at(5);

        let head = head.to_vec();
        let tail = tail.to_vec();
        let writer = tokio::spawn(async move {
            client.write_all(&head).await.expect("write head");
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            client.write_all(&tail).await.expect("write tail");
            client
        });

        let mut buf = BytesMut::new();
        let got = read_packet(&mut server, &mut buf)
            .await
            .expect("read")
            .expect("not eof");
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].key, "X");
        drop(writer.await.expect("writer task"));
    }

    #[tokio::test]
    async fn test_clean_close_yields_none() {
        let (client, mut server) = pair().await;
        drop(client);
        let mut buf = BytesMut::new();
        let got = read_packet(&mut server, &mut buf).await.expect("read");
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_close_mid_packet_is_error() {
        let (mut client, mut server) = pair().await;
        let frame = encode_packet(&[Message::notify_double("X", "a", 0.0, 1.0)]);
        client.write_all(&frame[..6]).await.expect("write");
        drop(client);

        let mut buf = BytesMut::new();
        let err = read_packet(&mut server, &mut buf)
            .await
            .expect_err("truncated packet must fail");
        assert!(matches!(err, ReadError::Protocol(_)));
    }
}
