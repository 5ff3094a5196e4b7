//! End-to-end tests against a live server on an ephemeral port.

use std::time::Duration;

use bytes::{Buf, BytesMut};
use helmbus_core::protocol::{decode_frame, encode_frame, FrameStatus};
use helmbus_core::time::FixedTime;
use helmbus_core::{Message, MessageKind, Payload};
use helmbus_tokio::{BusServer, BusServerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

struct TestClient {
    stream: TcpStream,
    buf: BytesMut,
}

impl TestClient {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        TestClient {
            stream,
            buf: BytesMut::new(),
        }
    }

    async fn send(&mut self, msgs: &[Message]) {
        self.stream
            .write_all(&encode_frame(msgs))
            .await
            .expect("write");
    }

    /// Read one packet, None on clean close.
    async fn recv(&mut self) -> Option<Vec<Message>> {
        let read = async {
            loop {
                if let FrameStatus::Complete { messages, consumed } =
                    decode_frame(&self.buf).expect("decode")
                {
                    self.buf.advance(consumed);
                    return Some(messages);
                }
                let n = self.stream.read_buf(&mut self.buf).await.expect("read");
                if n == 0 {
                    return None;
                }
            }
        };
        timeout(RECV_TIMEOUT, read).await.expect("recv timed out")
    }

    async fn register(&mut self, identity: &str) {
        self.send(&[Message::register(identity, 0.0)]).await;
        let mail = self.recv().await.expect("welcome expected");
        assert_eq!(mail.len(), 1);
        assert_eq!(mail[0].kind, MessageKind::Welcome);
    }
}

#[tokio::test]
async fn test_publish_reaches_subscriber() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let server = BusServer::default();
    tokio::spawn(async move { server.serve(listener).await });

    let mut nav = TestClient::connect(addr).await;
    nav.register("nav").await;

    let mut helm = TestClient::connect(addr).await;
    helm.register("helm").await;
    helm.send(&[Message::subscribe("helm", "NAV_X", "", 0.0, 0.0)])
        .await;

    // Give the subscription time to land before publishing.
    tokio::time::sleep(Duration::from_millis(50)).await;
    nav.send(&[Message::notify_double("NAV_X", "nav", 1.0, 42.0)])
        .await;

    let mail = helm.recv().await.expect("delivery expected");
    assert_eq!(mail.len(), 1);
    assert_eq!(mail[0].kind, MessageKind::Notify);
    assert_eq!(mail[0].key, "NAV_X");
    assert_eq!(mail[0].source, "nav");
    assert_eq!(mail[0].payload, Payload::Double(42.0));
}

#[tokio::test]
async fn test_subscribe_gets_current_value() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let server = BusServer::default();
    tokio::spawn(async move { server.serve(listener).await });

    let mut nav = TestClient::connect(addr).await;
    nav.register("nav").await;
    nav.send(&[Message::notify_text("MODE", "nav", 1.0, "DRIVE")])
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut helm = TestClient::connect(addr).await;
    helm.register("helm").await;
    helm.send(&[Message::subscribe("helm", "MODE", "", 0.0, 0.0)])
        .await;

    let mail = helm.recv().await.expect("initial value expected");
    assert_eq!(mail.len(), 1);
    assert_eq!(mail[0].payload, Payload::Text("DRIVE".to_owned()));
}

#[tokio::test]
async fn test_wildcard_subscription_over_the_wire() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let server = BusServer::default();
    tokio::spawn(async move { server.serve(listener).await });

    let mut helm = TestClient::connect(addr).await;
    helm.register("helm").await;
    helm.send(&[Message::subscribe("helm", "NAV_*", "", 0.0, 0.0)])
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut nav = TestClient::connect(addr).await;
    nav.register("nav").await;
    // Variable born after the wildcard was registered.
    nav.send(&[Message::notify_double("NAV_HEADING", "nav", 1.0, 271.5)])
        .await;

    let mail = helm.recv().await.expect("delivery expected");
    assert_eq!(mail[0].key, "NAV_HEADING");
}

#[tokio::test]
async fn test_disconnect_frees_identity() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let server = BusServer::default();
    let broker = server.broker();
    tokio::spawn(async move { server.serve(listener).await });

    let first = TestClient::connect(addr).await;
    {
        let mut first = first;
        first.register("helm").await;
        // Dropped here; the server runs its cleanup path.
    }

    // Wait for the server side to notice the close.
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    loop {
        if broker.lock().await.session_count() == 0 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "cleanup never ran");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let mut second = TestClient::connect(addr).await;
    second.register("helm").await;
}

#[tokio::test]
async fn test_malformed_frame_closes_only_that_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let server = BusServer::default();
    tokio::spawn(async move { server.serve(listener).await });

    let mut good = TestClient::connect(addr).await;
    good.register("good").await;

    let mut bad = TestClient::connect(addr).await;
    // Declares a 4 GiB packet; the server must drop the connection.
    bad.stream
        .write_all(&[0xff, 0xff, 0xff, 0xff])
        .await
        .expect("write");
    assert!(bad.recv().await.is_none(), "expected server to close");

    // The well-behaved client still works.
    good.send(&[Message::subscribe("good", "X", "", 0.0, 0.0)])
        .await;
    good.send(&[Message::notify_double("X", "good", 1.0, 1.0)])
        .await;
    let mail = good.recv().await.expect("delivery expected");
    assert_eq!(mail[0].key, "X");
}

#[tokio::test]
async fn test_fatal_message_in_batch_still_wakes_subscribers() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let server = BusServer::default();
    tokio::spawn(async move { server.serve(listener).await });

    let mut helm = TestClient::connect(addr).await;
    helm.register("helm").await;
    helm.send(&[Message::subscribe("helm", "NAV_X", "", 0.0, 0.0)])
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // One packet: a valid publish followed by a session-fatal register.
    // The publish is already committed, so the subscriber must still be
    // woken even though the publisher's connection goes down.
    let mut nav = TestClient::connect(addr).await;
    nav.register("nav").await;
    nav.send(&[
        Message::notify_double("NAV_X", "nav", 1.0, 7.25),
        Message::register("", 1.0),
    ])
    .await;

    let mail = helm.recv().await.expect("delivery expected");
    assert_eq!(mail.len(), 1);
    assert_eq!(mail[0].key, "NAV_X");
    assert_eq!(mail[0].payload, Payload::Double(7.25));
    assert!(nav.recv().await.is_none(), "publisher should be dropped");
}

#[tokio::test]
async fn test_timing_handshake_echoes_broker_clock() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let server = BusServer::default();
    tokio::spawn(async move { server.serve(listener).await });

    let mut client = TestClient::connect(addr).await;
    client
        .send(&[Message::timing("?", 123.0, 0.0, 0.0, 123.0)])
        .await;

    let mail = client.recv().await.expect("echo expected");
    assert_eq!(mail.len(), 1);
    assert_eq!(mail[0].kind, MessageKind::Timing);
    let (rq, tx, rx) = mail[0].timing_triple().expect("triple");
    assert_eq!(rq, 123.0);
    assert!(tx > 1.5e9, "tx should carry the broker's wall clock");
    assert_eq!(rx, 0.0);
}

#[tokio::test]
async fn test_injected_clock_stamps_timing_echo() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let server = BusServer::with_clock(BusServerConfig::default(), FixedTime(1000.0));
    tokio::spawn(async move { server.serve(listener).await });

    let mut client = TestClient::connect(addr).await;
    client
        .send(&[Message::timing("?", 5.0, 0.0, 0.0, 5.0)])
        .await;

    let mail = client.recv().await.expect("echo expected");
    let (_, tx, _) = mail[0].timing_triple().expect("triple");
    assert_eq!(tx, 1000.0);
}
