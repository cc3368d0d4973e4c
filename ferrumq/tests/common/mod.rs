//! A minimal AMQP 0-9-1 client for driving a live broker in tests
//!
//! Speaks the wire protocol through `ferrumq-codec` over a raw
//! `TcpStream`, the same way a real client library would.

// each test binary uses a different slice of this helper
#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use ferrumq::Broker;
use ferrumq_codec::methods::{basic, channel, connection, exchange, queue};
use ferrumq_codec::{
    BasicMethod, BasicProperties, ChannelMethod, ConnectionMethod, ExchangeMethod, FieldTable,
    Frame, FrameCodec, FramePayload, Method, QueueMethod,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Starts a broker on an ephemeral port over a fresh temp data dir
pub async fn start_broker() -> (Broker, SocketAddr, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let broker = start_broker_at(dir.path()).await;
    let addr = broker.local_addr().expect("local addr");
    (broker, addr, dir)
}

/// Starts a broker on an ephemeral port over an existing data dir
pub async fn start_broker_at(data_dir: &std::path::Path) -> Broker {
    let mut broker = Broker::builder()
        .host("127.0.0.1")
        .port(0)
        .data_dir(data_dir)
        .build();
    broker.start().await.expect("broker start");
    broker
}

pub struct TestClient {
    framed: Framed<TcpStream, FrameCodec>,
}

impl TestClient {
    /// Connects and runs the full handshake with PLAIN credentials
    pub async fn connect(addr: SocketAddr) -> Self {
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        stream
            .write_all(b"AMQP\x00\x00\x09\x01")
            .await
            .expect("protocol header");
        let mut client = Self {
            framed: Framed::new(stream, FrameCodec::default()),
        };

        match client.expect_connection_method().await {
            ConnectionMethod::Start(start) => {
                assert_eq!((start.version_major, start.version_minor), (0, 9));
                assert!(start.mechanisms.contains("PLAIN"));
            }
            other => panic!("expected Connection.Start, got {other:?}"),
        }
        client
            .send_method(
                0,
                ConnectionMethod::StartOk(connection::StartOk {
                    client_properties: FieldTable::new(),
                    mechanism: "PLAIN".into(),
                    response: Bytes::from_static(b"\0guest\0guest"),
                    locale: "en_US".into(),
                }),
            )
            .await;

        let tune = match client.expect_connection_method().await {
            ConnectionMethod::Tune(tune) => tune,
            other => panic!("expected Connection.Tune, got {other:?}"),
        };
        client
            .send_method(
                0,
                ConnectionMethod::TuneOk(connection::TuneOk {
                    channel_max: tune.channel_max,
                    frame_max: tune.frame_max,
                    heartbeat: 0,
                }),
            )
            .await;
        client
            .send_method(
                0,
                ConnectionMethod::Open(connection::Open {
                    virtual_host: "/".into(),
                    capabilities: String::new(),
                    insist: false,
                }),
            )
            .await;
        match client.expect_connection_method().await {
            ConnectionMethod::OpenOk(_) => {}
            other => panic!("expected Connection.Open-Ok, got {other:?}"),
        }
        client
    }

    pub async fn send(&mut self, frame: Frame) {
        self.framed.send(frame).await.expect("send frame");
    }

    pub async fn send_method(&mut self, channel: u16, method: impl Into<Method>) {
        self.send(Frame::method(channel, method)).await;
    }

    /// Next frame, heartbeats skipped
    pub async fn recv(&mut self) -> Frame {
        loop {
            let frame = timeout(RECV_TIMEOUT, self.framed.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("connection closed")
                .expect("frame error");
            if !matches!(frame.payload, FramePayload::Heartbeat) {
                return frame;
            }
        }
    }

    /// Asserts that no frame arrives within `wait`
    pub async fn expect_silence(&mut self, wait: Duration) {
        if let Ok(frame) = timeout(wait, self.framed.next()).await {
            panic!("expected silence, got {frame:?}");
        }
    }

    pub async fn expect_method(&mut self) -> Method {
        match self.recv().await.payload {
            FramePayload::Method(method) => method,
            other => panic!("expected a method frame, got {other:?}"),
        }
    }

    async fn expect_connection_method(&mut self) -> ConnectionMethod {
        match self.expect_method().await {
            Method::Connection(method) => method,
            other => panic!("expected a connection method, got {other:?}"),
        }
    }

    /// Collects the header and body frames that follow a content-bearing
    /// method; returns the properties and the reassembled body
    pub async fn expect_content(&mut self) -> (BasicProperties, Bytes) {
        let header = match self.recv().await.payload {
            FramePayload::Header(header) => header,
            other => panic!("expected a content header, got {other:?}"),
        };
        let mut buf = BytesMut::new();
        while (buf.len() as u64) < header.body_size {
            match self.recv().await.payload {
                FramePayload::Body(chunk) => buf.extend_from_slice(&chunk),
                other => panic!("expected a body frame, got {other:?}"),
            }
        }
        (header.properties, buf.freeze())
    }

    /* --------------------------- method helpers --------------------------- */

    pub async fn channel_open(&mut self, ch: u16) {
        self.send_method(ch, ChannelMethod::Open(channel::Open::default()))
            .await;
        match self.expect_method().await {
            Method::Channel(ChannelMethod::OpenOk(_)) => {}
            other => panic!("expected Channel.Open-Ok, got {other:?}"),
        }
    }

    pub async fn queue_declare(&mut self, ch: u16, name: &str, durable: bool) -> queue::DeclareOk {
        self.queue_declare_full(ch, name, durable, false, false).await
    }

    pub async fn queue_declare_full(
        &mut self,
        ch: u16,
        name: &str,
        durable: bool,
        exclusive: bool,
        passive: bool,
    ) -> queue::DeclareOk {
        self.send_method(
            ch,
            QueueMethod::Declare(queue::Declare {
                queue: name.into(),
                passive,
                durable,
                exclusive,
                auto_delete: false,
                nowait: false,
                arguments: FieldTable::new(),
            }),
        )
        .await;
        match self.expect_method().await {
            Method::Queue(QueueMethod::DeclareOk(ok)) => ok,
            other => panic!("expected Queue.Declare-Ok, got {other:?}"),
        }
    }

    pub async fn exchange_declare(&mut self, ch: u16, name: &str, kind: &str) {
        self.send_method(
            ch,
            ExchangeMethod::Declare(exchange::Declare {
                exchange: name.into(),
                kind: kind.into(),
                passive: false,
                durable: false,
                auto_delete: false,
                internal: false,
                nowait: false,
                arguments: FieldTable::new(),
            }),
        )
        .await;
        match self.expect_method().await {
            Method::Exchange(ExchangeMethod::DeclareOk) => {}
            other => panic!("expected Exchange.Declare-Ok, got {other:?}"),
        }
    }

    pub async fn queue_bind(&mut self, ch: u16, queue: &str, exchange: &str, routing_key: &str) {
        self.send_method(
            ch,
            QueueMethod::Bind(queue::Bind {
                queue: queue.into(),
                exchange: exchange.into(),
                routing_key: routing_key.into(),
                nowait: false,
                arguments: FieldTable::new(),
            }),
        )
        .await;
        match self.expect_method().await {
            Method::Queue(QueueMethod::BindOk) => {}
            other => panic!("expected Queue.Bind-Ok, got {other:?}"),
        }
    }

    /// Publishes a message: the method frame, a header, and one body frame
    pub async fn publish(
        &mut self,
        ch: u16,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: BasicProperties,
        mandatory: bool,
    ) {
        self.send_method(
            ch,
            BasicMethod::Publish(basic::Publish {
                exchange: exchange.into(),
                routing_key: routing_key.into(),
                mandatory,
                immediate: false,
            }),
        )
        .await;
        self.send(Frame::header(
            ch,
            ferrumq_codec::ContentHeader::basic(body.len() as u64, properties),
        ))
        .await;
        if !body.is_empty() {
            self.send(Frame::body(ch, Bytes::copy_from_slice(body))).await;
        }
    }

    pub async fn consume(&mut self, ch: u16, queue: &str, no_ack: bool) -> String {
        self.send_method(
            ch,
            BasicMethod::Consume(basic::Consume {
                queue: queue.into(),
                consumer_tag: String::new(),
                no_local: false,
                no_ack,
                exclusive: false,
                nowait: false,
                arguments: FieldTable::new(),
            }),
        )
        .await;
        match self.expect_method().await {
            Method::Basic(BasicMethod::ConsumeOk(ok)) => ok.consumer_tag,
            other => panic!("expected Basic.Consume-Ok, got {other:?}"),
        }
    }

    pub async fn qos(&mut self, ch: u16, prefetch_count: u16) {
        self.send_method(
            ch,
            BasicMethod::Qos(basic::Qos {
                prefetch_size: 0,
                prefetch_count,
                global: false,
            }),
        )
        .await;
        match self.expect_method().await {
            Method::Basic(BasicMethod::QosOk) => {}
            other => panic!("expected Basic.Qos-Ok, got {other:?}"),
        }
    }

    /// Waits for a delivery and returns it with its content
    pub async fn expect_deliver(&mut self) -> (basic::Deliver, BasicProperties, Bytes) {
        let deliver = match self.expect_method().await {
            Method::Basic(BasicMethod::Deliver(deliver)) => deliver,
            other => panic!("expected Basic.Deliver, got {other:?}"),
        };
        let (properties, body) = self.expect_content().await;
        (deliver, properties, body)
    }

    pub async fn ack(&mut self, ch: u16, delivery_tag: u64) {
        self.send_method(
            ch,
            BasicMethod::Ack(basic::Ack {
                delivery_tag,
                multiple: false,
            }),
        )
        .await;
    }

    pub async fn nack_requeue(&mut self, ch: u16, delivery_tag: u64) {
        self.send_method(
            ch,
            BasicMethod::Nack(basic::Nack {
                delivery_tag,
                multiple: false,
                requeue: true,
            }),
        )
        .await;
    }

    /// `Basic.Get`; `Some` carries the Get-Ok plus content, `None` is
    /// Get-Empty
    pub async fn get(
        &mut self,
        ch: u16,
        queue: &str,
        no_ack: bool,
    ) -> Option<(basic::GetOk, BasicProperties, Bytes)> {
        self.send_method(
            ch,
            BasicMethod::Get(basic::Get {
                queue: queue.into(),
                no_ack,
            }),
        )
        .await;
        match self.expect_method().await {
            Method::Basic(BasicMethod::GetOk(ok)) => {
                let (properties, body) = self.expect_content().await;
                Some((ok, properties, body))
            }
            Method::Basic(BasicMethod::GetEmpty(_)) => None,
            other => panic!("expected Basic.Get-Ok or Get-Empty, got {other:?}"),
        }
    }

    /// Orderly connection close
    pub async fn close(mut self) {
        self.send_method(
            0,
            ConnectionMethod::Close(connection::Close {
                reply_code: 200,
                reply_text: "Goodbye".into(),
                class_id: 0,
                method_id: 0,
            }),
        )
        .await;
        match self.expect_method().await {
            Method::Connection(ConnectionMethod::CloseOk) => {}
            other => panic!("expected Connection.Close-Ok, got {other:?}"),
        }
    }
}

/// Properties marking a message persistent
pub fn persistent() -> BasicProperties {
    BasicProperties {
        delivery_mode: Some(2),
        ..Default::default()
    }
}
