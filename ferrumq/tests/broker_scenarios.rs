//! End-to-end broker scenarios over real TCP connections

mod common;

use std::time::Duration;

use ferrumq_codec::constants::reply_code;
use ferrumq_codec::{BasicMethod, BasicProperties, ChannelMethod, Method, QueueMethod};

use common::{persistent, start_broker, TestClient};

#[tokio::test]
async fn default_exchange_loopback() {
    let (mut broker, addr, _dir) = start_broker().await;

    let mut client = TestClient::connect(addr).await;
    client.channel_open(1).await;
    client.queue_declare(1, "q1", false).await;
    client.consume(1, "q1", true).await;
    client
        .publish(1, "", "q1", b"hello", BasicProperties::default(), false)
        .await;

    let (deliver, _props, body) = client.expect_deliver().await;
    assert_eq!(&body[..], b"hello");
    assert_eq!(deliver.exchange, "");
    assert_eq!(deliver.routing_key, "q1");
    assert_eq!(deliver.delivery_tag, 1);
    assert!(!deliver.redelivered);

    client.close().await;
    broker.stop().await.unwrap();
}

#[tokio::test]
async fn fanout_broadcast_reaches_each_queue_once() {
    let (mut broker, addr, _dir) = start_broker().await;

    let mut client = TestClient::connect(addr).await;
    client.channel_open(1).await;
    client.exchange_declare(1, "e", "fanout").await;
    client.queue_declare(1, "a", false).await;
    client.queue_declare(1, "b", false).await;
    client.queue_bind(1, "a", "e", "").await;
    client.queue_bind(1, "b", "e", "").await;

    client
        .publish(1, "e", "", b"fan", BasicProperties::default(), false)
        .await;

    for queue in ["a", "b"] {
        let (_ok, _props, body) = client
            .get(1, queue, true)
            .await
            .unwrap_or_else(|| panic!("queue {queue} should hold the message"));
        assert_eq!(&body[..], b"fan");
        assert!(client.get(1, queue, true).await.is_none(), "{queue} drained");
    }

    client.close().await;
    broker.stop().await.unwrap();
}

#[tokio::test]
async fn topic_wildcards_route_by_pattern() {
    let (mut broker, addr, _dir) = start_broker().await;

    let mut client = TestClient::connect(addr).await;
    client.channel_open(1).await;
    client.exchange_declare(1, "t", "topic").await;
    client.queue_declare(1, "all", false).await;
    client.queue_declare(1, "stock", false).await;
    client.queue_bind(1, "all", "t", "#").await;
    client.queue_bind(1, "stock", "t", "stock.*").await;

    client
        .publish(1, "t", "stock.nasdaq", b"nasdaq", BasicProperties::default(), false)
        .await;
    client
        .publish(1, "t", "weather.usa", b"weather", BasicProperties::default(), false)
        .await;

    // "all" holds both, in publish order
    let (_, _, first) = client.get(1, "all", true).await.expect("all #1");
    let (_, _, second) = client.get(1, "all", true).await.expect("all #2");
    assert_eq!(&first[..], b"nasdaq");
    assert_eq!(&second[..], b"weather");
    assert!(client.get(1, "all", true).await.is_none());

    // "stock" holds only the matching one
    let (_, _, only) = client.get(1, "stock", true).await.expect("stock #1");
    assert_eq!(&only[..], b"nasdaq");
    assert!(client.get(1, "stock", true).await.is_none());

    client.close().await;
    broker.stop().await.unwrap();
}

#[tokio::test]
async fn prefetch_one_work_queue_delivers_in_lockstep() {
    let (mut broker, addr, _dir) = start_broker().await;

    let mut client = TestClient::connect(addr).await;
    client.channel_open(1).await;
    client.queue_declare(1, "w", true).await;
    client.qos(1, 1).await;
    client.consume(1, "w", false).await;

    for body in [b"one" as &[u8], b"two", b"three"] {
        client.publish(1, "", "w", body, persistent(), false).await;
    }

    let (first, _, body) = client.expect_deliver().await;
    assert_eq!(&body[..], b"one");
    // the window is full: nothing else may arrive until the ack
    client.expect_silence(Duration::from_millis(200)).await;
    client.ack(1, first.delivery_tag).await;

    let (second, _, body) = client.expect_deliver().await;
    assert_eq!(&body[..], b"two");
    client.expect_silence(Duration::from_millis(200)).await;
    client.ack(1, second.delivery_tag).await;

    let (third, _, body) = client.expect_deliver().await;
    assert_eq!(&body[..], b"three");
    client.ack(1, third.delivery_tag).await;

    // delivery tags are strictly increasing from 1
    assert_eq!(
        (first.delivery_tag, second.delivery_tag, third.delivery_tag),
        (1, 2, 3)
    );

    client.close().await;
    broker.stop().await.unwrap();
}

#[tokio::test]
async fn nack_with_requeue_redelivers_then_drains() {
    let (mut broker, addr, _dir) = start_broker().await;

    let mut client = TestClient::connect(addr).await;
    client.channel_open(1).await;
    client.queue_declare(1, "r", false).await;
    client.consume(1, "r", false).await;
    client
        .publish(1, "", "r", b"retry-me", BasicProperties::default(), false)
        .await;

    let (first, _, body) = client.expect_deliver().await;
    assert_eq!(&body[..], b"retry-me");
    assert!(!first.redelivered);
    client.nack_requeue(1, first.delivery_tag).await;

    let (second, _, body) = client.expect_deliver().await;
    assert_eq!(&body[..], b"retry-me");
    assert!(second.redelivered);
    assert!(second.delivery_tag > first.delivery_tag);
    client.ack(1, second.delivery_tag).await;

    // acked: the queue must be empty
    assert!(client.get(1, "r", true).await.is_none());

    client.close().await;
    broker.stop().await.unwrap();
}

#[tokio::test]
async fn unroutable_mandatory_publish_is_returned() {
    let (mut broker, addr, _dir) = start_broker().await;

    let mut client = TestClient::connect(addr).await;
    client.channel_open(1).await;
    let mut props = BasicProperties::default();
    props.correlation_id = Some("corr-7".into());
    client
        .publish(1, "", "nowhere", b"boomerang", props, true)
        .await;

    match client.expect_method().await {
        Method::Basic(BasicMethod::Return(ret)) => {
            assert_eq!(ret.reply_code, reply_code::NO_CONSUMERS);
            assert_eq!(ret.reply_text, "No route");
            assert_eq!(ret.exchange, "");
            assert_eq!(ret.routing_key, "nowhere");
        }
        other => panic!("expected Basic.Return, got {other:?}"),
    }
    let (props, body) = client.expect_content().await;
    assert_eq!(props.correlation_id.as_deref(), Some("corr-7"));
    assert_eq!(&body[..], b"boomerang");

    // without mandatory the message is silently dropped
    client
        .publish(1, "", "nowhere", b"gone", BasicProperties::default(), false)
        .await;
    client.expect_silence(Duration::from_millis(200)).await;

    client.close().await;
    broker.stop().await.unwrap();
}

#[tokio::test]
async fn exclusive_queue_locks_out_other_connections() {
    let (mut broker, addr, _dir) = start_broker().await;

    let mut owner = TestClient::connect(addr).await;
    owner.channel_open(1).await;
    owner.queue_declare_full(1, "ex", false, true, false).await;

    // another connection touching the queue gets a channel-level 405
    let mut intruder = TestClient::connect(addr).await;
    intruder.channel_open(1).await;
    intruder
        .send_method(
            1,
            BasicMethod::Get(ferrumq_codec::methods::basic::Get {
                queue: "ex".into(),
                no_ack: true,
            }),
        )
        .await;
    match intruder.expect_method().await {
        Method::Channel(ChannelMethod::Close(close)) => {
            assert_eq!(close.reply_code, reply_code::RESOURCE_LOCKED);
        }
        other => panic!("expected Channel.Close 405, got {other:?}"),
    }
    intruder.send_method(1, ChannelMethod::CloseOk).await;

    // the owner closing its connection deletes the queue
    owner.close().await;
    intruder.channel_open(2).await;
    intruder
        .send_method(
            2,
            QueueMethod::Declare(ferrumq_codec::methods::queue::Declare {
                queue: "ex".into(),
                passive: true,
                durable: false,
                exclusive: false,
                auto_delete: false,
                nowait: false,
                arguments: Default::default(),
            }),
        )
        .await;
    match intruder.expect_method().await {
        Method::Channel(ChannelMethod::Close(close)) => {
            assert_eq!(close.reply_code, reply_code::NOT_FOUND);
        }
        other => panic!("expected Channel.Close 404, got {other:?}"),
    }
    intruder.send_method(2, ChannelMethod::CloseOk).await;

    intruder.close().await;
    broker.stop().await.unwrap();
}

#[tokio::test]
async fn round_robin_between_two_consumers() {
    let (mut broker, addr, _dir) = start_broker().await;

    let mut client = TestClient::connect(addr).await;
    client.channel_open(1).await;
    client.queue_declare(1, "shared", false).await;
    let tag_a = client.consume(1, "shared", true).await;
    let tag_b = client.consume(1, "shared", true).await;
    assert_ne!(tag_a, tag_b);

    for body in [b"m1" as &[u8], b"m2", b"m3", b"m4"] {
        client
            .publish(1, "", "shared", body, BasicProperties::default(), false)
            .await;
    }

    let mut by_consumer = std::collections::HashMap::<String, Vec<Vec<u8>>>::new();
    for _ in 0..4 {
        let (deliver, _, body) = client.expect_deliver().await;
        by_consumer
            .entry(deliver.consumer_tag)
            .or_default()
            .push(body.to_vec());
    }
    // fair rotation: two messages each
    assert_eq!(by_consumer[&tag_a].len(), 2);
    assert_eq!(by_consumer[&tag_b].len(), 2);

    client.close().await;
    broker.stop().await.unwrap();
}

#[tokio::test]
async fn queue_purge_reports_and_drops() {
    let (mut broker, addr, _dir) = start_broker().await;

    let mut client = TestClient::connect(addr).await;
    client.channel_open(1).await;
    client.queue_declare(1, "p", false).await;
    for _ in 0..3 {
        client
            .publish(1, "", "p", b"x", BasicProperties::default(), false)
            .await;
    }
    // a synchronous method flushes the publishes through the core
    let ok = client.queue_declare_full(1, "p", false, false, true).await;
    assert_eq!(ok.message_count, 3);

    client
        .send_method(
            1,
            QueueMethod::Purge(ferrumq_codec::methods::queue::Purge {
                queue: "p".into(),
                nowait: false,
            }),
        )
        .await;
    match client.expect_method().await {
        Method::Queue(QueueMethod::PurgeOk(ok)) => assert_eq!(ok.message_count, 3),
        other => panic!("expected Queue.Purge-Ok, got {other:?}"),
    }
    assert!(client.get(1, "p", true).await.is_none());

    client.close().await;
    broker.stop().await.unwrap();
}

#[tokio::test]
async fn broker_surface_reports_entities_and_events() {
    let (mut broker, addr, _dir) = start_broker().await;
    let mut events = broker.subscribe();

    let mut client = TestClient::connect(addr).await;
    client.channel_open(1).await;
    client.queue_declare(1, "observed", false).await;

    let status = broker.status().await.unwrap();
    assert_eq!(status.connections, 1);
    assert_eq!(status.queues, 1);
    // the built-in exchange set: "", amq.direct, amq.fanout, amq.topic,
    // amq.headers
    assert_eq!(status.exchanges, 5);

    let queues = broker.queues().await.unwrap();
    assert_eq!(queues[0].name, "observed");
    let bindings = broker.bindings().await.unwrap();
    assert!(bindings
        .iter()
        .any(|b| b.source.is_empty() && b.destination == "observed"));

    let mut saw_queue_created = false;
    while let Ok(event) = events.try_recv() {
        if matches!(&event, ferrumq::BrokerEvent::QueueCreated { name } if name == "observed") {
            saw_queue_created = true;
        }
    }
    assert!(saw_queue_created, "queue:created event must be published");

    client.close().await;
    broker.stop().await.unwrap();
}
