//! Durability across broker restarts

mod common;

use ferrumq_codec::BasicProperties;

use common::{persistent, start_broker_at, TestClient};

#[tokio::test]
async fn persistent_message_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    // first life: declare a durable queue, publish a persistent message
    {
        let mut broker = start_broker_at(dir.path()).await;
        let addr = broker.local_addr().unwrap();

        let mut client = TestClient::connect(addr).await;
        client.channel_open(1).await;
        client.queue_declare(1, "d", true).await;
        client.publish(1, "", "d", b"keep", persistent(), false).await;
        // a synchronous declare flushes the publish through the core
        let ok = client.queue_declare_full(1, "d", true, false, true).await;
        assert_eq!(ok.message_count, 1);

        client.close().await;
        broker.stop().await.unwrap();
    }

    // second life: the queue and its message are back before any consumer
    {
        let mut broker = start_broker_at(dir.path()).await;
        let addr = broker.local_addr().unwrap();

        let queues = broker.queues().await.unwrap();
        assert_eq!(queues.len(), 1);
        assert_eq!(queues[0].name, "d");
        assert!(queues[0].durable);
        assert_eq!(queues[0].messages, 1);

        let mut client = TestClient::connect(addr).await;
        client.channel_open(1).await;
        let (_ok, props, body) = client.get(1, "d", true).await.expect("message recovered");
        assert_eq!(&body[..], b"keep");
        assert_eq!(props.delivery_mode, Some(2));
        assert!(client.get(1, "d", true).await.is_none(), "exactly once");

        client.close().await;
        broker.stop().await.unwrap();
    }
}

#[tokio::test]
async fn acked_and_transient_messages_do_not_survive() {
    let dir = tempfile::tempdir().unwrap();

    {
        let mut broker = start_broker_at(dir.path()).await;
        let addr = broker.local_addr().unwrap();

        let mut client = TestClient::connect(addr).await;
        client.channel_open(1).await;
        client.queue_declare(1, "d", true).await;

        // persistent, then acked through a get
        client.publish(1, "", "d", b"acked", persistent(), false).await;
        let (ok, _, _) = client.get(1, "d", false).await.expect("delivered");
        client.ack(1, ok.delivery_tag).await;

        // transient on a durable queue never reaches the log
        client
            .publish(1, "", "d", b"transient", BasicProperties::default(), false)
            .await;
        let declared = client.queue_declare_full(1, "d", true, false, true).await;
        assert_eq!(declared.message_count, 1);

        client.close().await;
        broker.stop().await.unwrap();
    }

    {
        let mut broker = start_broker_at(dir.path()).await;
        let addr = broker.local_addr().unwrap();

        let mut client = TestClient::connect(addr).await;
        client.channel_open(1).await;
        assert!(
            client.get(1, "d", true).await.is_none(),
            "neither acked nor transient messages may survive"
        );

        client.close().await;
        broker.stop().await.unwrap();
    }
}

#[tokio::test]
async fn unacked_at_crash_is_redelivered_after_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let mut broker = start_broker_at(dir.path()).await;
        let addr = broker.local_addr().unwrap();

        let mut client = TestClient::connect(addr).await;
        client.channel_open(1).await;
        client.queue_declare(1, "d", true).await;
        client.publish(1, "", "d", b"inflight", persistent(), false).await;

        // delivered but never acked: the log record must outlive the stop
        let (_ok, _, body) = client.get(1, "d", false).await.expect("delivered");
        assert_eq!(&body[..], b"inflight");
        broker.stop().await.unwrap();
    }

    {
        let mut broker = start_broker_at(dir.path()).await;
        let addr = broker.local_addr().unwrap();

        let mut client = TestClient::connect(addr).await;
        client.channel_open(1).await;
        let (_ok, _, body) = client.get(1, "d", true).await.expect("redelivered");
        assert_eq!(&body[..], b"inflight");

        client.close().await;
        broker.stop().await.unwrap();
    }
}

#[tokio::test]
async fn durable_bindings_and_exchanges_recover() {
    let dir = tempfile::tempdir().unwrap();

    {
        let mut broker = start_broker_at(dir.path()).await;
        let addr = broker.local_addr().unwrap();

        let mut client = TestClient::connect(addr).await;
        client.channel_open(1).await;
        client
            .send_method(
                1,
                ferrumq_codec::ExchangeMethod::Declare(ferrumq_codec::methods::exchange::Declare {
                    exchange: "routes".into(),
                    kind: "topic".into(),
                    passive: false,
                    durable: true,
                    auto_delete: false,
                    internal: false,
                    nowait: false,
                    arguments: Default::default(),
                }),
            )
            .await;
        match client.expect_method().await {
            ferrumq_codec::Method::Exchange(ferrumq_codec::ExchangeMethod::DeclareOk) => {}
            other => panic!("expected Exchange.Declare-Ok, got {other:?}"),
        }
        client.queue_declare(1, "d", true).await;
        client.queue_bind(1, "d", "routes", "stock.#").await;

        client.close().await;
        broker.stop().await.unwrap();
    }

    {
        let mut broker = start_broker_at(dir.path()).await;
        let addr = broker.local_addr().unwrap();

        let exchanges = broker.exchanges().await.unwrap();
        assert!(exchanges.iter().any(|e| e.name == "routes" && e.durable));
        let bindings = broker.bindings().await.unwrap();
        assert!(bindings
            .iter()
            .any(|b| b.source == "routes" && b.destination == "d" && b.routing_key == "stock.#"));

        // the recovered topology still routes
        let mut client = TestClient::connect(addr).await;
        client.channel_open(1).await;
        client
            .publish(1, "routes", "stock.nyse", b"routed", BasicProperties::default(), false)
            .await;
        let (_ok, _, body) = client.get(1, "d", true).await.expect("routed after recovery");
        assert_eq!(&body[..], b"routed");

        client.close().await;
        broker.stop().await.unwrap();
    }
}
