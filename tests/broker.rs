// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! End-to-end tests against a running broker.
//!
//! Ignored by default. Point them at a broker through the usual configuration
//! (`GATEWAY_RABBITMQ__HOST`, `GATEWAY_RABBITMQ__PORT`, ...) and run
//! `cargo test --test broker -- --ignored`.

use rabbitmq_gateway::{
    broker::AmqpBroker,
    channel::AmqpConnection,
    configs::{AppConfigs, BindingDefaults},
    confirms::{ConfirmRegistry, ConfirmStatus},
    dispatcher::HandlerRegistry,
    errors::{HandlerError, ReadError},
    exchange::ExchangeDefinition,
    handler::handler_fn,
    pool::{ConsumerOptions, ConsumerPool, PoolState},
    publisher::{Publisher, RabbitMQPublisher},
    queue::{QueueBinding, QueueDefinition},
    reader::{AmqpQueueReader, QueueReader},
    topology::{AmqpTopology, TopologyManager},
};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::{sleep, timeout};
use uuid::Uuid;

struct Gateway {
    connection: Arc<AmqpConnection>,
    topology: Arc<AmqpTopology>,
    publisher: Arc<RabbitMQPublisher>,
    reader: Arc<AmqpQueueReader>,
    confirms: Arc<ConfirmRegistry>,
}

impl Gateway {
    fn new() -> Gateway {
        let cfg = AppConfigs::load().expect("configuration");
        let connection = AmqpConnection::new(&cfg.rabbitmq, "gateway-live-tests");
        let broker = AmqpBroker::new(connection.clone());
        let confirms = Arc::new(ConfirmRegistry::default());

        Gateway {
            topology: AmqpTopology::new(broker.clone(), BindingDefaults::default()),
            publisher: RabbitMQPublisher::new(broker.clone(), confirms.clone()),
            reader: AmqpQueueReader::new(broker),
            confirms,
            connection,
        }
    }

    async fn publish_confirmed(&self, exchange: &str, key: &str, payload: &[u8]) {
        let token = Uuid::new_v4().to_string();
        let handle = self
            .publisher
            .send_with_confirmation(exchange, key, payload, &token)
            .await
            .expect("publish");

        let status = timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("confirmation");
        assert_eq!(status, ConfirmStatus::Ack);
    }
}

fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

async fn eventually<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..50 {
        if check() {
            return;
        }
        sleep(Duration::from_millis(100)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[tokio::test]
#[ignore]
async fn declare_queue_exchange_and_binding() {
    let gw = Gateway::new();
    let queue = unique("orders");
    let exchange = unique("ex");

    gw.topology
        .declare_queue(&QueueDefinition::new(&queue).durable())
        .await
        .unwrap();
    gw.topology
        .declare_exchange(&ExchangeDefinition::new(&exchange).direct())
        .await
        .unwrap();
    gw.topology
        .declare_binding(&QueueBinding::new(&queue).exchange(&exchange).routing_key("rk"))
        .await
        .unwrap();

    gw.publish_confirmed(&exchange, "rk", b"routed").await;
    assert_eq!(gw.reader.message_count(&queue).await, Ok(1));

    gw.topology.delete_queue(&queue).await.unwrap();
    gw.topology.delete_exchange(&exchange).await.unwrap();
    gw.connection.close().await;
}

#[tokio::test]
#[ignore]
async fn declarations_are_idempotent() {
    let gw = Gateway::new();
    let queue = QueueDefinition::new(&unique("idem")).durable();
    let exchange = ExchangeDefinition::new(&unique("idem-ex")).topic().durable();
    let binding = QueueBinding::new(queue.name())
        .exchange(exchange.name())
        .routing_key("a.*");

    for _ in 0..2 {
        gw.topology.declare_queue(&queue).await.unwrap();
        gw.topology.declare_exchange(&exchange).await.unwrap();
        gw.topology.declare_binding(&binding).await.unwrap();
    }

    gw.topology.delete_queue(queue.name()).await.unwrap();
    gw.topology.delete_exchange(exchange.name()).await.unwrap();
    gw.connection.close().await;
}

#[tokio::test]
#[ignore]
async fn binding_creates_missing_queue_and_exchange() {
    let gw = Gateway::new();
    let queue = unique("ensure");
    let exchange = unique("ensure-ex");

    gw.topology
        .declare_binding(&QueueBinding::new(&queue).exchange(&exchange).routing_key("rk"))
        .await
        .unwrap();

    gw.publish_confirmed(&exchange, "rk", b"bound").await;
    assert!(gw.reader.has_messages(&queue).await.unwrap());

    gw.topology.delete_queue(&queue).await.unwrap();
    gw.topology.delete_exchange(&exchange).await.unwrap();
    gw.connection.close().await;
}

#[tokio::test]
#[ignore]
async fn deleting_missing_entities_succeeds() {
    let gw = Gateway::new();

    gw.topology
        .delete_binding(
            &QueueBinding::new(&unique("ghost"))
                .exchange(&unique("ghost-ex"))
                .routing_key("rk"),
        )
        .await
        .unwrap();
    gw.topology.delete_queue(&unique("ghost")).await.unwrap();
    gw.topology
        .delete_exchange(&unique("ghost-ex"))
        .await
        .unwrap();
    gw.connection.close().await;
}

#[tokio::test]
#[ignore]
async fn missing_queue_lookups_do_not_fail_concurrent_operations() {
    let gw = Gateway::new();
    let queue = unique("busy");
    let doomed = unique("doomed");
    let binding = QueueBinding::new(&queue)
        .exchange(&unique("busy-ex"))
        .routing_key("rk");
    for name in [&queue, &doomed] {
        gw.topology
            .declare_queue(&QueueDefinition::new(name))
            .await
            .unwrap();
    }

    for _ in 0..20 {
        let ghost = unique("ghost");
        let (missing, present, bound) = tokio::join!(
            gw.reader.message_count(&ghost),
            gw.reader.message_count(&queue),
            gw.topology.declare_binding(&binding),
        );

        assert_eq!(missing, Err(ReadError::QueueNotFound(ghost)));
        assert_eq!(present, Ok(0));
        assert_eq!(bound, Ok(()));
    }

    let ghost = unique("ghost");
    let (missing, deleted) = tokio::join!(
        gw.reader.receive(&ghost),
        gw.topology.delete_queue(&doomed),
    );
    assert!(matches!(missing, Err(ReadError::QueueNotFound(_))));
    assert_eq!(deleted, Ok(()));
    assert!(matches!(
        gw.reader.message_count(&doomed).await,
        Err(ReadError::QueueNotFound(_))
    ));

    gw.topology.delete_queue(&queue).await.unwrap();
    gw.topology
        .delete_exchange(binding.exchange_name())
        .await
        .unwrap();
    gw.connection.close().await;
}

#[tokio::test]
#[ignore]
async fn unroutable_message_fires_a_return_notice() {
    let gw = Gateway::new();
    let exchange = unique("ex");
    gw.topology
        .declare_exchange(&ExchangeDefinition::new(&exchange).direct())
        .await
        .unwrap();
    let mut returns = gw.confirms.subscribe_returns();

    let handle = gw
        .publisher
        .send_with_confirmation(&exchange, "rk", b"payload-1", "unroutable")
        .await
        .unwrap();

    let notice = timeout(Duration::from_secs(5), returns.recv())
        .await
        .expect("return notice")
        .unwrap();
    assert!(notice.matches(&exchange, "rk", b"payload-1"));
    assert_eq!(handle.wait().await, ConfirmStatus::Returned);

    gw.topology.delete_exchange(&exchange).await.unwrap();
    gw.connection.close().await;
}

#[tokio::test]
#[ignore]
async fn receive_takes_one_message_then_reports_empty() {
    let gw = Gateway::new();
    let queue = unique("q");
    let exchange = unique("ex");
    gw.topology
        .declare_binding(&QueueBinding::new(&queue).exchange(&exchange).routing_key("rk"))
        .await
        .unwrap();

    gw.publish_confirmed(&exchange, "rk", b"hello").await;

    assert_eq!(gw.reader.receive(&queue).await, Ok(Some(b"hello".to_vec())));
    assert_eq!(gw.reader.receive(&queue).await, Ok(None));

    gw.topology.delete_queue(&queue).await.unwrap();
    gw.topology.delete_exchange(&exchange).await.unwrap();
    gw.connection.close().await;
}

#[tokio::test]
#[ignore]
async fn depth_matches_published_messages() {
    let gw = Gateway::new();
    let queue = unique("depth");
    let exchange = unique("depth-ex");
    gw.topology
        .declare_binding(&QueueBinding::new(&queue).exchange(&exchange).routing_key("rk"))
        .await
        .unwrap();

    for i in 0..3 {
        gw.publish_confirmed(&exchange, "rk", format!("m{}", i).as_bytes())
            .await;
    }

    assert_eq!(gw.reader.message_count(&queue).await, Ok(3));

    gw.topology.delete_queue(&queue).await.unwrap();
    gw.topology.delete_exchange(&exchange).await.unwrap();
    gw.connection.close().await;
}

#[tokio::test]
#[ignore]
async fn failed_deliveries_stay_unacknowledged() {
    let gw = Gateway::new();
    let exchange = unique("ex");
    let q1 = unique("q1");
    let q2 = unique("q2");
    for (queue, key) in [(&q1, "k1"), (&q2, "k2")] {
        gw.topology
            .declare_binding(&QueueBinding::new(queue).exchange(&exchange).routing_key(key))
            .await
            .unwrap();
    }

    let failed = Arc::new(AtomicUsize::new(0));
    let succeeded = Arc::new(AtomicUsize::new(0));
    let handlers = {
        let failed = failed.clone();
        let succeeded = succeeded.clone();
        HandlerRegistry::new()
            .register(
                &q1,
                handler_fn(move |_| {
                    failed.fetch_add(1, Ordering::SeqCst);
                    Box::pin(async { Err(HandlerError::new("always fails")) })
                }),
            )
            .register(
                &q2,
                handler_fn(move |_| {
                    succeeded.fetch_add(1, Ordering::SeqCst);
                    Box::pin(async { Ok(()) })
                }),
            )
    };

    let pool = ConsumerPool::new(
        gw.connection.clone(),
        handlers,
        ConsumerOptions::default(),
    );
    let queues = vec![q1.clone(), q2.clone()];
    pool.start(&queues, 2).await.unwrap();
    assert_eq!(pool.state(), PoolState::Running);

    gw.publish_confirmed(&exchange, "k1", b"fails").await;
    gw.publish_confirmed(&exchange, "k2", b"succeeds").await;

    eventually("both handlers", || {
        failed.load(Ordering::SeqCst) >= 1 && succeeded.load(Ordering::SeqCst) == 1
    })
    .await;

    pool.stop().await;
    assert_eq!(pool.state(), PoolState::Stopped);

    // closing the worker channels puts the unacknowledged delivery back
    assert_eq!(gw.reader.message_count(&q2).await, Ok(0));
    assert_eq!(gw.reader.message_count(&q1).await, Ok(1));

    gw.topology.delete_queue(&q1).await.unwrap();
    gw.topology.delete_queue(&q2).await.unwrap();
    gw.topology.delete_exchange(&exchange).await.unwrap();
    gw.connection.close().await;
}
