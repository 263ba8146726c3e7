// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Concurrent Consumer Pool
//!
//! A fixed number of workers share the connection, each with its own channel. Every worker
//! subscribes to the whole queue set, so the broker spreads deliveries across workers and a
//! slow handler only holds back its own channel.
//!
//! Life cycle: `Stopped → Starting → Running → Stopping → Stopped`. `stop()` lets in-flight
//! handlers finish; a worker only looks at the shutdown signal between deliveries.
//!
//! A delivery left unsettled by a failed handler keeps its prefetch slot until the channel
//! closes. Once every slot of a worker is taken that way, the worker closes its channel (the
//! broker requeues the deliveries) and subscribes again.

use crate::{
    channel::{release, AmqpConnection, Backoff},
    configs::ConsumerConfigs,
    consumer::{consume, Acknowledger, FailurePolicy},
    dispatcher::HandlerRegistry,
    errors::ConsumeError,
    handler::ConsumerMessage,
};
use async_trait::async_trait;
use futures_util::{
    future::join_all,
    stream::{select_all, BoxStream, SelectAll},
    StreamExt,
};
use lapin::{
    message::Delivery,
    options::{BasicCancelOptions, BasicConsumeOptions, BasicQosOptions},
    types::FieldTable,
    Channel,
};
use opentelemetry::global::{self, BoxedTracer};
use std::sync::Arc;
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Per-worker subscription settings.
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    /// Unacknowledged deliveries allowed per worker channel
    pub prefetch: u16,
    pub failure_policy: FailurePolicy,
    /// Consumer tags are `<prefix>-<worker>-<queue>`
    pub tag_prefix: String,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        ConsumerOptions {
            prefetch: 10,
            failure_policy: FailurePolicy::default(),
            tag_prefix: "gateway".to_owned(),
        }
    }
}

impl From<&ConsumerConfigs> for ConsumerOptions {
    fn from(cfg: &ConsumerConfigs) -> Self {
        ConsumerOptions {
            prefetch: cfg.prefetch,
            failure_policy: cfg.failure_policy,
            ..ConsumerOptions::default()
        }
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

pub struct ConsumerPool {
    subscriber: Arc<dyn Subscriber>,
    handlers: Arc<HandlerRegistry>,
    options: ConsumerOptions,
    state: watch::Sender<PoolState>,
    running: Mutex<Option<Running>>,
}

impl ConsumerPool {
    pub fn new(
        connection: Arc<AmqpConnection>,
        handlers: HandlerRegistry,
        options: ConsumerOptions,
    ) -> Arc<ConsumerPool> {
        ConsumerPool::with_subscriber(connection, handlers, options)
    }

    pub(crate) fn with_subscriber(
        subscriber: Arc<dyn Subscriber>,
        handlers: HandlerRegistry,
        options: ConsumerOptions,
    ) -> Arc<ConsumerPool> {
        let (state, _) = watch::channel(PoolState::Stopped);

        Arc::new(ConsumerPool {
            subscriber,
            handlers: Arc::new(handlers),
            options,
            state,
            running: Mutex::new(None),
        })
    }

    pub fn state(&self) -> PoolState {
        *self.state.borrow()
    }

    /// Starts `workers` workers, each consuming every queue of `queues`.
    ///
    /// Returns once every worker is subscribed. If any subscription fails the workers already
    /// subscribed are torn down and the pool goes back to `Stopped`.
    pub async fn start(&self, queues: &[String], workers: usize) -> Result<(), ConsumeError> {
        let mut running = self.running.lock().await;

        let state = self.state();
        if state != PoolState::Stopped {
            return Err(ConsumeError::InvalidState(format!(
                "cannot start a pool in state {:?}",
                state
            )));
        }
        if workers == 0 {
            return Err(ConsumeError::InvalidState(
                "at least one worker is required".to_owned(),
            ));
        }
        if queues.is_empty() {
            return Err(ConsumeError::InvalidState("no queue to consume".to_owned()));
        }

        self.state.send_replace(PoolState::Starting);
        debug!(workers, ?queues, "starting consumer pool");

        let mut subscriptions = Vec::with_capacity(workers);
        for id in 0..workers {
            match self.subscriber.subscribe(id, queues, &self.options).await {
                Ok(subscription) => subscriptions.push(subscription),
                Err(err) => {
                    error!(error = err.to_string(), worker = id, "failure to start worker");
                    for mut subscription in subscriptions {
                        subscription.close().await;
                    }
                    self.state.send_replace(PoolState::Stopped);
                    return Err(err);
                }
            }
        }

        let (shutdown, _) = watch::channel(false);
        let handles = subscriptions
            .into_iter()
            .enumerate()
            .map(|(id, subscription)| {
                let worker = Worker {
                    id,
                    queues: queues.to_vec(),
                    subscriber: self.subscriber.clone(),
                    handlers: self.handlers.clone(),
                    options: self.options.clone(),
                    shutdown: shutdown.subscribe(),
                };
                tokio::spawn(worker.run(subscription))
            })
            .collect();

        *running = Some(Running {
            shutdown,
            workers: handles,
        });
        self.state.send_replace(PoolState::Running);
        info!(workers, ?queues, "consumer pool running");

        Ok(())
    }

    /// Stops the workers and waits for in-flight handlers. A stopped pool is left as is.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;

        let Some(current) = running.take() else {
            debug!("consumer pool already stopped");
            return;
        };

        self.state.send_replace(PoolState::Stopping);
        current.shutdown.send_replace(true);

        for joined in join_all(current.workers).await {
            if let Err(err) = joined {
                error!(error = err.to_string(), "consumer worker panicked");
            }
        }

        self.state.send_replace(PoolState::Stopped);
        info!("consumer pool stopped");
    }
}

/// One delivery handed to a worker, with the means to settle it.
pub(crate) struct Incoming {
    pub(crate) msg: ConsumerMessage,
    pub(crate) acker: Box<dyn Acknowledger>,
}

/// A worker channel and the merged deliveries of its consumers.
#[async_trait]
pub(crate) trait Subscription: Send {
    /// The next delivery, `None` once the channel or one of its consumers is gone.
    async fn next(&mut self) -> Option<Incoming>;

    /// Cancels the consumers and closes the channel. Unacknowledged deliveries go back to
    /// their queue.
    async fn close(&mut self);
}

/// Opens worker subscriptions.
#[async_trait]
pub(crate) trait Subscriber: Send + Sync {
    async fn subscribe(
        &self,
        worker: usize,
        queues: &[String],
        options: &ConsumerOptions,
    ) -> Result<Box<dyn Subscription>, ConsumeError>;

    /// Delays between failed re-subscriptions.
    fn backoff(&self) -> Backoff;
}

type Deliveries = SelectAll<BoxStream<'static, (String, Result<Delivery, lapin::Error>)>>;

struct AmqpSubscription {
    worker: usize,
    channel: Channel,
    tags: Vec<String>,
    deliveries: Deliveries,
}

#[async_trait]
impl Subscriber for AmqpConnection {
    async fn subscribe(
        &self,
        worker: usize,
        queues: &[String],
        options: &ConsumerOptions,
    ) -> Result<Box<dyn Subscription>, ConsumeError> {
        let channel = self.dedicated_channel().await?;

        if let Err(err) = channel
            .basic_qos(options.prefetch, BasicQosOptions { global: false })
            .await
        {
            error!(error = err.to_string(), worker, "failure to set prefetch");
            release(&channel, "subscription failed").await;
            return Err(ConsumeError::SubscribeFailed(queues.join(",")));
        }

        let mut streams = Vec::with_capacity(queues.len());
        let mut tags = Vec::with_capacity(queues.len());

        for queue in queues {
            let tag = format!("{}-{}-{}", options.tag_prefix, worker, queue);

            let consumer = match channel
                .basic_consume(
                    queue,
                    &tag,
                    BasicConsumeOptions {
                        no_local: false,
                        no_ack: false,
                        exclusive: false,
                        nowait: false,
                    },
                    FieldTable::default(),
                )
                .await
            {
                Err(err) => {
                    error!(error = err.to_string(), worker, queue = %queue, "failure to create the consumer");
                    release(&channel, "subscription failed").await;
                    return Err(ConsumeError::SubscribeFailed(queue.clone()));
                }
                Ok(c) => c,
            };

            let name = queue.clone();
            streams.push(consumer.map(move |delivery| (name.clone(), delivery)).boxed());
            tags.push(tag);
        }

        debug!(worker, "worker subscribed");

        Ok(Box::new(AmqpSubscription {
            worker,
            channel,
            tags,
            deliveries: select_all(streams),
        }))
    }

    fn backoff(&self) -> Backoff {
        Backoff::new(self.reconnect_policy())
    }
}

#[async_trait]
impl Subscription for AmqpSubscription {
    async fn next(&mut self) -> Option<Incoming> {
        match self.deliveries.next().await? {
            (queue, Ok(delivery)) => Some(Incoming {
                msg: ConsumerMessage::from_delivery(&queue, &delivery),
                acker: Box::new(delivery.acker),
            }),
            (queue, Err(err)) => {
                error!(error = err.to_string(), worker = self.worker, queue = %queue, "errors consume msg");
                None
            }
        }
    }

    async fn close(&mut self) {
        if !self.channel.status().connected() {
            return;
        }

        for tag in &self.tags {
            if let Err(err) = self
                .channel
                .basic_cancel(tag, BasicCancelOptions::default())
                .await
            {
                warn!(error = err.to_string(), worker = self.worker, tag = %tag, "failure to cancel consumer");
            }
        }

        release(&self.channel, "consumer stopped").await;
    }
}

enum Event {
    Shutdown,
    Delivery(Incoming),
    Lost,
}

struct Worker {
    id: usize,
    queues: Vec<String>,
    subscriber: Arc<dyn Subscriber>,
    handlers: Arc<HandlerRegistry>,
    options: ConsumerOptions,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self, mut subscription: Box<dyn Subscription>) {
        let tracer = global::tracer("amqp consumer");
        // deliveries of the current channel that were never settled
        let mut unsettled: u16 = 0;

        loop {
            let event = tokio::select! {
                biased;
                _ = self.shutdown.wait_for(|stop| *stop) => Event::Shutdown,
                next = subscription.next() => match next {
                    Some(incoming) => Event::Delivery(incoming),
                    None => Event::Lost,
                },
            };

            match event {
                Event::Shutdown => {
                    subscription.close().await;
                    debug!(worker = self.id, "consumer worker stopped");
                    return;
                }
                Event::Delivery(incoming) => {
                    if !self.process(&tracer, incoming).await {
                        unsettled = unsettled.saturating_add(1);
                    }
                    if self.options.prefetch == 0 || unsettled < self.options.prefetch {
                        continue;
                    }
                    info!(
                        worker = self.id,
                        unsettled, "prefetch window full of failed deliveries, recycling the channel"
                    );
                }
                Event::Lost => {
                    warn!(worker = self.id, queues = %self.queues.join(","), "consumer channel lost, re-subscribing");
                }
            }

            subscription.close().await;
            unsettled = 0;

            match self.resubscribe().await {
                Some(renewed) => subscription = renewed,
                None => return,
            }
        }
    }

    /// Runs the delivery through its handler. `false` when the delivery was left unsettled
    /// and still holds a prefetch slot.
    async fn process(&self, tracer: &BoxedTracer, incoming: Incoming) -> bool {
        let policy = self.options.failure_policy;

        match consume(
            tracer,
            &incoming.msg,
            incoming.acker.as_ref(),
            &self.handlers,
            policy,
        )
        .await
        {
            Ok(()) => true,
            Err(err) => {
                error!(error = err.to_string(), worker = self.id, "error consume msg");
                match err {
                    ConsumeError::HandlerFailed { .. } => policy == FailurePolicy::DeadLetter,
                    _ => false,
                }
            }
        }
    }

    /// Subscribes again with backoff. `None` when the pool was stopped meanwhile.
    async fn resubscribe(&mut self) -> Option<Box<dyn Subscription>> {
        let mut backoff = self.subscriber.backoff();

        loop {
            if *self.shutdown.borrow() {
                return None;
            }

            match self
                .subscriber
                .subscribe(self.id, &self.queues, &self.options)
                .await
            {
                Ok(subscription) => {
                    info!(worker = self.id, "consumer worker re-subscribed");
                    return Some(subscription);
                }
                Err(err) => {
                    warn!(error = err.to_string(), worker = self.id, "failure to re-subscribe");
                }
            }

            let delay = backoff.next_delay();
            tokio::select! {
                _ = self.shutdown.wait_for(|stop| *stop) => return None,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        configs::{RabbitMQConfigs, ReconnectConfigs},
        errors::{BrokerFault, ConnectionError, HandlerError},
        handler::handler_fn,
    };
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex as StdMutex,
        },
        time::Duration,
    };
    use tokio::{
        sync::{mpsc, Notify},
        time::{sleep, timeout},
    };

    /// Ordered record of what the fakes and handlers saw.
    #[derive(Default)]
    struct Journal(StdMutex<Vec<String>>);

    impl Journal {
        fn record(&self, entry: String) {
            self.0.lock().unwrap().push(entry);
        }

        fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }

        async fn until(&self, entry: &str) {
            for _ in 0..200 {
                if self.entries().iter().any(|e| e == entry) {
                    return;
                }
                sleep(Duration::from_millis(10)).await;
            }
            panic!("never saw {:?}, got {:?}", entry, self.entries());
        }
    }

    struct FakeAcker {
        tag: u64,
        journal: Arc<Journal>,
    }

    #[async_trait]
    impl Acknowledger for FakeAcker {
        async fn ack(&self) -> Result<(), BrokerFault> {
            self.journal.record(format!("ack {}", self.tag));
            Ok(())
        }

        async fn reject(&self, _requeue: bool) -> Result<(), BrokerFault> {
            self.journal.record(format!("reject {}", self.tag));
            Ok(())
        }
    }

    struct FakeSubscription {
        id: usize,
        deliveries: mpsc::UnboundedReceiver<ConsumerMessage>,
        journal: Arc<Journal>,
    }

    #[async_trait]
    impl Subscription for FakeSubscription {
        async fn next(&mut self) -> Option<Incoming> {
            let msg = self.deliveries.recv().await?;
            Some(Incoming {
                acker: Box::new(FakeAcker {
                    tag: msg.delivery_tag,
                    journal: self.journal.clone(),
                }),
                msg,
            })
        }

        async fn close(&mut self) {
            self.journal.record(format!("close {}", self.id));
        }
    }

    /// Hands out one prepared channel per subscription, then fails.
    struct FakeSubscriber {
        feeds: StdMutex<VecDeque<mpsc::UnboundedReceiver<ConsumerMessage>>>,
        opened: AtomicUsize,
        journal: Arc<Journal>,
        retry_delay_ms: u64,
    }

    impl FakeSubscriber {
        fn new(journal: &Arc<Journal>, channels: usize) -> (Arc<FakeSubscriber>, Vec<Feed>) {
            FakeSubscriber::retrying_after(journal, channels, 1)
        }

        fn retrying_after(
            journal: &Arc<Journal>,
            channels: usize,
            retry_delay_ms: u64,
        ) -> (Arc<FakeSubscriber>, Vec<Feed>) {
            let (senders, receivers): (Vec<_>, VecDeque<_>) =
                (0..channels).map(|_| mpsc::unbounded_channel()).unzip();
            let subscriber = FakeSubscriber {
                feeds: StdMutex::new(receivers),
                opened: AtomicUsize::new(0),
                journal: journal.clone(),
                retry_delay_ms,
            };

            (Arc::new(subscriber), senders.into_iter().map(Feed).collect())
        }
    }

    #[async_trait]
    impl Subscriber for FakeSubscriber {
        async fn subscribe(
            &self,
            _worker: usize,
            _queues: &[String],
            _options: &ConsumerOptions,
        ) -> Result<Box<dyn Subscription>, ConsumeError> {
            let Some(deliveries) = self.feeds.lock().unwrap().pop_front() else {
                self.journal.record("subscribe failed".to_owned());
                return Err(ConsumeError::SubscribeFailed("q".to_owned()));
            };

            let id = self.opened.fetch_add(1, Ordering::SeqCst);
            self.journal.record(format!("subscribe {}", id));

            Ok(Box::new(FakeSubscription {
                id,
                deliveries,
                journal: self.journal.clone(),
            }))
        }

        fn backoff(&self) -> Backoff {
            Backoff::new(&ReconnectConfigs {
                initial_delay_ms: self.retry_delay_ms,
                max_delay_ms: self.retry_delay_ms,
                multiplier: 1.0,
                max_attempts: 0,
            })
        }
    }

    /// The broker side of one fake channel.
    struct Feed(mpsc::UnboundedSender<ConsumerMessage>);

    impl Feed {
        fn deliver(&self, tag: u64) {
            let mut msg = ConsumerMessage::new("q", b"payload");
            msg.delivery_tag = tag;
            self.0.send(msg).unwrap();
        }
    }

    fn recording_handler(journal: &Arc<Journal>, fails: bool) -> HandlerRegistry {
        let journal = journal.clone();
        HandlerRegistry::new().register(
            "q",
            handler_fn(move |msg| {
                let journal = journal.clone();
                Box::pin(async move {
                    if fails {
                        journal.record(format!("failed {}", msg.delivery_tag));
                        return Err(HandlerError::new("always fails"));
                    }
                    journal.record(format!("handled {}", msg.delivery_tag));
                    Ok(())
                })
            }),
        )
    }

    fn queue() -> Vec<String> {
        vec!["q".to_owned()]
    }

    fn unreachable_pool() -> Arc<ConsumerPool> {
        let cfg = RabbitMQConfigs {
            host: "127.0.0.1".to_owned(),
            port: 1,
            reconnect: ReconnectConfigs {
                initial_delay_ms: 1,
                max_delay_ms: 1,
                multiplier: 1.0,
                max_attempts: 1,
            },
            ..RabbitMQConfigs::default()
        };

        ConsumerPool::new(
            AmqpConnection::new(&cfg, "pool tests"),
            HandlerRegistry::new(),
            ConsumerOptions::default(),
        )
    }

    fn queues() -> Vec<String> {
        vec!["queue1".to_owned(), "queue2".to_owned()]
    }

    #[tokio::test]
    async fn stopping_a_stopped_pool_is_a_no_op() {
        let pool = unreachable_pool();

        pool.stop().await;
        pool.stop().await;

        assert_eq!(pool.state(), PoolState::Stopped);
    }

    #[tokio::test]
    async fn start_rejects_an_empty_pool() {
        let pool = unreachable_pool();

        assert!(matches!(
            pool.start(&queues(), 0).await,
            Err(ConsumeError::InvalidState(_))
        ));
        assert!(matches!(
            pool.start(&[], 4).await,
            Err(ConsumeError::InvalidState(_))
        ));
        assert_eq!(pool.state(), PoolState::Stopped);
    }

    #[tokio::test]
    async fn failed_start_goes_back_to_stopped() {
        let pool = unreachable_pool();

        let result = pool.start(&queues(), 2).await;

        assert!(matches!(
            result,
            Err(ConsumeError::Connection(ConnectionError::Unreachable(_)))
        ));
        assert_eq!(pool.state(), PoolState::Stopped);
    }

    #[tokio::test]
    async fn failed_start_closes_the_workers_already_subscribed() {
        let journal = Arc::new(Journal::default());
        let (subscriber, _feeds) = FakeSubscriber::new(&journal, 1);
        let pool = ConsumerPool::with_subscriber(
            subscriber,
            HandlerRegistry::new(),
            ConsumerOptions::default(),
        );

        let result = pool.start(&queue(), 2).await;

        assert!(matches!(result, Err(ConsumeError::SubscribeFailed(_))));
        assert_eq!(
            journal.entries(),
            vec!["subscribe 0", "subscribe failed", "close 0"]
        );
        assert_eq!(pool.state(), PoolState::Stopped);
    }

    #[tokio::test]
    async fn stop_waits_for_the_in_flight_handler() {
        let journal = Arc::new(Journal::default());
        let (subscriber, feeds) = FakeSubscriber::new(&journal, 1);
        let started = Arc::new(Notify::new());
        let handlers = {
            let journal = journal.clone();
            let started = started.clone();
            HandlerRegistry::new().register(
                "q",
                handler_fn(move |msg| {
                    let journal = journal.clone();
                    let started = started.clone();
                    Box::pin(async move {
                        started.notify_one();
                        sleep(Duration::from_millis(100)).await;
                        journal.record(format!("handled {}", msg.delivery_tag));
                        Ok(())
                    })
                }),
            )
        };
        let pool =
            ConsumerPool::with_subscriber(subscriber, handlers, ConsumerOptions::default());
        pool.start(&queue(), 1).await.unwrap();
        assert_eq!(pool.state(), PoolState::Running);

        feeds[0].deliver(1);
        started.notified().await;
        pool.stop().await;

        assert_eq!(
            journal.entries(),
            vec!["subscribe 0", "handled 1", "ack 1", "close 0"]
        );
        assert_eq!(pool.state(), PoolState::Stopped);
    }

    #[tokio::test]
    async fn lost_channel_is_subscribed_again() {
        let journal = Arc::new(Journal::default());
        let (subscriber, mut feeds) = FakeSubscriber::new(&journal, 2);
        let pool = ConsumerPool::with_subscriber(
            subscriber,
            recording_handler(&journal, false),
            ConsumerOptions::default(),
        );
        pool.start(&queue(), 1).await.unwrap();

        let second = feeds.pop().unwrap();
        drop(feeds);
        second.deliver(7);
        journal.until("ack 7").await;
        pool.stop().await;

        assert_eq!(
            journal.entries(),
            vec![
                "subscribe 0",
                "close 0",
                "subscribe 1",
                "handled 7",
                "ack 7",
                "close 1"
            ]
        );
    }

    #[tokio::test]
    async fn stop_interrupts_the_resubscribe_backoff() {
        let journal = Arc::new(Journal::default());
        let (subscriber, feeds) = FakeSubscriber::retrying_after(&journal, 1, 60_000);
        let pool = ConsumerPool::with_subscriber(
            subscriber,
            HandlerRegistry::new(),
            ConsumerOptions::default(),
        );
        pool.start(&queue(), 1).await.unwrap();

        drop(feeds);
        journal.until("subscribe failed").await;
        timeout(Duration::from_secs(1), pool.stop())
            .await
            .expect("stop returns while the worker waits to re-subscribe");

        assert_eq!(pool.state(), PoolState::Stopped);
        assert_eq!(
            journal.entries(),
            vec!["subscribe 0", "close 0", "subscribe failed"]
        );
    }

    #[tokio::test]
    async fn pending_failures_filling_the_prefetch_window_recycle_the_channel() {
        let journal = Arc::new(Journal::default());
        let (subscriber, feeds) = FakeSubscriber::new(&journal, 2);
        let options = ConsumerOptions {
            prefetch: 2,
            failure_policy: FailurePolicy::LeavePending,
            ..ConsumerOptions::default()
        };
        let pool =
            ConsumerPool::with_subscriber(subscriber, recording_handler(&journal, true), options);
        pool.start(&queue(), 1).await.unwrap();

        feeds[0].deliver(1);
        feeds[0].deliver(2);
        journal.until("subscribe 1").await;
        pool.stop().await;

        assert_eq!(
            journal.entries(),
            vec![
                "subscribe 0",
                "failed 1",
                "failed 2",
                "close 0",
                "subscribe 1",
                "close 1"
            ]
        );
    }

    #[tokio::test]
    async fn dead_lettered_failures_keep_the_channel() {
        let journal = Arc::new(Journal::default());
        let (subscriber, feeds) = FakeSubscriber::new(&journal, 2);
        let options = ConsumerOptions {
            prefetch: 1,
            failure_policy: FailurePolicy::DeadLetter,
            ..ConsumerOptions::default()
        };
        let pool =
            ConsumerPool::with_subscriber(subscriber, recording_handler(&journal, true), options);
        pool.start(&queue(), 1).await.unwrap();

        feeds[0].deliver(1);
        feeds[0].deliver(2);
        journal.until("reject 2").await;
        pool.stop().await;

        assert_eq!(
            journal.entries(),
            vec![
                "subscribe 0",
                "failed 1",
                "reject 1",
                "failed 2",
                "reject 2",
                "close 0"
            ]
        );
    }

    #[tokio::test]
    async fn worker_survives_a_panicking_handler() {
        let journal = Arc::new(Journal::default());
        let (subscriber, feeds) = FakeSubscriber::new(&journal, 1);
        let handlers = {
            let journal = journal.clone();
            HandlerRegistry::new().register(
                "q",
                handler_fn(move |msg| {
                    if msg.delivery_tag == 1 {
                        panic!("corrupt payload");
                    }
                    let journal = journal.clone();
                    Box::pin(async move {
                        journal.record(format!("handled {}", msg.delivery_tag));
                        Ok(())
                    })
                }),
            )
        };
        let pool =
            ConsumerPool::with_subscriber(subscriber, handlers, ConsumerOptions::default());
        pool.start(&queue(), 1).await.unwrap();

        feeds[0].deliver(1);
        feeds[0].deliver(2);
        journal.until("ack 2").await;
        pool.stop().await;

        assert_eq!(
            journal.entries(),
            vec!["subscribe 0", "handled 2", "ack 2", "close 0"]
        );
    }

    #[test]
    fn options_follow_the_consumer_configuration() {
        let cfg = ConsumerConfigs {
            prefetch: 1,
            failure_policy: FailurePolicy::DeadLetter,
            ..ConsumerConfigs::default()
        };

        let options = ConsumerOptions::from(&cfg);

        assert_eq!(options.prefetch, 1);
        assert_eq!(options.failure_policy, FailurePolicy::DeadLetter);
        assert_eq!(options.tag_prefix, "gateway");
    }
}
