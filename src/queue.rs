// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Definitions
//!
//! This module provides the definitions of queues and of queue-to-exchange bindings.
//! A queue may carry a Dead Letter Queue (DLQ): messages rejected by the consumer
//! without requeue are routed there by the broker.

use lapin::types::{AMQPValue, LongString, ShortString};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Constant for the header field used to specify a dead letter exchange
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Constant for the header field used to specify a dead letter routing key
pub const AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";

/// Definition of a queue with its configuration parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct QueueDefinition {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) durable: bool,
    #[serde(default, rename = "dlq")]
    pub(crate) with_dlq: bool,
}

impl QueueDefinition {
    /// Creates a new, non-durable queue definition with the given name.
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            durable: false,
            with_dlq: false,
        }
    }

    /// Makes the queue durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Sets the durability flag explicitly.
    pub fn durability(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// Adds a Dead Letter Queue named `<queue>-dlq`.
    pub fn with_dlq(mut self) -> Self {
        self.with_dlq = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    /// Name of the dead letter queue, if any.
    pub fn dlq_name(&self) -> Option<String> {
        self.with_dlq.then(|| format!("{}-dlq", self.name))
    }

    /// Definition of the dead letter queue, declared with the same durability.
    pub fn dlq(&self) -> Option<QueueDefinition> {
        self.dlq_name()
            .map(|name| QueueDefinition::new(&name).durability(self.durable))
    }

    /// Declaration arguments sent with `queue.declare`.
    ///
    /// Dead-lettering goes through the default exchange, routed by the DLQ name.
    pub fn arguments(&self) -> BTreeMap<ShortString, AMQPValue> {
        let mut args = BTreeMap::new();

        if let Some(dlq_name) = self.dlq_name() {
            args.insert(
                ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
                AMQPValue::LongString(LongString::from("")),
            );
            args.insert(
                ShortString::from(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
                AMQPValue::LongString(LongString::from(dlq_name)),
            );
        }

        args
    }
}

/// A binding between a queue and an exchange.
///
/// The triple (queue, exchange, routing key) identifies the binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct QueueBinding {
    #[serde(rename = "queue")]
    pub(crate) queue_name: String,
    #[serde(rename = "exchange")]
    pub(crate) exchange_name: String,
    #[serde(default)]
    pub(crate) routing_key: String,
}

impl QueueBinding {
    /// Creates a new queue binding for the given queue.
    ///
    /// The exchange name and routing key are empty until set.
    pub fn new(queue: &str) -> QueueBinding {
        QueueBinding {
            queue_name: queue.to_owned(),
            exchange_name: String::new(),
            routing_key: String::new(),
        }
    }

    /// Sets the exchange to bind the queue to.
    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange_name = exchange.to_owned();
        self
    }

    /// Sets the routing key (or topic pattern) of the binding.
    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn exchange_name(&self) -> &str {
        &self.exchange_name
    }

    pub fn key(&self) -> &str {
        &self.routing_key
    }
}
