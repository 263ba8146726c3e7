// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Operations
//!
//! The `Broker` trait is the seam between the gateway logic (topology, publisher, reader) and
//! the AMQP client: one method per broker round-trip, with failures classified as
//! `BrokerFault`. `AmqpBroker` implements it with `lapin` on top of the connection manager.

use crate::{
    channel::{release, AmqpConnection},
    confirms::ReturnNotice,
    errors::BrokerFault,
    exchange::{ExchangeDefinition, ExchangeKind},
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use lapin::{
    message::BasicReturnMessage,
    options::{
        BasicGetOptions, BasicPublishOptions, ExchangeDeclareOptions, ExchangeDeleteOptions,
        QueueBindOptions, QueueDeclareOptions, QueueDeleteOptions,
    },
    publisher_confirm::Confirmation,
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties, Channel,
};
use std::{collections::BTreeMap, future::Future, sync::Arc};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

/// Default content type of published payloads
pub const OCTET_STREAM_CONTENT_TYPE: &str = "application/octet-stream";

/// A message ready to be published.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub message_id: String,
    pub correlation_id: Option<String>,
    pub headers: BTreeMap<ShortString, AMQPValue>,
}

/// Broker outcome of one publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerConfirm {
    Ack,
    Nack,
    /// The message was unroutable and sent back with `basic.return`
    Returned(ReturnNotice),
}

/// Resolves once the broker confirmed (or returned) a published message.
pub type PendingConfirm = BoxFuture<'static, Result<BrokerConfirm, BrokerFault>>;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Broker: Send + Sync {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), BrokerFault>;

    /// Passive declare: `Ok(false)` when the exchange does not exist.
    async fn exchange_exists(&self, name: &str) -> Result<bool, BrokerFault>;

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), BrokerFault>;

    /// Passive declare returning the number of ready messages.
    async fn queue_depth(&self, name: &str) -> Result<u32, BrokerFault>;

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), BrokerFault>;

    async fn unbind_queue(&self, binding: &QueueBinding) -> Result<(), BrokerFault>;

    /// Deletes the queue only when it has no consumers.
    async fn delete_queue(&self, name: &str) -> Result<(), BrokerFault>;

    async fn delete_exchange(&self, name: &str) -> Result<(), BrokerFault>;

    /// Publishes a mandatory message on the confirm channel. Returns once the frame was
    /// accepted; the returned future resolves with the broker confirmation.
    async fn publish(&self, msg: &OutboundMessage) -> Result<PendingConfirm, BrokerFault>;

    /// Non-blocking `basic.get` with auto-ack.
    async fn get(&self, queue: &str) -> Result<Option<Vec<u8>>, BrokerFault>;
}

/// `lapin` implementation of the broker operations.
pub struct AmqpBroker {
    connection: Arc<AmqpConnection>,
}

impl AmqpBroker {
    pub fn new(connection: Arc<AmqpConnection>) -> Arc<AmqpBroker> {
        Arc::new(AmqpBroker { connection })
    }

    /// Runs one administrative round-trip on a channel of its own, closed afterwards.
    ///
    /// A soft error closes the channel it happened on and fails every other RPC waiting on
    /// that channel, so concurrent callers must never share one.
    async fn round_trip<T, F, Fut>(&self, op: F) -> Result<T, BrokerFault>
    where
        F: FnOnce(Channel) -> Fut,
        Fut: Future<Output = Result<T, lapin::Error>>,
    {
        let channel = self.connection.dedicated_channel().await?;
        let result = op(channel.clone()).await.map_err(BrokerFault::from);
        release(&channel, "operation done").await;
        result
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), BrokerFault> {
        self.round_trip(|channel| async move {
            channel
                .exchange_declare(
                    &def.name,
                    def.kind.into(),
                    ExchangeDeclareOptions {
                        durable: def.durable,
                        ..ExchangeDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await
        })
        .await
    }

    async fn exchange_exists(&self, name: &str) -> Result<bool, BrokerFault> {
        let lookup = self
            .round_trip(|channel| async move {
                channel
                    .exchange_declare(
                        name,
                        ExchangeKind::Direct.into(),
                        ExchangeDeclareOptions {
                            passive: true,
                            ..ExchangeDeclareOptions::default()
                        },
                        FieldTable::default(),
                    )
                    .await
            })
            .await;

        match lookup {
            Ok(_) => Ok(true),
            Err(BrokerFault::NotFound(_)) => Ok(false),
            Err(fault) => Err(fault),
        }
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), BrokerFault> {
        self.round_trip(|channel| async move {
            channel
                .queue_declare(
                    &def.name,
                    QueueDeclareOptions {
                        durable: def.durable,
                        ..QueueDeclareOptions::default()
                    },
                    FieldTable::from(def.arguments()),
                )
                .await
                .map(|_| ())
        })
        .await
    }

    async fn queue_depth(&self, name: &str) -> Result<u32, BrokerFault> {
        self.round_trip(|channel| async move {
            channel
                .queue_declare(
                    name,
                    QueueDeclareOptions {
                        passive: true,
                        ..QueueDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map(|queue| queue.message_count())
        })
        .await
    }

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), BrokerFault> {
        self.round_trip(|channel| async move {
            channel
                .queue_bind(
                    &binding.queue_name,
                    &binding.exchange_name,
                    &binding.routing_key,
                    QueueBindOptions { nowait: false },
                    FieldTable::default(),
                )
                .await
        })
        .await
    }

    async fn unbind_queue(&self, binding: &QueueBinding) -> Result<(), BrokerFault> {
        self.round_trip(|channel| async move {
            channel
                .queue_unbind(
                    &binding.queue_name,
                    &binding.exchange_name,
                    &binding.routing_key,
                    FieldTable::default(),
                )
                .await
        })
        .await
    }

    async fn delete_queue(&self, name: &str) -> Result<(), BrokerFault> {
        self.round_trip(|channel| async move {
            channel
                .queue_delete(
                    name,
                    QueueDeleteOptions {
                        if_unused: true,
                        if_empty: false,
                        nowait: false,
                    },
                )
                .await
                .map(|_| ())
        })
        .await
    }

    async fn delete_exchange(&self, name: &str) -> Result<(), BrokerFault> {
        self.round_trip(|channel| async move {
            channel
                .exchange_delete(
                    name,
                    ExchangeDeleteOptions {
                        if_unused: false,
                        nowait: false,
                    },
                )
                .await
        })
        .await
    }

    async fn publish(&self, msg: &OutboundMessage) -> Result<PendingConfirm, BrokerFault> {
        let channel = self.connection.confirm_channel().await?;

        let mut properties = BasicProperties::default()
            .with_content_type(ShortString::from(OCTET_STREAM_CONTENT_TYPE))
            .with_message_id(ShortString::from(msg.message_id.clone()))
            .with_headers(FieldTable::from(msg.headers.clone()));

        if let Some(correlation_id) = &msg.correlation_id {
            properties = properties.with_correlation_id(ShortString::from(correlation_id.clone()));
        }

        let confirm = channel
            .basic_publish(
                &msg.exchange,
                &msg.routing_key,
                BasicPublishOptions {
                    mandatory: true,
                    immediate: false,
                },
                &msg.payload,
                properties,
            )
            .await
            .map_err(BrokerFault::from)?;

        debug!(
            exchange = %msg.exchange,
            routing_key = %msg.routing_key,
            "message accepted by the broker"
        );

        Ok(Box::pin(async move {
            match confirm.await.map_err(BrokerFault::from)? {
                Confirmation::Ack(Some(returned)) | Confirmation::Nack(Some(returned)) => {
                    Ok(BrokerConfirm::Returned(return_notice(*returned)))
                }
                Confirmation::Ack(None) | Confirmation::NotRequested => Ok(BrokerConfirm::Ack),
                Confirmation::Nack(None) => Ok(BrokerConfirm::Nack),
            }
        }))
    }

    async fn get(&self, queue: &str) -> Result<Option<Vec<u8>>, BrokerFault> {
        self.round_trip(|channel| async move {
            channel
                .basic_get(queue, BasicGetOptions { no_ack: true })
                .await
                .map(|message| message.map(|m| m.delivery.data.clone()))
        })
        .await
    }
}

fn return_notice(returned: BasicReturnMessage) -> ReturnNotice {
    ReturnNotice {
        reply_code: returned.reply_code,
        reply_text: returned.reply_text.as_str().to_owned(),
        exchange: returned.delivery.exchange.as_str().to_owned(),
        routing_key: returned.delivery.routing_key.as_str().to_owned(),
        payload: returned.delivery.data.clone(),
    }
}
