// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Consumption
//!
//! This module processes one delivery: it routes the message to the handler of its queue and
//! settles the delivery with the broker according to the outcome.
//!
//! - handler success: the delivery is acknowledged, alone (`multiple = false`), so deliveries
//!   other workers are still processing are never acknowledged by accident
//! - handler failure: the delivery is never acknowledged. Depending on the `FailurePolicy` it
//!   is either left pending (the broker redelivers it once the channel closes) or rejected
//!   without requeue (the broker dead-letters it when the queue has a DLQ)
//! - handler panic: treated as a handler failure, the worker keeps running
//! - queue without handler: the default handler runs, the delivery is acknowledged

use crate::{
    dispatcher::HandlerRegistry,
    errors::{BrokerFault, ConsumeError, HandlerError},
    handler::ConsumerMessage,
    otel,
};
use async_trait::async_trait;
use futures_util::FutureExt;
use lapin::{
    acker::Acker,
    message::Delivery,
    options::{BasicAckOptions, BasicNackOptions},
};
use opentelemetry::{
    global::BoxedTracer,
    trace::{Span, Status},
};
use serde::Deserialize;
use std::{any::Any, borrow::Cow, panic::AssertUnwindSafe};
use tracing::{debug, error, warn};

#[cfg(test)]
use mockall::automock;

/// What happens to a delivery whose handler failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Neither ack nor nack; the broker redelivers the message once the channel closes
    #[default]
    LeavePending,
    /// `basic.nack` without requeue; the broker routes the message to the queue's DLQ
    DeadLetter,
}

/// Settles a single delivery with the broker.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<(), BrokerFault>;

    async fn reject(&self, requeue: bool) -> Result<(), BrokerFault>;
}

#[async_trait]
impl Acknowledger for Acker {
    async fn ack(&self) -> Result<(), BrokerFault> {
        Acker::ack(self, BasicAckOptions { multiple: false })
            .await
            .map_err(BrokerFault::from)
    }

    async fn reject(&self, requeue: bool) -> Result<(), BrokerFault> {
        Acker::nack(
            self,
            BasicNackOptions {
                multiple: false,
                requeue,
            },
        )
        .await
        .map_err(BrokerFault::from)
    }
}

impl ConsumerMessage {
    pub(crate) fn from_delivery(queue: &str, delivery: &Delivery) -> ConsumerMessage {
        ConsumerMessage {
            queue: queue.to_owned(),
            exchange: delivery.exchange.as_str().to_owned(),
            routing_key: delivery.routing_key.as_str().to_owned(),
            payload: delivery.data.clone(),
            redelivered: delivery.redelivered,
            delivery_tag: delivery.delivery_tag,
            headers: delivery
                .properties
                .headers()
                .as_ref()
                .map(|table| table.inner().clone())
                .unwrap_or_default(),
        }
    }
}

/// Consumes one message.
///
/// A handler failure is reported as
/// `ConsumeError::HandlerFailed` after the failure policy was applied; the caller logs it and
/// moves on to the next delivery.
pub(crate) async fn consume(
    tracer: &BoxedTracer,
    msg: &ConsumerMessage,
    acker: &dyn Acknowledger,
    handlers: &HandlerRegistry,
    policy: FailurePolicy,
) -> Result<(), ConsumeError> {
    let (ctx, mut span) = otel::new_span(&msg.headers, tracer, &msg.queue);

    debug!(
        queue = %msg.queue,
        exchange = %msg.exchange,
        routing_key = %msg.routing_key,
        redelivered = msg.redelivered,
        "received message"
    );

    let (handler, registered) = handlers.route(&msg.queue);
    if !registered {
        warn!(queue = %msg.queue, "unsupported queue, message will be acked");
    }

    let result = AssertUnwindSafe(handler.exec(&ctx, msg))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(HandlerError::new(panic_reason(panic.as_ref()))));

    let Err(err) = result else {
        debug!("message successfully processed");
        return match acker.ack().await {
            Err(e) => {
                error!(error = e.to_string(), "error whiling ack msg");
                span.record_error(&e);
                span.set_status(Status::Error {
                    description: Cow::from("error to ack msg"),
                });
                Err(ConsumeError::AckFailed)
            }
            _ => {
                span.set_status(Status::Ok);
                Ok(())
            }
        };
    };

    span.record_error(&err);
    span.set_status(Status::Error {
        description: Cow::from(err.to_string()),
    });

    let failed = ConsumeError::HandlerFailed {
        queue: msg.queue.clone(),
        reason: err.to_string(),
    };

    match policy {
        FailurePolicy::LeavePending => {
            warn!(
                queue = %msg.queue,
                delivery_tag = msg.delivery_tag,
                "handler failed, message left unacknowledged"
            );
        }
        FailurePolicy::DeadLetter => {
            warn!(
                queue = %msg.queue,
                delivery_tag = msg.delivery_tag,
                "handler failed, rejecting message without requeue"
            );
            if let Err(e) = acker.reject(false).await {
                error!(error = e.to_string(), "error whiling nack msg");
                return Err(ConsumeError::NackFailed);
            }
        }
    }

    Err(failed)
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_owned());

    format!("handler panicked: {}", detail)
}
