// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Publisher
//!
//! This module publishes messages to RabbitMQ exchanges, with or without tracking of the
//! broker confirmation.
//!
//! Every message is published as mandatory on the confirm channel, so an unroutable message
//! always raises a return notice. The target exchange is checked first with a passive declare
//! on a channel of its own: publishing to a missing exchange would close the shared confirm
//! channel after `basic.publish` already returned. The broker outcome is resolved on a background task and lands
//! in the `ConfirmRegistry`; callers are never blocked waiting for it.

use crate::{
    broker::{Broker, BrokerConfirm, OutboundMessage, PendingConfirm},
    confirms::{ConfirmHandle, ConfirmRegistry, ConfirmStatus},
    errors::PublishError,
    otel,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes without tracking. Returns once the broker accepted the frame for routing.
    async fn send(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), PublishError>;

    /// Publishes and tracks the broker outcome under `token`.
    ///
    /// The token is registered before the message is transmitted. The returned handle
    /// resolves with the outcome; the registry can also be polled with the token.
    async fn send_with_confirmation(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        token: &str,
    ) -> Result<ConfirmHandle, PublishError>;
}

/// RabbitMQ implementation of the Publisher trait.
pub struct RabbitMQPublisher {
    broker: Arc<dyn Broker>,
    registry: Arc<ConfirmRegistry>,
}

impl RabbitMQPublisher {
    pub fn new(broker: Arc<dyn Broker>, registry: Arc<ConfirmRegistry>) -> Arc<RabbitMQPublisher> {
        Arc::new(RabbitMQPublisher { broker, registry })
    }

    fn message(
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        token: Option<&str>,
    ) -> OutboundMessage {
        OutboundMessage {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            payload: payload.to_vec(),
            message_id: Uuid::new_v4().to_string(),
            correlation_id: token.map(str::to_owned),
            headers: otel::inject_current(),
        }
    }

    /// The default exchange (empty name) always exists.
    async fn ensure_exchange(&self, exchange: &str) -> Result<(), PublishError> {
        if exchange.is_empty() {
            return Ok(());
        }

        match self.broker.exchange_exists(exchange).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(exchange, "publishing to a missing exchange");
                Err(PublishError::Unroutable(exchange.to_owned()))
            }
            Err(fault) => {
                error!(error = fault.to_string(), exchange, "failure to look up the exchange");
                Err(PublishError::from_fault(exchange, fault))
            }
        }
    }

    async fn transmit(&self, msg: &OutboundMessage) -> Result<PendingConfirm, PublishError> {
        self.ensure_exchange(&msg.exchange).await?;

        self.broker.publish(msg).await.map_err(|fault| {
            error!(
                error = fault.to_string(),
                exchange = %msg.exchange,
                routing_key = %msg.routing_key,
                "error publishing message"
            );
            PublishError::from_fault(&msg.exchange, fault)
        })
    }

    /// Resolves the broker outcome in the background and records it.
    fn track(&self, token: Option<String>, pending: PendingConfirm) {
        let registry = self.registry.clone();

        tokio::spawn(async move {
            let status = match pending.await {
                Ok(BrokerConfirm::Ack) => ConfirmStatus::Ack,
                Ok(BrokerConfirm::Nack) => ConfirmStatus::Nack("rejected by the broker".to_owned()),
                Ok(BrokerConfirm::Returned(notice)) => {
                    registry.notify_return(notice);
                    ConfirmStatus::Returned
                }
                Err(fault) => ConfirmStatus::Nack(fault.to_string()),
            };

            match token {
                Some(token) => registry.settle(&token, status),
                None => debug!(?status, "untracked publish settled"),
            }
        });
    }
}

#[async_trait]
impl Publisher for RabbitMQPublisher {
    async fn send(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), PublishError> {
        let msg = Self::message(exchange, routing_key, payload, None);

        let pending = self.transmit(&msg).await?;
        self.track(None, pending);

        Ok(())
    }

    async fn send_with_confirmation(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        token: &str,
    ) -> Result<ConfirmHandle, PublishError> {
        let msg = Self::message(exchange, routing_key, payload, Some(token));
        let handle = self.registry.register(token);

        let pending = match self.transmit(&msg).await {
            Ok(pending) => pending,
            Err(err) => {
                self.registry.discard(token);
                return Err(err);
            }
        };

        debug!(token, exchange, routing_key, "tracking publish confirmation");
        self.track(Some(token.to_owned()), pending);

        Ok(handle)
    }
}
