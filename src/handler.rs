// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Consumer Handlers
//!
//! A handler is the business capability behind a queue: it processes one payload and reports
//! success or failure. The consumer acknowledges a delivery only when its handler succeeded.

use crate::errors::HandlerError;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use lapin::types::{AMQPValue, ShortString};
use opentelemetry::Context;
use std::{collections::BTreeMap, sync::Arc};
use tracing::{info, warn};

/// A message delivered to a handler.
#[derive(Debug, Clone, Default)]
pub struct ConsumerMessage {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub redelivered: bool,
    pub delivery_tag: u64,
    pub(crate) headers: BTreeMap<ShortString, AMQPValue>,
}

impl ConsumerMessage {
    pub fn new(queue: &str, payload: &[u8]) -> ConsumerMessage {
        ConsumerMessage {
            queue: queue.to_owned(),
            payload: payload.to_vec(),
            ..ConsumerMessage::default()
        }
    }

    /// The payload as text, with invalid UTF-8 replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[async_trait]
pub trait ConsumerHandler: Send + Sync {
    async fn exec(&self, ctx: &Context, msg: &ConsumerMessage) -> Result<(), HandlerError>;
}

/// Handler built from an async closure, see [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

/// Wraps a closure returning a boxed future into a handler.
///
/// ```ignore
/// let handler = handler_fn(|msg| Box::pin(async move {
///     println!("{}", msg.text());
///     Ok(())
/// }));
/// ```
pub fn handler_fn<F>(f: F) -> Arc<FnHandler<F>>
where
    F: Fn(ConsumerMessage) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync,
{
    Arc::new(FnHandler { f })
}

#[async_trait]
impl<F> ConsumerHandler for FnHandler<F>
where
    F: Fn(ConsumerMessage) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync,
{
    async fn exec(&self, _ctx: &Context, msg: &ConsumerMessage) -> Result<(), HandlerError> {
        (self.f)(msg.clone()).await
    }
}

/// Logs the payload and succeeds.
///
/// Used as the default handler: messages from queues without a registered handler are
/// observed and acknowledged instead of piling up.
#[derive(Debug, Default, Clone)]
pub struct LogHandler {
    unhandled: bool,
}

impl LogHandler {
    /// Handler for queues that have no business handler.
    pub fn unhandled() -> LogHandler {
        LogHandler { unhandled: true }
    }
}

#[async_trait]
impl ConsumerHandler for LogHandler {
    async fn exec(&self, _ctx: &Context, msg: &ConsumerMessage) -> Result<(), HandlerError> {
        if self.unhandled {
            warn!(queue = %msg.queue, "no handler registered for queue, acking");
        } else {
            info!(queue = %msg.queue, payload = %msg.text(), "message received");
        }

        Ok(())
    }
}
