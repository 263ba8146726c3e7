// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Pull-Style Queue Reads
//!
//! Single-message reads and depth queries. Depth values are a point-in-time estimate: other
//! consumers may drain or fill the queue right after the broker answered.

use crate::{broker::Broker, errors::ReadError};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error};

#[cfg(test)]
use mockall::automock;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait QueueReader: Send + Sync {
    /// Takes one message off the queue, `None` when it is empty. Never waits.
    async fn receive(&self, queue: &str) -> Result<Option<Vec<u8>>, ReadError>;

    async fn message_count(&self, queue: &str) -> Result<u32, ReadError>;

    async fn has_messages(&self, queue: &str) -> Result<bool, ReadError>;
}

pub struct AmqpQueueReader {
    broker: Arc<dyn Broker>,
}

impl AmqpQueueReader {
    pub fn new(broker: Arc<dyn Broker>) -> Arc<AmqpQueueReader> {
        Arc::new(AmqpQueueReader { broker })
    }
}

#[async_trait]
impl QueueReader for AmqpQueueReader {
    async fn receive(&self, queue: &str) -> Result<Option<Vec<u8>>, ReadError> {
        match self.broker.get(queue).await {
            Ok(payload) => {
                debug!(queue, empty = payload.is_none(), "basic.get");
                Ok(payload)
            }
            Err(fault) => {
                error!(error = fault.to_string(), queue, "failure to read queue");
                Err(ReadError::from_fault(queue, fault))
            }
        }
    }

    async fn message_count(&self, queue: &str) -> Result<u32, ReadError> {
        self.broker.queue_depth(queue).await.map_err(|fault| {
            error!(error = fault.to_string(), queue, "failure to query queue depth");
            ReadError::from_fault(queue, fault)
        })
    }

    async fn has_messages(&self, queue: &str) -> Result<bool, ReadError> {
        Ok(self.message_count(queue).await? > 0)
    }
}
