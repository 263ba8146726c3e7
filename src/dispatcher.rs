// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Per-Queue Handler Dispatch
//!
//! Deliveries are routed to business handlers by the name of the queue they came from.
//! Queues without a registered handler fall back to the default handler, which logs the
//! message and succeeds.

use crate::handler::{ConsumerHandler, LogHandler};
use std::{collections::HashMap, sync::Arc};

#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ConsumerHandler>>,
    default: Arc<dyn ConsumerHandler>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        HandlerRegistry::new()
    }
}

impl HandlerRegistry {
    pub fn new() -> HandlerRegistry {
        HandlerRegistry {
            handlers: HashMap::default(),
            default: Arc::new(LogHandler::unhandled()),
        }
    }

    /// Registers the handler of a queue, replacing any previous one.
    pub fn register(mut self, queue: &str, handler: Arc<dyn ConsumerHandler>) -> Self {
        self.handlers.insert(queue.to_owned(), handler);
        self
    }

    /// The handler for a queue, and whether it was explicitly registered.
    pub fn route(&self, queue: &str) -> (Arc<dyn ConsumerHandler>, bool) {
        match self.handlers.get(queue) {
            Some(handler) => (handler.clone(), true),
            None => (self.default.clone(), false),
        }
    }
}
