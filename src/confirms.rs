// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Publisher Confirm and Return Registry
//!
//! The broker reports the outcome of a publish asynchronously: a confirmation (ack / nack) for
//! messages published on a confirm channel, and a return notice for mandatory messages that
//! matched no queue. This registry is where those outcomes land.
//!
//! Confirmations are demultiplexed purely by the caller-chosen correlation token. A token is
//! registered *before* the message is transmitted, so a confirmation can never arrive for a
//! token the registry does not know yet. Reusing a token while its previous publish is still
//! pending is a caller error: the new registration replaces the old one.
//!
//! Return notices carry no token (the message never reached a queue); they are broadcast to
//! every subscriber, which match them by exchange, routing key and payload.

use serde::Serialize;
use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

const DEFAULT_SETTLED_CAPACITY: usize = 1024;
const DEFAULT_RETURNS_CAPACITY: usize = 128;

/// Outcome of a tracked publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ConfirmStatus {
    /// Transmitted, no outcome yet
    Pending,
    /// The broker took responsibility for the message
    Ack,
    /// The broker refused the message
    Nack(String),
    /// The message matched no queue; a return notice was fired instead of a confirmation
    Returned,
}

impl ConfirmStatus {
    pub fn is_settled(&self) -> bool {
        !matches!(self, ConfirmStatus::Pending)
    }
}

/// A message sent back by the broker because it was unroutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnNotice {
    pub reply_code: u16,
    pub reply_text: String,
    pub exchange: String,
    pub routing_key: String,
    #[serde(skip)]
    pub payload: Vec<u8>,
}

impl ReturnNotice {
    /// Returns carry no token, a publisher recognizes its message by identity.
    pub fn matches(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> bool {
        self.exchange == exchange && self.routing_key == routing_key && self.payload == payload
    }
}

/// Awaitable view on the outcome of one `send_with_confirmation`.
#[derive(Debug, Clone)]
pub struct ConfirmHandle {
    token: String,
    receiver: watch::Receiver<ConfirmStatus>,
}

impl ConfirmHandle {
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Current status, without waiting.
    pub fn status(&self) -> ConfirmStatus {
        self.receiver.borrow().clone()
    }

    /// Waits until the broker outcome is known.
    ///
    /// If the registration was dropped (token reused, registry gone) the last
    /// observed status is returned, which may still be `Pending`.
    pub async fn wait(mut self) -> ConfirmStatus {
        if let Ok(status) = self.receiver.wait_for(ConfirmStatus::is_settled).await {
            return status.clone();
        }

        self.receiver.borrow().clone()
    }
}

#[derive(Default)]
struct Slots {
    senders: HashMap<String, watch::Sender<ConfirmStatus>>,
    settled: VecDeque<String>,
}

/// The concurrency-safe token → outcome registry, plus the return-notice channel.
pub struct ConfirmRegistry {
    slots: Mutex<Slots>,
    settled_capacity: usize,
    returns: broadcast::Sender<ReturnNotice>,
    recent_returns: Mutex<VecDeque<ReturnNotice>>,
    returns_capacity: usize,
}

impl Default for ConfirmRegistry {
    fn default() -> Self {
        ConfirmRegistry::new(DEFAULT_SETTLED_CAPACITY, DEFAULT_RETURNS_CAPACITY)
    }
}

impl ConfirmRegistry {
    /// `settled_capacity` bounds how many settled outcomes stay pollable,
    /// `returns_capacity` how many return notices are kept.
    pub fn new(settled_capacity: usize, returns_capacity: usize) -> ConfirmRegistry {
        let (returns, _) = broadcast::channel(returns_capacity.max(1));

        ConfirmRegistry {
            slots: Mutex::new(Slots::default()),
            settled_capacity: settled_capacity.max(1),
            returns,
            recent_returns: Mutex::new(VecDeque::new()),
            returns_capacity: returns_capacity.max(1),
        }
    }

    /// Registers a token before its message is transmitted.
    pub fn register(&self, token: &str) -> ConfirmHandle {
        let (sender, receiver) = watch::channel(ConfirmStatus::Pending);
        let mut slots = self.lock_slots();

        if let Some(previous) = slots.senders.insert(token.to_owned(), sender) {
            if !previous.borrow().is_settled() {
                warn!(token, "correlation token reused while still pending");
            }
            slots.settled.retain(|t| t != token);
        }

        ConfirmHandle {
            token: token.to_owned(),
            receiver,
        }
    }

    /// Records the broker outcome of a token. Unknown tokens are ignored.
    pub fn settle(&self, token: &str, status: ConfirmStatus) {
        let mut slots = self.lock_slots();

        let Some(sender) = slots.senders.get(token) else {
            debug!(token, "confirmation for an unknown token");
            return;
        };

        if sender.borrow().is_settled() {
            return;
        }

        debug!(token, ?status, "publish settled");
        sender.send_replace(status);
        slots.settled.push_back(token.to_owned());

        while slots.settled.len() > self.settled_capacity {
            if let Some(evicted) = slots.settled.pop_front() {
                slots.senders.remove(&evicted);
            }
        }
    }

    /// Drops a registration whose publish failed before reaching the broker.
    pub fn discard(&self, token: &str) {
        let mut slots = self.lock_slots();
        slots.senders.remove(token);
        slots.settled.retain(|t| t != token);
    }

    /// Polls the outcome of a token. `None` when the token is unknown or was evicted.
    pub fn status(&self, token: &str) -> Option<ConfirmStatus> {
        self.lock_slots()
            .senders
            .get(token)
            .map(|sender| sender.borrow().clone())
    }

    /// Number of registered tokens still waiting for their outcome.
    pub fn pending(&self) -> usize {
        self.lock_slots()
            .senders
            .values()
            .filter(|s| !s.borrow().is_settled())
            .count()
    }

    /// Fires a return notice to every subscriber.
    pub fn notify_return(&self, notice: ReturnNotice) {
        warn!(
            exchange = %notice.exchange,
            routing_key = %notice.routing_key,
            reply_code = notice.reply_code,
            reply_text = %notice.reply_text,
            "message returned by the broker"
        );

        {
            let mut recent = self
                .recent_returns
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            recent.push_back(notice.clone());
            while recent.len() > self.returns_capacity {
                recent.pop_front();
            }
        }

        // no subscriber is fine, the notice is still kept in the recent log
        let _ = self.returns.send(notice);
    }

    pub fn subscribe_returns(&self) -> broadcast::Receiver<ReturnNotice> {
        self.returns.subscribe()
    }

    /// The most recent return notices, oldest first.
    pub fn recent_returns(&self) -> Vec<ReturnNotice> {
        self.recent_returns
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, Slots> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
