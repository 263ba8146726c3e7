// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Gateway
//!
//! This module provides the error taxonomy of the gateway. Each family of operations
//! (connection, topology, publish, read and consume) has its own error type so that
//! callers and the HTTP surface can react to the kind of failure, not its transport details.
//!
//! `BrokerFault` is the internal classification of `lapin::Error` by AMQP reply code;
//! every public error is built from it, per operation.

use lapin::protocol::{AMQPErrorKind, AMQPSoftError};
use thiserror::Error;

/// Errors raised while acquiring the connection or a channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The broker could not be reached, even after the configured reconnect attempts
    #[error("broker unreachable: {0}")]
    Unreachable(String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,
}

/// Errors raised by declare/delete operations against the broker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// The entity already exists with different attributes
    #[error("topology conflict: {0}")]
    Conflict(String),

    /// The entity is in active use (consumers, exclusive owner)
    #[error("entity in use: {0}")]
    InUse(String),

    /// Connection or channel unavailable
    #[error("broker unreachable: {0}")]
    Unreachable(String),

    /// Rejected locally before reaching the broker
    #[error("invalid topology request: {0}")]
    Invalid(String),
}

/// Immediate transport failures of a publish.
///
/// Unroutable messages detected by the broker through `basic.return` are not reported here,
/// they go through the return-notice channel of the `ConfirmRegistry`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The target exchange does not exist
    #[error("unroutable message to exchange `{0}`")]
    Unroutable(String),

    /// The publishing channel was closed
    #[error("publishing channel closed")]
    ChannelClosed,

    /// Connection unavailable
    #[error("broker unreachable: {0}")]
    Unreachable(String),
}

/// Errors raised by pull-style reads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    /// The queue does not exist
    #[error("queue `{0}` not found")]
    QueueNotFound(String),

    /// The reading channel was closed
    #[error("reading channel closed")]
    ChannelClosed,

    /// Connection unavailable
    #[error("broker unreachable: {0}")]
    Unreachable(String),
}

/// Errors raised by the concurrent consumer.
///
/// Per-delivery errors are contained by the worker that produced them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsumeError {
    /// The routed handler failed, the delivery was not acknowledged
    #[error("handler failed for queue `{queue}`: {reason}")]
    HandlerFailed { queue: String, reason: String },

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckFailed,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackFailed,

    /// Error subscribing a worker to a queue
    #[error("failure to consume queue `{0}`")]
    SubscribeFailed(String),

    /// The pool is not in a state that allows the requested transition
    #[error("invalid consumer pool state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Error returned by business handlers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(reason: impl Into<String>) -> Self {
        HandlerError(reason.into())
    }
}

/// Broker-side failure, classified by AMQP reply code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerFault {
    /// 404 NOT_FOUND
    #[error("not found: {0}")]
    NotFound(String),

    /// 406 PRECONDITION_FAILED
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// 405 RESOURCE_LOCKED
    #[error("resource locked: {0}")]
    ResourceLocked(String),

    /// 403 ACCESS_REFUSED
    #[error("access refused: {0}")]
    AccessRefused(String),

    #[error("channel closed")]
    ChannelClosed,

    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("broker error: {0}")]
    Other(String),
}

impl From<lapin::Error> for BrokerFault {
    fn from(err: lapin::Error) -> Self {
        match err {
            lapin::Error::ProtocolError(amqp) => {
                let msg = amqp.get_message().as_str().to_owned();
                match amqp.kind() {
                    AMQPErrorKind::Soft(AMQPSoftError::NOTFOUND) => BrokerFault::NotFound(msg),
                    AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED) => {
                        BrokerFault::PreconditionFailed(msg)
                    }
                    AMQPErrorKind::Soft(AMQPSoftError::RESOURCELOCKED) => {
                        BrokerFault::ResourceLocked(msg)
                    }
                    AMQPErrorKind::Soft(AMQPSoftError::ACCESSREFUSED) => {
                        BrokerFault::AccessRefused(msg)
                    }
                    AMQPErrorKind::Hard(_) => BrokerFault::Unreachable(msg),
                    _ => BrokerFault::Other(msg),
                }
            }
            lapin::Error::InvalidChannelState(_) => BrokerFault::ChannelClosed,
            lapin::Error::InvalidConnectionState(state) => {
                BrokerFault::Unreachable(format!("connection {:?}", state))
            }
            lapin::Error::IOError(io) => BrokerFault::Unreachable(io.to_string()),
            other => BrokerFault::Other(other.to_string()),
        }
    }
}

impl From<ConnectionError> for BrokerFault {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::ChannelError => BrokerFault::ChannelClosed,
            ConnectionError::Unreachable(reason) => BrokerFault::Unreachable(reason),
        }
    }
}

impl TopologyError {
    /// Classifies a fault raised while declaring an entity.
    pub(crate) fn from_declare(fault: BrokerFault) -> Self {
        match fault {
            BrokerFault::PreconditionFailed(msg) | BrokerFault::AccessRefused(msg) => {
                TopologyError::Conflict(msg)
            }
            BrokerFault::ResourceLocked(msg) => TopologyError::InUse(msg),
            BrokerFault::NotFound(msg) | BrokerFault::Other(msg) => {
                TopologyError::Conflict(msg)
            }
            BrokerFault::ChannelClosed => TopologyError::Unreachable("channel closed".to_owned()),
            BrokerFault::Unreachable(msg) => TopologyError::Unreachable(msg),
        }
    }

    /// Classifies a fault raised while deleting an entity. `None` means the entity
    /// was already absent, which satisfies the delete.
    pub(crate) fn from_delete(fault: BrokerFault) -> Option<Self> {
        match fault {
            BrokerFault::NotFound(_) => None,
            BrokerFault::PreconditionFailed(msg) | BrokerFault::ResourceLocked(msg) => {
                Some(TopologyError::InUse(msg))
            }
            BrokerFault::AccessRefused(msg) | BrokerFault::Other(msg) => {
                Some(TopologyError::Conflict(msg))
            }
            BrokerFault::ChannelClosed => {
                Some(TopologyError::Unreachable("channel closed".to_owned()))
            }
            BrokerFault::Unreachable(msg) => Some(TopologyError::Unreachable(msg)),
        }
    }
}

impl PublishError {
    pub(crate) fn from_fault(exchange: &str, fault: BrokerFault) -> Self {
        match fault {
            BrokerFault::NotFound(_) => PublishError::Unroutable(exchange.to_owned()),
            BrokerFault::ChannelClosed => PublishError::ChannelClosed,
            BrokerFault::Unreachable(msg) => PublishError::Unreachable(msg),
            other => PublishError::Unreachable(other.to_string()),
        }
    }
}

impl ReadError {
    pub(crate) fn from_fault(queue: &str, fault: BrokerFault) -> Self {
        match fault {
            BrokerFault::NotFound(_) => ReadError::QueueNotFound(queue.to_owned()),
            BrokerFault::ChannelClosed => ReadError::ChannelClosed,
            BrokerFault::Unreachable(msg) => ReadError::Unreachable(msg),
            other => ReadError::Unreachable(other.to_string()),
        }
    }
}
