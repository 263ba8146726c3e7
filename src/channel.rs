// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection and Channel Management
//!
//! This module owns the single, long-lived connection to the broker and hands out channels:
//!
//! - a cached channel in publisher-confirm mode, shared by publishers
//! - short-lived channels, one per administrative operation (declare, lookup, delete, get)
//! - dedicated channels, one per consumer worker
//!
//! The broker closes a channel on every soft error (404, 406, ...) and fails every RPC still
//! pending on it with that error, so administrative round-trips never share a channel. The
//! confirm channel is recreated transparently on the next acquisition. A lost connection is
//! re-established with exponential backoff.

use crate::{
    configs::{RabbitMQConfigs, ReconnectConfigs},
    errors::ConnectionError,
};
use lapin::{
    options::ConfirmSelectOptions, types::LongString, Channel, Connection, ConnectionProperties,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Exponential backoff between connection attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
    multiplier: f64,
}

impl Backoff {
    pub fn new(cfg: &ReconnectConfigs) -> Backoff {
        Backoff {
            current: cfg.initial_delay(),
            max: cfg.max_delay(),
            multiplier: cfg.multiplier.max(1.0),
        }
    }

    /// Returns the delay to wait now and grows the next one, capped at the maximum.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.mul_f64(self.multiplier).min(self.max);
        delay
    }
}

/// The connection manager.
///
/// Cheap to share behind an `Arc`; every acquisition method is safe to call concurrently.
pub struct AmqpConnection {
    uri: String,
    name: String,
    reconnect: ReconnectConfigs,
    connection: Mutex<Option<Arc<Connection>>>,
    confirm_channel: Mutex<Option<Arc<Channel>>>,
}

impl AmqpConnection {
    /// Creates the connection manager. No connection is opened until the first acquisition.
    pub fn new(cfg: &RabbitMQConfigs, name: &str) -> Arc<AmqpConnection> {
        Arc::new(AmqpConnection {
            uri: cfg.uri(),
            name: name.to_owned(),
            reconnect: cfg.reconnect.clone(),
            connection: Mutex::new(None),
            confirm_channel: Mutex::new(None),
        })
    }

    /// The backoff policy, shared with consumers that re-subscribe after a loss.
    pub fn reconnect_policy(&self) -> &ReconnectConfigs {
        &self.reconnect
    }

    /// Returns the cached connection, reconnecting with backoff when it was lost.
    pub async fn connect(&self) -> Result<Arc<Connection>, ConnectionError> {
        let mut cached = self.connection.lock().await;

        if let Some(conn) = cached.as_ref() {
            if conn.status().connected() {
                return Ok(conn.clone());
            }
            warn!(name = %self.name, "amqp connection lost, reconnecting");
        }

        let conn = Arc::new(self.connect_with_backoff().await?);
        *cached = Some(conn.clone());

        Ok(conn)
    }

    async fn connect_with_backoff(&self) -> Result<Connection, ConnectionError> {
        let mut backoff = Backoff::new(&self.reconnect);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            debug!(attempt, "creating amqp connection...");

            let options = ConnectionProperties::default()
                .with_connection_name(LongString::from(self.name.clone()));

            match Connection::connect(&self.uri, options).await {
                Ok(conn) => {
                    debug!("amqp connected");
                    conn.on_error(|err| {
                        error!(error = err.to_string(), "amqp connection error");
                    });
                    return Ok(conn);
                }
                Err(err) => {
                    error!(error = err.to_string(), attempt, "failure to connect");

                    if self.reconnect.max_attempts != 0 && attempt >= self.reconnect.max_attempts {
                        return Err(ConnectionError::Unreachable(err.to_string()));
                    }
                }
            }

            tokio::time::sleep(backoff.next_delay()).await;
        }
    }

    /// Returns the cached channel in publisher-confirm mode, recreating it when it was closed.
    pub async fn confirm_channel(&self) -> Result<Arc<Channel>, ConnectionError> {
        let mut cached = self.confirm_channel.lock().await;

        if let Some(channel) = cached.as_ref() {
            if channel.status().connected() {
                return Ok(channel.clone());
            }
            debug!("confirm channel closed, recreating");
        }

        let channel = self.dedicated_channel().await?;

        if let Err(err) = channel.confirm_select(ConfirmSelectOptions::default()).await {
            error!(error = err.to_string(), "failure to enable publisher confirms");
            return Err(ConnectionError::ChannelError);
        }

        let channel = Arc::new(channel);
        *cached = Some(channel.clone());

        Ok(channel)
    }

    /// Opens a new channel that is not shared with anyone else.
    pub async fn dedicated_channel(&self) -> Result<Channel, ConnectionError> {
        let conn = self.connect().await?;

        debug!("creating amqp channel...");
        match conn.create_channel().await {
            Ok(c) => {
                debug!("channel created");
                Ok(c)
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(ConnectionError::ChannelError)
            }
        }
    }

    /// Closes the confirm channel and the connection.
    pub async fn close(&self) {
        if let Some(channel) = self.confirm_channel.lock().await.take() {
            release(&channel, "gateway shutdown").await;
        }

        if let Some(conn) = self.connection.lock().await.take() {
            if conn.status().connected() {
                if let Err(err) = conn.close(200, "gateway shutdown").await {
                    warn!(error = err.to_string(), "failure to close connection");
                }
            }
        }

        debug!("amqp connection closed");
    }
}

/// Closes a channel that is still open. A channel the broker already closed is left alone.
pub async fn release(channel: &Channel, reason: &str) {
    if !channel.status().connected() {
        return;
    }

    if let Err(err) = channel.close(200, reason).await {
        warn!(error = err.to_string(), "failure to close channel");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconnect(initial: u64, max: u64, multiplier: f64) -> ReconnectConfigs {
        ReconnectConfigs {
            initial_delay_ms: initial,
            max_delay_ms: max,
            multiplier,
            max_attempts: 3,
        }
    }

    #[test]
    fn backoff_grows_exponentially_up_to_max() {
        let mut backoff = Backoff::new(&reconnect(100, 1_000, 2.0));

        let delays: Vec<u64> = (0..6)
            .map(|_| backoff.next_delay().as_millis() as u64)
            .collect();

        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn multiplier_below_one_never_shrinks_delay() {
        let mut backoff = Backoff::new(&reconnect(100, 1_000, 0.5));
        backoff.next_delay();

        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn unreachable_broker_gives_up_after_max_attempts() {
        let cfg = RabbitMQConfigs {
            host: "127.0.0.1".to_owned(),
            port: 1,
            reconnect: ReconnectConfigs {
                initial_delay_ms: 1,
                max_delay_ms: 2,
                multiplier: 2.0,
                max_attempts: 2,
            },
            ..RabbitMQConfigs::default()
        };
        let connection = AmqpConnection::new(&cfg, "test");

        let result = connection.dedicated_channel().await;

        assert!(matches!(result, Err(ConnectionError::Unreachable(_))));
    }
}
