// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Gateway Configuration
//!
//! Configuration is loaded once at startup and never hot-reloaded. Sources, from lowest to
//! highest priority:
//!
//! 1. built-in defaults (the `Default` impls below)
//! 2. an optional `config/default.{toml,yaml,json}` file
//! 3. environment variables prefixed with `GATEWAY`, sections separated by `__`
//!    (e.g. `GATEWAY_RABBITMQ__HOST=broker`, `GATEWAY_CONSUMER__QUEUES=queue1,queue2`)

use crate::{
    consumer::FailurePolicy,
    exchange::{ExchangeDefinition, ExchangeKind},
    queue::{QueueBinding, QueueDefinition},
};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

pub const ENV_PREFIX: &str = "GATEWAY";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfigs {
    pub app: AppConfig,
    pub rabbitmq: RabbitMQConfigs,
    pub consumer: ConsumerConfigs,
    pub http: HttpConfigs,
    pub topology: TopologyConfigs,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            name: "rabbitmq-gateway".to_owned(),
            log_level: "info".to_owned(),
        }
    }
}

/// Broker address and credentials.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RabbitMQConfigs {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
    pub reconnect: ReconnectConfigs,
}

impl Default for RabbitMQConfigs {
    fn default() -> Self {
        RabbitMQConfigs {
            host: "localhost".to_owned(),
            port: 5672,
            user: "guest".to_owned(),
            password: "guest".to_owned(),
            vhost: "/".to_owned(),
            reconnect: ReconnectConfigs::default(),
        }
    }
}

impl RabbitMQConfigs {
    /// AMQP URI of the broker. The default vhost `/` is percent-encoded.
    pub fn uri(&self) -> String {
        let vhost = match self.vhost.as_str() {
            "/" | "" => "%2f".to_owned(),
            other => other.trim_start_matches('/').replace('/', "%2f"),
        };

        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, vhost
        )
    }
}

/// Exponential backoff used when the connection has to be (re)established.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfigs {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// 0 retries forever
    pub max_attempts: u32,
}

impl Default for ReconnectConfigs {
    fn default() -> Self {
        ReconnectConfigs {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            max_attempts: 10,
        }
    }
}

impl ReconnectConfigs {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsumerConfigs {
    pub enabled: bool,
    pub workers: usize,
    pub queues: Vec<String>,
    pub prefetch: u16,
    pub failure_policy: FailurePolicy,
}

impl Default for ConsumerConfigs {
    fn default() -> Self {
        ConsumerConfigs {
            enabled: true,
            workers: 10,
            queues: vec!["queue1".to_owned(), "queue2".to_owned()],
            prefetch: 10,
            failure_policy: FailurePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfigs {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfigs {
    fn default() -> Self {
        HttpConfigs {
            host: "0.0.0.0".to_owned(),
            port: 8080,
        }
    }
}

impl HttpConfigs {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Attributes used when a binding has to create its queue or exchange.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BindingDefaults {
    pub exchange_kind: ExchangeKind,
    pub durable: bool,
}

impl Default for BindingDefaults {
    fn default() -> Self {
        BindingDefaults {
            exchange_kind: ExchangeKind::Topic,
            durable: true,
        }
    }
}

/// Topology installed at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TopologyConfigs {
    pub install: bool,
    pub exchanges: Vec<ExchangeDefinition>,
    pub queues: Vec<QueueDefinition>,
    pub bindings: Vec<QueueBinding>,
    pub binding_defaults: BindingDefaults,
}

impl Default for TopologyConfigs {
    fn default() -> Self {
        TopologyConfigs {
            install: true,
            exchanges: vec![ExchangeDefinition::new("directExchange").direct().durable()],
            queues: vec![
                QueueDefinition::new("queue1").durable(),
                QueueDefinition::new("queue2").durable(),
            ],
            bindings: vec![
                QueueBinding::new("queue1")
                    .exchange("directExchange")
                    .routing_key("routingKey1"),
                QueueBinding::new("queue2")
                    .exchange("directExchange")
                    .routing_key("routingKey2"),
            ],
            binding_defaults: BindingDefaults::default(),
        }
    }
}

impl AppConfigs {
    /// Loads `.env`, the optional config file and the environment.
    pub fn load() -> Result<AppConfigs, ConfigError> {
        let _ = dotenvy::dotenv();

        let builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("consumer.queues")
                    .try_parsing(true),
            );

        Self::from_config(builder.build()?)
    }

    pub fn from_config(config: Config) -> Result<AppConfigs, ConfigError> {
        config.try_deserialize()
    }
}
