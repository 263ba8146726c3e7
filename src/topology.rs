// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topology Management
//!
//! Declarative, idempotent management of exchanges, queues and bindings.
//!
//! The main components are:
//! - `TopologyManager` trait: the CRUD operations used by the gateway and its HTTP surface
//! - `AmqpTopology`: implementation over the broker operations
//! - `TopologyDefinition`: a whole topology installed at startup

use crate::{
    broker::Broker,
    configs::{BindingDefaults, TopologyConfigs},
    errors::{BrokerFault, TopologyError},
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error};

#[cfg(test)]
use mockall::automock;

/// Idempotent topology operations.
///
/// Declaring an entity that already exists with the same attributes succeeds; deleting an
/// entity that does not exist succeeds.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TopologyManager: Send + Sync {
    /// Ensures the queue exists with the given durability.
    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), TopologyError>;

    /// Ensures the exchange exists with the given kind and durability.
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), TopologyError>;

    /// Ensures the queue and the exchange exist, declaring the missing ones, then ensures
    /// the binding exists.
    async fn declare_binding(&self, binding: &QueueBinding) -> Result<(), TopologyError>;

    /// Deletes the queue; fails with `InUse` while it has consumers.
    async fn delete_queue(&self, name: &str) -> Result<(), TopologyError>;

    async fn delete_exchange(&self, name: &str) -> Result<(), TopologyError>;

    async fn delete_binding(&self, binding: &QueueBinding) -> Result<(), TopologyError>;
}

/// Exchanges, queues and bindings installed together.
#[derive(Debug, Clone, Default)]
pub struct TopologyDefinition {
    pub exchanges: Vec<ExchangeDefinition>,
    pub queues: Vec<QueueDefinition>,
    pub bindings: Vec<QueueBinding>,
}

impl TopologyDefinition {
    pub fn new() -> TopologyDefinition {
        TopologyDefinition::default()
    }

    pub fn exchange(mut self, def: ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    pub fn queue(mut self, def: QueueDefinition) -> Self {
        self.queues.push(def);
        self
    }

    pub fn binding(mut self, binding: QueueBinding) -> Self {
        self.bindings.push(binding);
        self
    }
}

impl From<&TopologyConfigs> for TopologyDefinition {
    fn from(cfg: &TopologyConfigs) -> Self {
        TopologyDefinition {
            exchanges: cfg.exchanges.clone(),
            queues: cfg.queues.clone(),
            bindings: cfg.bindings.clone(),
        }
    }
}

/// Topology manager over the broker operations.
pub struct AmqpTopology {
    broker: Arc<dyn Broker>,
    defaults: BindingDefaults,
}

impl AmqpTopology {
    /// Creates a new topology manager. `defaults` describes the queue and exchange created
    /// by `declare_binding` when they are missing.
    pub fn new(broker: Arc<dyn Broker>, defaults: BindingDefaults) -> Arc<AmqpTopology> {
        Arc::new(AmqpTopology { broker, defaults })
    }

    /// Installs a whole topology: exchanges first, then queues, then bindings.
    pub async fn install(&self, topology: &TopologyDefinition) -> Result<(), TopologyError> {
        for exch in &topology.exchanges {
            self.declare_exchange(exch).await?;
        }

        for queue in &topology.queues {
            self.declare_queue(queue).await?;
        }

        for binding in &topology.bindings {
            self.declare_binding(binding).await?;
        }

        debug!("topology installed");

        Ok(())
    }

    async fn queue_exists(&self, name: &str) -> Result<bool, TopologyError> {
        match self.broker.queue_depth(name).await {
            Ok(_) => Ok(true),
            Err(BrokerFault::NotFound(_)) => Ok(false),
            Err(fault) => Err(TopologyError::from_declare(fault)),
        }
    }
}

#[async_trait]
impl TopologyManager for AmqpTopology {
    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), TopologyError> {
        validate_name("queue", &def.name)?;

        if let Some(dlq) = def.dlq() {
            debug!("creating dlq: {}", dlq.name);
            self.broker.declare_queue(&dlq).await.map_err(|fault| {
                error!(error = fault.to_string(), name = %dlq.name, "failure to declare dlq");
                TopologyError::from_declare(fault)
            })?;
        }

        debug!("creating queue: {}", def.name);

        match self.broker.declare_queue(def).await {
            Err(fault) => {
                error!(
                    error = fault.to_string(),
                    name = %def.name,
                    "error to declare the queue"
                );
                Err(TopologyError::from_declare(fault))
            }
            _ => {
                debug!("queue: {} was created", def.name);
                Ok(())
            }
        }
    }

    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), TopologyError> {
        validate_name("exchange", &def.name)?;

        debug!("creating exchange: {}", def.name);

        match self.broker.declare_exchange(def).await {
            Err(fault) => {
                error!(
                    error = fault.to_string(),
                    name = %def.name,
                    "error to declare the exchange"
                );
                Err(TopologyError::from_declare(fault))
            }
            _ => {
                debug!("exchange: {} was created", def.name);
                Ok(())
            }
        }
    }

    async fn declare_binding(&self, binding: &QueueBinding) -> Result<(), TopologyError> {
        validate_name("queue", &binding.queue_name)?;
        validate_name("exchange", &binding.exchange_name)?;

        if !self.queue_exists(&binding.queue_name).await? {
            let def = QueueDefinition::new(&binding.queue_name).durability(self.defaults.durable);
            self.declare_queue(&def).await?;
        }

        let exchange_exists = self
            .broker
            .exchange_exists(&binding.exchange_name)
            .await
            .map_err(TopologyError::from_declare)?;

        if !exchange_exists {
            let mut def =
                ExchangeDefinition::new(&binding.exchange_name).kind(self.defaults.exchange_kind);
            if self.defaults.durable {
                def = def.durable();
            }
            self.declare_exchange(&def).await?;
        }

        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            binding.queue_name, binding.exchange_name, binding.routing_key
        );

        match self.broker.bind_queue(binding).await {
            Err(fault) => {
                error!(error = fault.to_string(), "error to bind queue to exchange");
                Err(TopologyError::from_declare(fault))
            }
            _ => Ok(()),
        }
    }

    async fn delete_queue(&self, name: &str) -> Result<(), TopologyError> {
        validate_name("queue", name)?;

        match self.broker.delete_queue(name).await {
            Err(fault) => match TopologyError::from_delete(fault) {
                Some(err) => {
                    error!(error = err.to_string(), name, "error to delete the queue");
                    Err(err)
                }
                None => {
                    debug!("queue: {} was already absent", name);
                    Ok(())
                }
            },
            _ => {
                debug!("queue: {} was deleted", name);
                Ok(())
            }
        }
    }

    async fn delete_exchange(&self, name: &str) -> Result<(), TopologyError> {
        validate_name("exchange", name)?;

        match self.broker.delete_exchange(name).await {
            Err(fault) => match TopologyError::from_delete(fault) {
                Some(err) => {
                    error!(error = err.to_string(), name, "error to delete the exchange");
                    Err(err)
                }
                None => {
                    debug!("exchange: {} was already absent", name);
                    Ok(())
                }
            },
            _ => {
                debug!("exchange: {} was deleted", name);
                Ok(())
            }
        }
    }

    async fn delete_binding(&self, binding: &QueueBinding) -> Result<(), TopologyError> {
        validate_name("queue", &binding.queue_name)?;
        validate_name("exchange", &binding.exchange_name)?;

        match self.broker.unbind_queue(binding).await {
            Err(fault) => match TopologyError::from_delete(fault) {
                Some(err) => {
                    error!(error = err.to_string(), "error to unbind queue from exchange");
                    Err(err)
                }
                None => Ok(()),
            },
            _ => {
                debug!(
                    "binding queue: {} to the exchange: {} with the key: {} was removed",
                    binding.queue_name, binding.exchange_name, binding.routing_key
                );
                Ok(())
            }
        }
    }
}

fn validate_name(entity: &str, name: &str) -> Result<(), TopologyError> {
    if name.trim().is_empty() {
        return Err(TopologyError::Invalid(format!("{} name must not be empty", entity)));
    }

    Ok(())
}
