// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use anyhow::Context;
use rabbitmq_gateway::{
    broker::AmqpBroker,
    channel::AmqpConnection,
    configs::AppConfigs,
    confirms::ConfirmRegistry,
    dispatcher::HandlerRegistry,
    handler::LogHandler,
    http::{self, AppState},
    logging,
    pool::{ConsumerOptions, ConsumerPool},
    publisher::RabbitMQPublisher,
    reader::AmqpQueueReader,
    topology::{AmqpTopology, TopologyDefinition},
};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = AppConfigs::load().context("failure to load configuration")?;

    logging::init(&cfg.app.log_level);
    info!(name = %cfg.app.name, "starting gateway");

    let connection = AmqpConnection::new(&cfg.rabbitmq, &cfg.app.name);
    connection
        .connect()
        .await
        .context("failure to connect to the broker")?;

    let broker = AmqpBroker::new(connection.clone());

    let topology = AmqpTopology::new(broker.clone(), cfg.topology.binding_defaults.clone());
    if cfg.topology.install {
        topology
            .install(&TopologyDefinition::from(&cfg.topology))
            .await
            .context("failure to install the topology")?;
    }

    let confirms = Arc::new(ConfirmRegistry::default());
    let publisher = RabbitMQPublisher::new(broker.clone(), confirms.clone());
    let reader = AmqpQueueReader::new(broker);

    let pool = if cfg.consumer.enabled {
        let handlers = cfg
            .consumer
            .queues
            .iter()
            .fold(HandlerRegistry::new(), |registry, queue| {
                registry.register(queue, Arc::new(LogHandler::default()))
            });

        let pool = ConsumerPool::new(
            connection.clone(),
            handlers,
            ConsumerOptions::from(&cfg.consumer),
        );
        pool.start(&cfg.consumer.queues, cfg.consumer.workers)
            .await
            .context("failure to start the consumer pool")?;

        Some(pool)
    } else {
        None
    };

    let state = AppState {
        topology,
        publisher,
        reader,
        confirms,
    };

    let served = http::serve(state, &cfg.http.addr(), async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = err.to_string(), "failure to listen for shutdown signal");
        }
        info!("shutdown signal received");
    })
    .await;

    if let Some(pool) = pool {
        pool.stop().await;
    }
    connection.close().await;

    served.context("http server failure")
}
