// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod otel;

pub mod broker;
pub mod channel;
pub mod configs;
pub mod confirms;
pub mod consumer;
pub mod dispatcher;
pub mod errors;
pub mod exchange;
pub mod handler;
pub mod http;
pub mod logging;
pub mod pool;
pub mod publisher;
pub mod queue;
pub mod reader;
pub mod topology;
