// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # HTTP Surface
//!
//! One endpoint per gateway operation, parameters taken from the query string.
//!
//! ## Routes
//!
//! - `POST /rabbitmq/createQueue?queueName=&durable=&dlq=`
//! - `POST /rabbitmq/createExchange?exchangeName=&kind=&durable=`
//! - `POST /rabbitmq/createBinding?queueName=&exchangeName=&routingKey=`
//! - `POST /rabbitmq/deleteQueue?queueName=`
//! - `POST /rabbitmq/deleteExchange?exchangeName=`
//! - `POST /rabbitmq/deleteBinding?queueName=&exchangeName=&routingKey=`
//! - `POST /rabbitmq/send?exchange=&routingKey=&message=`
//! - `POST /rabbitmq/sendWithConfirmation?exchange=&routingKey=&message=&correlationId=`
//! - `GET /rabbitmq/receive?queueName=`
//! - `GET /rabbitmq/hasMessages?queueName=`
//! - `GET /rabbitmq/messageCount?queueName=`
//! - `GET /rabbitmq/confirmations/:correlationId`
//! - `GET /rabbitmq/returns`
//! - `GET /health`
//!
//! Failures, malformed query strings included, are answered with a stable status code and
//! `{ "error": <kind>, "message": .. }`.

use crate::{
    confirms::ConfirmRegistry,
    errors::{PublishError, ReadError, TopologyError},
    exchange::{ExchangeDefinition, ExchangeKind},
    publisher::Publisher,
    queue::{QueueBinding, QueueDefinition},
    reader::QueueReader,
    topology::TopologyManager,
};
use async_trait::async_trait;
use axum::{
    extract::{rejection::QueryRejection, FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use std::{future::Future, sync::Arc};
use tracing::info;

/// Services behind the HTTP surface.
#[derive(Clone)]
pub struct AppState {
    pub topology: Arc<dyn TopologyManager>,
    pub publisher: Arc<dyn Publisher>,
    pub reader: Arc<dyn QueueReader>,
    pub confirms: Arc<ConfirmRegistry>,
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/createQueue", post(create_queue))
        .route("/createExchange", post(create_exchange))
        .route("/createBinding", post(create_binding))
        .route("/deleteQueue", post(delete_queue))
        .route("/deleteExchange", post(delete_exchange))
        .route("/deleteBinding", post(delete_binding))
        .route("/send", post(send))
        .route("/sendWithConfirmation", post(send_with_confirmation))
        .route("/receive", get(receive))
        .route("/hasMessages", get(has_messages))
        .route("/messageCount", get(message_count))
        .route("/confirmations/:correlation_id", get(confirmation))
        .route("/returns", get(returns));

    Router::new()
        .route("/health", get(health))
        .nest("/rabbitmq", api)
        .with_state(state)
}

/// Serves the router until `shutdown` resolves, then drains open requests.
pub async fn serve<F>(state: AppState, addr: &str, shutdown: F) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr, "http server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Errors crossing the HTTP boundary.
#[derive(Debug)]
pub enum ApiError {
    Topology(TopologyError),
    Publish(PublishError),
    Read(ReadError),
    UnknownToken(String),
    /// Missing or malformed query parameters
    BadRequest(String),
}

impl From<TopologyError> for ApiError {
    fn from(err: TopologyError) -> Self {
        ApiError::Topology(err)
    }
}

impl From<PublishError> for ApiError {
    fn from(err: PublishError) -> Self {
        ApiError::Publish(err)
    }
}

impl From<ReadError> for ApiError {
    fn from(err: ReadError) -> Self {
        ApiError::Read(err)
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Topology(TopologyError::Conflict(_)) => (StatusCode::CONFLICT, "conflict"),
            ApiError::Topology(TopologyError::InUse(_)) => (StatusCode::LOCKED, "in_use"),
            ApiError::Topology(TopologyError::Invalid(_)) | ApiError::BadRequest(_) => {
                (StatusCode::BAD_REQUEST, "invalid")
            }
            ApiError::Topology(TopologyError::Unreachable(_))
            | ApiError::Publish(PublishError::Unreachable(_))
            | ApiError::Read(ReadError::Unreachable(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "unreachable")
            }
            ApiError::Publish(PublishError::ChannelClosed)
            | ApiError::Read(ReadError::ChannelClosed) => {
                (StatusCode::SERVICE_UNAVAILABLE, "channel_closed")
            }
            ApiError::Publish(PublishError::Unroutable(_)) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "unroutable")
            }
            ApiError::Read(ReadError::QueueNotFound(_)) | ApiError::UnknownToken(_) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Topology(err) => err.to_string(),
            ApiError::Publish(err) => err.to_string(),
            ApiError::Read(err) => err.to_string(),
            ApiError::UnknownToken(token) => format!("no confirmation tracked for `{}`", token),
            ApiError::BadRequest(reason) => reason.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        (
            status,
            Json(json!({ "error": kind, "message": self.message() })),
        )
            .into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

/// `Query` answering rejections with the JSON error body.
struct ApiQuery<T>(T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(params) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(ApiQuery(params))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateQueueParams {
    queue_name: String,
    durable: Option<bool>,
    dlq: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateExchangeParams {
    exchange_name: String,
    kind: Option<ExchangeKind>,
    durable: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueParams {
    queue_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeParams {
    exchange_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BindingParams {
    queue_name: String,
    exchange_name: String,
    routing_key: String,
}

impl BindingParams {
    fn binding(&self) -> QueueBinding {
        QueueBinding::new(&self.queue_name)
            .exchange(&self.exchange_name)
            .routing_key(&self.routing_key)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendParams {
    exchange: String,
    routing_key: String,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmedSendParams {
    exchange: String,
    routing_key: String,
    message: String,
    correlation_id: String,
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "ok": true, "pendingConfirmations": state.confirms.pending() }))
}

async fn create_queue(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<CreateQueueParams>,
) -> ApiResult {
    let mut def =
        QueueDefinition::new(&params.queue_name).durability(params.durable.unwrap_or(true));
    if params.dlq.unwrap_or(false) {
        def = def.with_dlq();
    }

    state.topology.declare_queue(&def).await?;

    Ok(Json(json!({ "queue": def.name(), "dlq": def.dlq_name() })))
}

async fn create_exchange(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<CreateExchangeParams>,
) -> ApiResult {
    let mut def = ExchangeDefinition::new(&params.exchange_name)
        .kind(params.kind.unwrap_or(ExchangeKind::Topic));
    if params.durable.unwrap_or(true) {
        def = def.durable();
    }

    state.topology.declare_exchange(&def).await?;

    Ok(Json(json!({
        "exchange": def.name(),
        "kind": def.exchange_kind().to_string(),
        "durable": def.is_durable(),
    })))
}

async fn create_binding(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<BindingParams>,
) -> ApiResult {
    state.topology.declare_binding(&params.binding()).await?;

    Ok(Json(json!({
        "queue": params.queue_name,
        "exchange": params.exchange_name,
        "routingKey": params.routing_key,
    })))
}

async fn delete_queue(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<QueueParams>,
) -> ApiResult {
    state.topology.delete_queue(&params.queue_name).await?;

    Ok(Json(json!({ "deleted": params.queue_name })))
}

async fn delete_exchange(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<ExchangeParams>,
) -> ApiResult {
    state.topology.delete_exchange(&params.exchange_name).await?;

    Ok(Json(json!({ "deleted": params.exchange_name })))
}

async fn delete_binding(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<BindingParams>,
) -> ApiResult {
    state.topology.delete_binding(&params.binding()).await?;

    Ok(Json(json!({
        "queue": params.queue_name,
        "exchange": params.exchange_name,
        "routingKey": params.routing_key,
        "deleted": true,
    })))
}

async fn send(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<SendParams>,
) -> ApiResult {
    state
        .publisher
        .send(
            &params.exchange,
            &params.routing_key,
            params.message.as_bytes(),
        )
        .await?;

    Ok(Json(json!({
        "exchange": params.exchange,
        "routingKey": params.routing_key,
        "sent": true,
    })))
}

async fn send_with_confirmation(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<ConfirmedSendParams>,
) -> ApiResult {
    let handle = state
        .publisher
        .send_with_confirmation(
            &params.exchange,
            &params.routing_key,
            params.message.as_bytes(),
            &params.correlation_id,
        )
        .await?;

    Ok(Json(json!({
        "correlationId": handle.token(),
        "confirmation": handle.status(),
    })))
}

async fn receive(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<QueueParams>,
) -> ApiResult {
    let message = state
        .reader
        .receive(&params.queue_name)
        .await?
        .map(|payload| String::from_utf8_lossy(&payload).into_owned());

    Ok(Json(json!({ "queue": params.queue_name, "message": message })))
}

async fn has_messages(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<QueueParams>,
) -> ApiResult {
    let has_messages = state.reader.has_messages(&params.queue_name).await?;

    Ok(Json(
        json!({ "queue": params.queue_name, "hasMessages": has_messages }),
    ))
}

async fn message_count(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<QueueParams>,
) -> ApiResult {
    let count = state.reader.message_count(&params.queue_name).await?;

    Ok(Json(
        json!({ "queue": params.queue_name, "messageCount": count }),
    ))
}

async fn confirmation(
    State(state): State<AppState>,
    Path(correlation_id): Path<String>,
) -> ApiResult {
    let status = state
        .confirms
        .status(&correlation_id)
        .ok_or_else(|| ApiError::UnknownToken(correlation_id.clone()))?;

    Ok(Json(json!({
        "correlationId": correlation_id,
        "confirmation": status,
    })))
}

/// Return notices of recently unroutable messages, oldest first.
async fn returns(State(state): State<AppState>) -> Json<Value> {
    let returns: Vec<Value> = state
        .confirms
        .recent_returns()
        .into_iter()
        .map(|notice| {
            let message = String::from_utf8_lossy(&notice.payload).into_owned();
            let mut body = json!(notice);
            body["message"] = Value::String(message);
            body
        })
        .collect();

    Json(json!({ "returns": returns }))
}
