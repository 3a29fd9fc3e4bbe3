/// API request handlers
use crate::api::connections::{ConnectionRegistry, Delivery, OutboundEvent};
use crate::api::models::*;
use crate::config::AppConfig;
use crate::error::MarketError;
use crate::persistence::Persistence;
use crate::soft_delete::ReadOptions;
use crate::types::{NewMessage, OrderSearch};
use axum::{
    body::Bytes,
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::time::Instant;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub persistence: Persistence,
    pub connections: ConnectionRegistry,
    pub config: AppConfig,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(persistence: Persistence, connections: ConnectionRegistry, config: AppConfig) -> Self {
        Self {
            persistence,
            connections,
            config,
            start_time: Instant::now(),
        }
    }

    fn read_options(include_deleted: bool) -> ReadOptions {
        if include_deleted {
            ReadOptions::with_deleted()
        } else {
            ReadOptions::live()
        }
    }

    fn error(&self, err: anyhow::Error) -> Response {
        error_response(err, self.config.server.debug_mode)
    }
}

/// Map a repository error to a status code and JSON body.
pub fn error_response(err: anyhow::Error, debug_mode: bool) -> Response {
    let (status, body) = match err.downcast_ref::<MarketError>() {
        Some(MarketError::NotFound { .. }) => (
            StatusCode::NOT_FOUND,
            ErrorResponse::new("not_found", err.to_string()),
        ),
        Some(MarketError::Invalid(_)) => (
            StatusCode::BAD_REQUEST,
            ErrorResponse::new("invalid_request", err.to_string()),
        ),
        Some(MarketError::Conflict(_)) => (
            StatusCode::CONFLICT,
            ErrorResponse::new("conflict", err.to_string()),
        ),
        None => {
            tracing::error!("Request failed: {:#}", err);
            let message = if debug_mode {
                format!("{:#}", err)
            } else {
                "Internal server error".to_string()
            };
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("internal_error", message),
            )
        }
    };
    (status, Json(body)).into_response()
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed().as_secs();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        active_connections: state.connections.len().await,
    })
}

/// `GET /active_connections`
pub async fn active_connections(State(state): State<AppState>) -> impl IntoResponse {
    Json(ActiveConnectionsResponse {
        active: state.connections.active_users().await,
    })
}

/// `GET /orders`
pub async fn list_orders(State(state): State<AppState>, Query(query): Query<ListQuery>) -> Response {
    if query.skip < 0 || query.limit < 0 {
        return state.error(MarketError::invalid("skip and limit must not be negative").into());
    }
    let options = AppState::read_options(query.include_deleted);
    match state.persistence.list_orders(query.skip, query.limit, options) {
        Ok(orders) => Json(orders).into_response(),
        Err(e) => state.error(e),
    }
}

/// `GET /orders/search`
pub async fn search_orders(State(state): State<AppState>, Query(search): Query<OrderSearch>) -> Response {
    match state.persistence.search_orders(&search) {
        Ok(orders) => Json(orders).into_response(),
        Err(e) => state.error(e),
    }
}

/// `GET /orders/:id`
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<IncludeDeletedQuery>,
) -> Response {
    let options = AppState::read_options(query.include_deleted);
    match state.persistence.get_order(id, options) {
        Ok(Some(order)) => Json(order).into_response(),
        Ok(None) => state.error(MarketError::not_found("Order", id).into()),
        Err(e) => state.error(e),
    }
}

/// `DELETE /orders/:id`
pub async fn delete_order(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.persistence.delete_order(id) {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => state.error(MarketError::not_found("Order", id).into()),
        Err(e) => state.error(e),
    }
}

/// `POST /orders/:id/restore`
pub async fn restore_order(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let restored = match state.persistence.restore_order(id) {
        Ok(restored) => restored,
        Err(e) => return state.error(e),
    };
    if !restored {
        return match state.persistence.get_order(id, ReadOptions::live()) {
            Ok(Some(_)) => state.error(MarketError::conflict(format!("order #{} is not deleted", id)).into()),
            Ok(None) => state.error(MarketError::not_found("Order", id).into()),
            Err(e) => state.error(e),
        };
    }
    match state.persistence.get_order(id, ReadOptions::live()) {
        Ok(Some(order)) => Json(order).into_response(),
        Ok(None) => state.error(MarketError::not_found("Order", id).into()),
        Err(e) => state.error(e),
    }
}

/// `POST /files`: the request body is the file contents.
pub async fn upload_file(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Response {
    match state
        .persistence
        .store_file(&state.config.storage, query.author_id, &query.name, &body)
    {
        Ok(file) => (StatusCode::CREATED, Json(file)).into_response(),
        Err(e) => state.error(e),
    }
}

/// `GET /chats/:id/messages`
pub async fn chat_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<i64>,
    Query(query): Query<IncludeDeletedQuery>,
) -> Response {
    let options = AppState::read_options(query.include_deleted);
    match state.persistence.chat_messages(chat_id, options) {
        Ok(messages) => Json(messages).into_response(),
        Err(e) => state.error(e),
    }
}

/// `POST /chats/:id/messages`: store the message, then push it to the other
/// participant if they are online.
pub async fn post_chat_message(
    State(state): State<AppState>,
    Path(chat_id): Path<i64>,
    Json(request): Json<PostMessageRequest>,
) -> Response {
    let new = NewMessage {
        author_id: request.author_id,
        text: request.text,
        file_id: request.file_id,
    };
    let message = match state.persistence.send_message(chat_id, &new) {
        Ok(message) => message,
        Err(e) => return state.error(e),
    };

    let recipient = match state.persistence.get_chat(chat_id) {
        Ok(chat) => chat.and_then(|chat| chat.counterpart(message.author_id)),
        Err(e) => return state.error(e),
    };

    let mut delivered = false;
    if let Some(recipient) = recipient {
        match serde_json::to_value(&message) {
            Ok(payload) => {
                delivered = state
                    .connections
                    .send(recipient, OutboundEvent::message(payload))
                    .await
                    == Delivery::Delivered;
            }
            Err(e) => tracing::error!("Failed to encode message #{}: {}", message.id, e),
        }
    }

    (
        StatusCode::CREATED,
        Json(PostMessageResponse { message, delivered }),
    )
        .into_response()
}
