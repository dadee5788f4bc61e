//! HTTP adaptor — one fixed inbound URI accepting POSTed commands.
//!
//! Requires the `http` feature. Uses axum for routing.
//!
//! ## Routes
//!
//! - `POST /stellar` — accept a Command JSON body, dispatch it through the
//!   receiving transport's handler path, answer with the response Command
//!   (`requestId` = inbound `id`, fresh `id`).
//! - `GET /health` — health check returning `{ "ok": true, "handlers": [...] }`.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use stellar_rust::queue::InMemoryQueueSystem;
//! use stellar_rust::transport::{self, QueueTransport};
//!
//! let transport = Arc::new(QueueTransport::new(Arc::new(InMemoryQueueSystem::new())));
//!
//! // Get the router to compose with other axum routes
//! let app = transport::router(transport.clone());
//!
//! // Or serve directly
//! transport::serve(transport, "0.0.0.0:3000").await?;
//! ```

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use super::QueueTransport;
use crate::command::Command;
use crate::queue::QueueSystem;

/// Build an axum `Router` that feeds POSTed commands into the transport.
pub fn router<Q: QueueSystem + 'static>(transport: Arc<QueueTransport<Q>>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/stellar", post(command_handler))
        .with_state(transport)
}

/// Serve the adaptor over HTTP at the given address (e.g. `"0.0.0.0:3000"`).
pub async fn serve<Q: QueueSystem + 'static>(
    transport: Arc<QueueTransport<Q>>,
    addr: &str,
) -> Result<(), std::io::Error> {
    let app = router(transport);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

/// `GET /health` — returns `{ "ok": true, "handlers": [...] }`.
async fn health_handler<Q: QueueSystem + 'static>(
    State(transport): State<Arc<QueueTransport<Q>>>,
) -> impl IntoResponse {
    Json(json!({ "ok": true, "handlers": transport.registered_handlers() }))
}

/// `POST /stellar` — dispatch a posted command, answer with the response.
async fn command_handler<Q: QueueSystem + 'static>(
    State(transport): State<Arc<QueueTransport<Q>>>,
    Json(command): Json<Command>,
) -> impl IntoResponse {
    let queue_name = command.headers.queue_name.clone();
    let fire_and_forget = command.headers.kind == crate::command::CommandType::FireAndForget;
    match transport.handle_inbound(command).await {
        Some(response) => (StatusCode::OK, Json(response)).into_response(),
        None if fire_and_forget => StatusCode::NO_CONTENT.into_response(),
        None => {
            let body = json!({
                "error": "no handler registered",
                "queueName": queue_name,
            });
            (StatusCode::NOT_FOUND, Json(body)).into_response()
        }
    }
}
