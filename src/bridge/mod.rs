//! Bridge gateway — exposes the reactive dispatcher and transport over a
//! persistent WebSocket connection to remote clients.
//!
//! Requires the `http` feature. Uses axum's WebSocket upgrade.
//!
//! ## Protocol
//!
//! Frames are JSON-serialized [`Command`]s in both directions. The verb
//! (final colon-segment of the `queueName`) routes each inbound frame:
//!
//! - `…:subscribe` — body `{ "channel": "...", "payload": ... }`; starts a
//!   reactive subscription. The response body is
//!   `{ "stopperId": "...", "results": ... }`; subsequent channel
//!   deliveries arrive as `publish` command frames.
//! - `…:unsubscribe` — body `{ "stopperId": "..." }`; stops the
//!   subscription. Idempotent.
//! - any other verb — forwarded as a transport request; the response
//!   command flows back tagged with the inbound command's id as its
//!   `requestId`.
//!
//! `fireAndForget` commands are forwarded without producing a frame back.
//! Closing the socket stops every subscription the session started.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::command::{Command, CommandType};
use crate::dispatcher::{CallOptions, Dispatcher};
use crate::error::StellarError;
use crate::transport::subscription_handler;

/// Default response window for forwarded requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Build an axum `Router` exposing the bridge at `GET /bridge`.
pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/bridge", get(upgrade_handler))
        .with_state(dispatcher)
}

/// Serve the bridge over HTTP at the given address.
pub async fn serve(dispatcher: Arc<Dispatcher>, addr: &str) -> Result<(), std::io::Error> {
    let app = router(dispatcher);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

async fn upgrade_handler(
    ws: WebSocketUpgrade,
    State(dispatcher): State<Arc<Dispatcher>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| session(socket, dispatcher))
}

/// One session per connection. Frames are processed sequentially;
/// subscription deliveries are funneled through an outbound channel so
/// they interleave safely with responses.
async fn session(mut socket: WebSocket, dispatcher: Arc<Dispatcher>) {
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Command>();
    let mut session_tokens: Vec<String> = Vec::new();

    loop {
        tokio::select! {
            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&dispatcher, &outbound_tx, &mut session_tokens, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary/ping/pong ignored
                    Some(Err(error)) => {
                        debug!(error = %error, "bridge socket error");
                        break;
                    }
                }
            }
            delivery = outbound_rx.recv() => {
                let Some(command) = delivery else { break };
                let Ok(frame) = serde_json::to_string(&command) else { continue };
                if socket.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
        }
    }

    // The session is gone; its subscriptions go with it.
    for token in session_tokens {
        dispatcher.unsubscribe(&token).await;
    }
}

async fn handle_frame(
    dispatcher: &Arc<Dispatcher>,
    outbound: &mpsc::UnboundedSender<Command>,
    session_tokens: &mut Vec<String>,
    text: &str,
) {
    let command: Command = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(error) => {
            warn!(error = %error, "dropping unparseable bridge frame");
            return;
        }
    };

    let Some(queue_name) = command.headers.queue_name.clone() else {
        warn!("dropping bridge frame without queueName");
        return;
    };

    if command.headers.kind == CommandType::FireAndForget {
        if let Err(error) = dispatcher.transport().fire_and_forget(command).await {
            warn!(error = %error, "bridge fire-and-forget failed");
        }
        return;
    }

    let verb = queue_name.rsplit(':').next().unwrap_or_default();
    let response = match verb {
        "subscribe" => handle_subscribe(dispatcher, outbound, session_tokens, &command).await,
        "unsubscribe" => handle_unsubscribe(dispatcher, session_tokens, &command).await,
        _ => forward_request(dispatcher, command.clone()).await,
    };

    match response {
        Ok(response) => {
            let _ = outbound.send(response);
        }
        Err(error) => {
            let response = Command::error_response_to(
                &command,
                dispatcher.transport().generate_id(),
                &error,
            );
            let _ = outbound.send(response);
        }
    }
}

async fn handle_subscribe(
    dispatcher: &Arc<Dispatcher>,
    outbound: &mpsc::UnboundedSender<Command>,
    session_tokens: &mut Vec<String>,
    command: &Command,
) -> Result<Command, StellarError> {
    let queue_name = command.headers.queue_name.as_deref().unwrap_or_default();
    let resource = queue_name
        .strip_suffix(":subscribe")
        .unwrap_or(queue_name)
        .to_string();
    let channel = command.body["channel"]
        .as_str()
        .ok_or_else(|| StellarError::new("subscribe requires a channel"))?
        .to_string();
    let payload = command.body.get("payload").cloned().unwrap_or(Value::Null);

    let mut options = CallOptions::new();
    if let Some(operation_id) = &command.headers.operation_id {
        options = options.operation_id(operation_id.clone());
    }
    if let Some(timeout) = command.headers.request_timeout {
        options = options.timeout(Duration::from_millis(timeout));
    }

    let deliveries = outbound.clone();
    let handler = subscription_handler(move |delivery: Command| {
        let deliveries = deliveries.clone();
        async move {
            let _ = deliveries.send(delivery);
        }
    });

    let result = dispatcher
        .subscribe(&resource, "", &channel, payload, handler, options)
        .await
        .map_err(|error| StellarError::new(error.to_string()))?;

    session_tokens.push(result.stopper_id.clone());
    Ok(Command::response_to(
        command,
        dispatcher.transport().generate_id(),
        json!({ "stopperId": result.stopper_id, "results": result.results }),
    ))
}

async fn handle_unsubscribe(
    dispatcher: &Arc<Dispatcher>,
    session_tokens: &mut Vec<String>,
    command: &Command,
) -> Result<Command, StellarError> {
    let token = command.body["stopperId"]
        .as_str()
        .ok_or_else(|| StellarError::new("unsubscribe requires a stopperId"))?;
    dispatcher.unsubscribe(token).await;
    session_tokens.retain(|t| t != token);
    Ok(Command::response_to(
        command,
        dispatcher.transport().generate_id(),
        json!({ "ok": true }),
    ))
}

async fn forward_request(
    dispatcher: &Arc<Dispatcher>,
    command: Command,
) -> Result<Command, StellarError> {
    let timeout = command
        .headers
        .request_timeout
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_TIMEOUT);
    dispatcher
        .transport()
        .request(command, timeout)
        .await
        .map_err(|error| StellarError::new(error.to_string()))
}
