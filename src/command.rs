//! Command — the envelope exchanged between services.
//!
//! A `Command` is the unit of exchange: a set of routing/correlation
//! `Headers` plus an opaque JSON `body`. Commands are immutable once
//! dispatched; a response is always a *new* command whose `requestId`
//! header equals the originating request's `id`.
//!
//! ## Wire shape
//!
//! Commands serialize to camelCase JSON:
//!
//! ```json
//! {
//!   "headers": {
//!     "queueName": "orders:order:get",
//!     "id": "51545700000:k3jf9a",
//!     "type": "request",
//!     "source": "51545700001:ab12cd"
//!   },
//!   "body": { "orderId": "o-1" }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StellarError;

/// How a command travels: awaited call, reply, one-way send, or broadcast.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommandType {
    /// Point-to-point call expecting exactly one response.
    Request,
    /// Reply to a request, correlated via `requestId`.
    Response,
    /// Point-to-point send with no response expected.
    FireAndForget,
    /// Channel broadcast delivered to registered subscribers.
    Publish,
}

/// Routing and correlation headers carried by every command.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Headers {
    /// Colon-delimited route: target service, resource, and verb.
    /// On publish deliveries this carries the channel instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_name: Option<String>,
    /// Unique per command instance.
    pub id: String,
    /// Present only on responses; equals the originating request's `id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: CommandType,
    /// Logical operation/session scoping for reactive streams.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    /// Requested response window in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    /// Node id of the sender; the response inbox is derived from it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Set on error responses to the name of the carried error type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl Headers {
    fn new(kind: CommandType, id: impl Into<String>) -> Self {
        Self {
            queue_name: None,
            id: id.into(),
            request_id: None,
            kind,
            operation_id: None,
            request_timeout: None,
            source: None,
            error_type: None,
        }
    }
}

/// The unit of exchange between services: headers + opaque JSON body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub headers: Headers,
    #[serde(default)]
    pub body: Value,
}

impl Command {
    /// Create a request command targeting `queue_name`.
    ///
    /// The `id` may be left empty; the transport fills in a generated id
    /// at dispatch time if so.
    pub fn request(
        queue_name: impl Into<String>,
        id: impl Into<String>,
        body: Value,
    ) -> Self {
        let mut headers = Headers::new(CommandType::Request, id);
        headers.queue_name = Some(queue_name.into());
        Self { headers, body }
    }

    /// Create a fire-and-forget command targeting `queue_name`.
    pub fn fire_and_forget(queue_name: impl Into<String>, body: Value) -> Self {
        let mut headers = Headers::new(CommandType::FireAndForget, "");
        headers.queue_name = Some(queue_name.into());
        Self { headers, body }
    }

    /// Create a publish delivery for `channel`.
    ///
    /// The channel rides in the `queueName` header so subscription handlers
    /// can tell which channel a delivery came from.
    pub fn publish(channel: impl Into<String>, id: impl Into<String>, body: Value) -> Self {
        let mut headers = Headers::new(CommandType::Publish, id);
        headers.queue_name = Some(channel.into());
        Self { headers, body }
    }

    /// Create the success response to `request`.
    ///
    /// The response gets a fresh `id` and carries the request's `id` as its
    /// `requestId` correlation key.
    pub fn response_to(request: &Command, id: impl Into<String>, body: Value) -> Self {
        let mut headers = Headers::new(CommandType::Response, id);
        headers.queue_name = request.headers.queue_name.clone();
        headers.request_id = Some(request.headers.id.clone());
        Self { headers, body }
    }

    /// Create the error response to `request`, carrying the serialized error.
    pub fn error_response_to(
        request: &Command,
        id: impl Into<String>,
        error: &StellarError,
    ) -> Self {
        let mut response = Self::response_to(
            request,
            id,
            serde_json::to_value(error).unwrap_or(Value::Null),
        );
        response.headers.error_type = Some("StellarError".to_string());
        response
    }

    /// Whether this is an error response.
    pub fn is_error(&self) -> bool {
        self.headers.error_type.is_some()
    }

    /// Interpret a response command as a handler outcome.
    ///
    /// Error responses deserialize their body back into the structured
    /// error; anything else yields the body as the success value.
    pub fn into_result(self) -> Result<Value, StellarError> {
        if self.is_error() {
            let error = serde_json::from_value::<StellarError>(self.body.clone())
                .unwrap_or_else(|_| StellarError::new(self.body.to_string()));
            Err(error)
        } else {
            Ok(self.body)
        }
    }
}
