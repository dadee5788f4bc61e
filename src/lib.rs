//! stellar_rust — transport-agnostic messaging for distributed services.
//!
//! Services exchange request/response calls, fire-and-forget
//! notifications, and publish/subscribe events across pluggable backends.
//! The abstraction makes asynchronous, at-least-once, possibly
//! cross-process messaging primitives look like ordinary request/response
//! and subscribe/unsubscribe calls to application code.
//!
//! ## Quick start
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use serde_json::json;
//! use stellar_rust::queue::InMemoryQueueSystem;
//! use stellar_rust::transport::{request_handler, QueueTransport, Transport};
//! use stellar_rust::Command;
//!
//! # async fn demo() -> Result<(), stellar_rust::TransportError> {
//! let queue = Arc::new(InMemoryQueueSystem::new());
//! let transport = QueueTransport::new(queue);
//!
//! // Service side: register a handler for a queue name.
//! transport
//!     .add_request_handler(
//!         "orders:order:get",
//!         request_handler(|cmd: Command| async move {
//!             Ok(json!({ "orderId": cmd.body["orderId"], "status": "shipped" }))
//!         }),
//!     )
//!     .await?;
//!
//! // Client side: an awaitable call over a fire-and-forget queue send.
//! let response = transport
//!     .request(
//!         Command::request("orders:order:get", "", json!({ "orderId": "o-1" })),
//!         Duration::from_secs(5),
//!     )
//!     .await?;
//! assert_eq!(response.body["status"], "shipped");
//! # Ok(())
//! # }
//! ```

mod command;
mod error;
mod id;
mod stopper;

pub mod dispatcher;
pub mod middleware;
pub mod queue;
pub mod routing;
pub mod transport;

#[cfg(feature = "http")]
pub mod bridge;

pub use command::{Command, CommandType, Headers};
pub use dispatcher::{CallOptions, Dispatcher, SubscribeResult};
pub use error::{ErrorKind, QueueError, StellarError, TransportError};
pub use id::IdSource;
pub use middleware::{ErrorReporter, Middleware, Next, Pipeline, PipelineError, Trace};
pub use queue::{InMemoryQueueSystem, QueueSystem};
pub use routing::Pattern;
pub use stopper::Stopper;
pub use transport::{
    Capability, CapabilitySet, QueueTransport, RequestHandler, SubscriptionHandler, Transport,
};
