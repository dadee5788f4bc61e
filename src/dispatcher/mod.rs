//! Reactive dispatcher — session-scoped mapping from high-level method
//! calls to transport operations.
//!
//! `subscribe` turns a channel-based push stream into a stoppable
//! observable: it issues a reactive request (a channel subscription plus
//! an initial-snapshot request), stores the resulting stopper under a
//! fresh opaque token, and hands the token back so the caller can later
//! `unsubscribe`. Everything else forwards as ordinary requests against
//! `resource[:path]:method` queue names.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use crate::command::Command;
use crate::error::TransportError;
use crate::id::IdSource;
use crate::stopper::Stopper;
use crate::transport::{SubscriptionHandler, Transport};

/// Default response window when the caller does not specify one.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-call options.
#[derive(Clone, Debug, Default)]
pub struct CallOptions {
    /// Logical operation/session id. When present, reactive subscriptions
    /// are namespaced as `op:{operationId}:{channel}` so unrelated callers
    /// on the same raw channel never cross-deliver.
    pub operation_id: Option<String>,
    /// Response window override.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of a reactive subscribe: the opaque stopper token and the
/// initial result snapshot.
#[derive(Debug)]
pub struct SubscribeResult {
    pub stopper_id: String,
    pub results: Value,
}

/// Session-scoped dispatcher over a [`Transport`].
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    stoppers: Mutex<HashMap<String, Stopper>>,
    ids: IdSource,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            stoppers: Mutex::new(HashMap::new()),
            ids: IdSource::new(),
        }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Active reactive subscriptions.
    pub fn active_subscriptions(&self) -> usize {
        self.stoppers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    /// Stop the subscription registered under `token`.
    ///
    /// Always succeeds: an unknown (or already stopped) token is a no-op.
    /// The registry entry is removed atomically, so concurrent calls for
    /// the same token invoke the stopper at most once.
    pub async fn unsubscribe(&self, token: &str) {
        let stopper = self
            .stoppers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(token);
        if let Some(stopper) = stopper {
            stopper.stop().await;
        }
    }

    /// Start a reactive subscription.
    ///
    /// Subscribes `handler` to the (possibly operation-namespaced)
    /// channel, requests the initial result snapshot from
    /// `resource[:path]:subscribe`, and registers the stopper under a
    /// fresh opaque token.
    pub async fn subscribe(
        &self,
        resource: &str,
        path: &str,
        channel: &str,
        payload: Value,
        handler: SubscriptionHandler,
        options: CallOptions,
    ) -> Result<SubscribeResult, TransportError> {
        let channel_name = match &options.operation_id {
            Some(operation_id) => format!("op:{}:{}", operation_id, channel),
            None => channel.to_string(),
        };

        let stopper = self.transport.subscribe(&channel_name, handler).await?;

        let mut command = Command::request(method_url(resource, path, "subscribe"), "", payload);
        command.headers.operation_id = options.operation_id.clone();

        let timeout = options.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let results = match self.transport.request(command, timeout).await {
            Ok(response) => match response.into_result() {
                Ok(value) => value,
                Err(error) => {
                    stopper.stop().await;
                    return Err(TransportError::Handler(error));
                }
            },
            Err(error) => {
                // The snapshot never arrived; don't leak the channel
                // subscription.
                stopper.stop().await;
                return Err(error);
            }
        };

        let stopper_id = self.ids.generate();
        self.stoppers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(stopper_id.clone(), stopper);

        Ok(SubscribeResult {
            stopper_id,
            results,
        })
    }

    /// Forward a method call as `request(resource[:path]:method, payload)`.
    ///
    /// Error responses from the remote handler surface as
    /// [`TransportError::Handler`].
    pub async fn request(
        &self,
        resource: &str,
        path: &str,
        method: &str,
        payload: Value,
        options: CallOptions,
    ) -> Result<Value, TransportError> {
        let mut command = Command::request(method_url(resource, path, method), "", payload);
        command.headers.operation_id = options.operation_id.clone();

        let timeout = options.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let response = self.transport.request(command, timeout).await?;
        response.into_result().map_err(TransportError::Handler)
    }

    pub async fn get(
        &self,
        resource: &str,
        path: &str,
        payload: Value,
        options: CallOptions,
    ) -> Result<Value, TransportError> {
        self.request(resource, path, "get", payload, options).await
    }

    pub async fn create(
        &self,
        resource: &str,
        path: &str,
        payload: Value,
        options: CallOptions,
    ) -> Result<Value, TransportError> {
        self.request(resource, path, "create", payload, options)
            .await
    }

    pub async fn update(
        &self,
        resource: &str,
        path: &str,
        payload: Value,
        options: CallOptions,
    ) -> Result<Value, TransportError> {
        self.request(resource, path, "update", payload, options)
            .await
    }

    pub async fn remove(
        &self,
        resource: &str,
        path: &str,
        payload: Value,
        options: CallOptions,
    ) -> Result<Value, TransportError> {
        self.request(resource, path, "remove", payload, options)
            .await
    }

    /// Send without awaiting a response.
    pub async fn fire_and_forget(
        &self,
        resource: &str,
        path: &str,
        method: &str,
        payload: Value,
    ) -> Result<(), TransportError> {
        let command = Command::fire_and_forget(method_url(resource, path, method), payload);
        self.transport.fire_and_forget(command).await
    }
}

/// `resource:method`, or `resource:path:method` when a sub-path is given.
fn method_url(resource: &str, path: &str, method: &str) -> String {
    if path.is_empty() {
        format!("{}:{}", resource, method)
    } else {
        format!("{}:{}:{}", resource, path, method)
    }
}
