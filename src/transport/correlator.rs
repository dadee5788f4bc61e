//! Request correlator — the pending-waiter table.
//!
//! Pairs an outbound request carrying a generated `id` with the inbound
//! response carrying that id as `requestId`. Each id resolves exactly one
//! waiter; responses for unknown or already-resolved ids are dropped
//! silently (duplicate delivery tolerance). Waiters are removed on
//! resolve *or* timeout so the table never grows unbounded.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::command::Command;
use crate::error::TransportError;

pub(crate) struct Correlator {
    pending: Mutex<HashMap<String, oneshot::Sender<Command>>>,
}

impl Correlator {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Record a one-shot waiter for `id`. Must be called before the
    /// request is dispatched so a fast response cannot race registration.
    pub(crate) fn register(&self, id: &str) -> oneshot::Receiver<Command> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id.to_string(), tx);
        rx
    }

    /// Resolve the waiter matching the response's `requestId`, if any.
    ///
    /// Lookup-and-remove happens under one lock acquisition, so a given id
    /// resolves at most once even under concurrent duplicate deliveries.
    pub(crate) fn resolve(&self, response: Command) -> bool {
        let Some(request_id) = response.headers.request_id.clone() else {
            debug!("dropping response without requestId");
            return false;
        };
        let waiter = self
            .pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&request_id);
        match waiter {
            Some(tx) => tx.send(response).is_ok(),
            None => {
                // Unknown, already-resolved, or timed-out id.
                debug!(request_id = %request_id, "dropping uncorrelated response");
                false
            }
        }
    }

    /// Remove a stale waiter (timeout, abandoned call).
    pub(crate) fn remove(&self, id: &str) {
        self.pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(id);
    }

    /// Drop every pending waiter; their futures fail with `Reset`.
    pub(crate) fn clear(&self) {
        self.pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    /// Suspend until the waiter registered for `id` resolves, or fail
    /// with `Timeout` after `timeout` (removing the stale waiter).
    pub(crate) async fn wait(
        &self,
        id: &str,
        rx: oneshot::Receiver<Command>,
        timeout: Duration,
    ) -> Result<Command, TransportError> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            // Sender dropped: the table was cleared by reset().
            Ok(Err(_)) => Err(TransportError::Reset),
            Err(_) => {
                self.remove(id);
                Err(TransportError::Timeout)
            }
        }
    }
}
