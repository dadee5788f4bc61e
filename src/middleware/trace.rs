//! Tracing middleware.
//!
//! Opens a span per handled command, keyed by its `queueName`, with the
//! command body attached as span metadata. Commands without a `queueName`
//! pass through untouched. On failure the error is recorded before the
//! rejection propagates.

use async_trait::async_trait;
use serde_json::Value;
use tracing::Instrument;

use super::{Middleware, Next, PipelineError};
use crate::command::Command;

/// Middleware emitting a `tracing` span around each command.
#[derive(Clone, Copy, Debug, Default)]
pub struct Trace;

impl Trace {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Middleware for Trace {
    async fn handle(&self, command: Command, next: Next<'_>) -> Result<Value, PipelineError> {
        let Some(queue_name) = command.headers.queue_name.clone() else {
            return next.run(command).await;
        };

        let span = tracing::info_span!(
            "stellar.command",
            queue_name = %queue_name,
            body = %command.body,
        );
        match next.run(command).instrument(span).await {
            Ok(value) => Ok(value),
            Err(error) => {
                tracing::error!(
                    queue_name = %queue_name,
                    error = %error,
                    "command failed",
                );
                Err(error)
            }
        }
    }
}
