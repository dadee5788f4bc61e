//! Error-reporting middleware.
//!
//! Reports unhandled errors crossing the pipeline boundary to a set of
//! configured reporter functions, exactly once per traversal, then
//! rethrows the error unchanged. Error kinds on the ignore list — by
//! default the structured business error, which represents a handled
//! rule failure — pass through untouched.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{Middleware, Next, PipelineError};
use crate::command::Command;
use crate::error::{ErrorKind, TransportError};

/// Function invoked with each reportable error and the command that
/// triggered it.
pub type Reporter = Arc<dyn Fn(&TransportError, &Command) + Send + Sync>;

/// Middleware reporting unhandled errors to external trackers.
pub struct ErrorReporter {
    reporters: Vec<Reporter>,
    ignore: Vec<ErrorKind>,
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorReporter {
    /// Create a reporter with the default ignore list: business
    /// rejections ([`ErrorKind::Handler`]) are never reported.
    pub fn new() -> Self {
        Self {
            reporters: Vec::new(),
            ignore: vec![ErrorKind::Handler],
        }
    }

    /// Add a reporter function. Returns `self` for chaining.
    pub fn reporter<F>(mut self, reporter: F) -> Self
    where
        F: Fn(&TransportError, &Command) + Send + Sync + 'static,
    {
        self.reporters.push(Arc::new(reporter));
        self
    }

    /// Add an error kind to the ignore list.
    pub fn ignore(mut self, kind: ErrorKind) -> Self {
        if !self.ignore.contains(&kind) {
            self.ignore.push(kind);
        }
        self
    }

    /// Replace the ignore list entirely.
    pub fn ignore_only(mut self, kinds: Vec<ErrorKind>) -> Self {
        self.ignore = kinds;
        self
    }
}

#[async_trait]
impl Middleware for ErrorReporter {
    async fn handle(&self, command: Command, next: Next<'_>) -> Result<Value, PipelineError> {
        let origin = command.clone();
        match next.run(command).await {
            Ok(value) => Ok(value),
            Err(mut error) => {
                if self.ignore.contains(&error.error().kind()) {
                    return Err(error);
                }
                if !error.is_reported() {
                    for reporter in &self.reporters {
                        reporter(error.error(), &origin);
                    }
                    error.mark_reported();
                }
                Err(error)
            }
        }
    }
}
