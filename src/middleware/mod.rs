//! Middleware pipeline — ordered interceptors around handler invocation
//! and outbound dispatch.
//!
//! A middleware wraps the remainder of the chain through a typed [`Next`]
//! continuation. Registrations are made once at startup with
//! [`Pipeline::use_middleware`]; per-command traversal selects the entries
//! whose [`Pattern`] matches the command's `queueName` and composes them
//! right-to-left around the terminal operation (the real handler
//! invocation, or the outbound send).
//!
//! ## Example
//!
//! ```
//! use stellar_rust::middleware::{ErrorReporter, Pipeline, Trace};
//! use stellar_rust::routing::Pattern;
//!
//! let mut pipeline = Pipeline::new();
//! pipeline.use_middleware(Pattern::Any, Trace::new());
//! pipeline.use_middleware(Pattern::Any, ErrorReporter::new());
//! ```

mod reporting;
mod trace;

pub use reporting::{ErrorReporter, Reporter};
pub use trace::Trace;

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::command::Command;
use crate::error::{StellarError, TransportError};
use crate::routing::Pattern;

/// Error flowing through a pipeline traversal.
///
/// Wraps the underlying [`TransportError`] with a marker recording whether
/// a reporting middleware already saw it, so an error crossing several
/// reporting layers is reported exactly once per traversal.
#[derive(Debug)]
pub struct PipelineError {
    error: TransportError,
    reported: bool,
}

impl PipelineError {
    pub fn new(error: TransportError) -> Self {
        Self {
            error,
            reported: false,
        }
    }

    /// The wrapped error.
    pub fn error(&self) -> &TransportError {
        &self.error
    }

    /// Unwrap into the underlying transport error.
    pub fn into_error(self) -> TransportError {
        self.error
    }

    /// Whether a reporting middleware already handled this error.
    pub fn is_reported(&self) -> bool {
        self.reported
    }

    /// Mark this error as reported; later reporting layers skip it.
    pub fn mark_reported(&mut self) {
        self.reported = true;
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for PipelineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.error)
    }
}

impl From<TransportError> for PipelineError {
    fn from(error: TransportError) -> Self {
        Self::new(error)
    }
}

impl From<StellarError> for PipelineError {
    fn from(error: StellarError) -> Self {
        Self::new(TransportError::Handler(error))
    }
}

type TerminalFuture = Pin<Box<dyn Future<Output = Result<Value, PipelineError>> + Send>>;
type Terminal<'a> = &'a (dyn Fn(Command) -> TerminalFuture + Send + Sync);

/// The remainder of the chain; calling [`Next::run`] invokes it.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    terminal: Terminal<'a>,
}

impl<'a> Next<'a> {
    /// Invoke the rest of the chain with `command`, ending at the
    /// terminal operation.
    pub fn run(
        self,
        command: Command,
    ) -> Pin<Box<dyn Future<Output = Result<Value, PipelineError>> + Send + 'a>> {
        Box::pin(async move {
            match self.chain.split_first() {
                Some((middleware, rest)) => {
                    middleware
                        .handle(
                            command,
                            Next {
                                chain: rest,
                                terminal: self.terminal,
                            },
                        )
                        .await
                }
                None => (self.terminal)(command).await,
            }
        })
    }
}

/// An interceptor wrapping the rest of the chain.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, command: Command, next: Next<'_>) -> Result<Value, PipelineError>;
}

/// The ordered set of middleware registrations.
///
/// Built once at startup; each registration pairs a route [`Pattern`]
/// with a middleware. Traversal order is registration order (the first
/// registered middleware is outermost).
#[derive(Clone, Default)]
pub struct Pipeline {
    entries: Vec<(Pattern, Arc<dyn Middleware>)>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `middleware` for commands whose `queueName` matches
    /// `pattern`. Returns `&mut self` for chaining.
    pub fn use_middleware(
        &mut self,
        pattern: impl Into<Pattern>,
        middleware: impl Middleware + 'static,
    ) -> &mut Self {
        self.entries.push((pattern.into(), Arc::new(middleware)));
        self
    }

    /// Number of registered middlewares.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run `command` through the matching middlewares down to `terminal`.
    ///
    /// Commands without a `queueName` match only `Pattern::Any`
    /// registrations.
    pub async fn run<F, Fut>(&self, command: Command, terminal: F) -> Result<Value, PipelineError>
    where
        F: Fn(Command) -> Fut + Send + Sync,
        Fut: Future<Output = Result<Value, PipelineError>> + Send + 'static,
    {
        let url = command.headers.queue_name.clone().unwrap_or_default();
        let selected: Vec<Arc<dyn Middleware>> = self
            .entries
            .iter()
            .filter(|(pattern, _)| pattern.matches(&url))
            .map(|(_, middleware)| Arc::clone(middleware))
            .collect();

        let terminal = move |command: Command| -> TerminalFuture { Box::pin(terminal(command)) };
        Next {
            chain: &selected,
            terminal: &terminal,
        }
        .run(command)
        .await
    }
}
