//! Stopper — a one-shot, idempotent deregistration closure.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

type StopFn = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// A zero-argument deregistration closure for a previously started
/// subscription or consumer.
///
/// Invoking [`Stopper::stop`] more than once is a no-op, never an error:
/// the underlying closure is taken out atomically on first call.
///
/// ```
/// # use stellar_rust::Stopper;
/// # async fn demo() {
/// let stopper = Stopper::new(|| async { /* unregister */ });
/// stopper.stop().await;
/// stopper.stop().await; // no-op
/// # }
/// ```
pub struct Stopper {
    stop: Mutex<Option<StopFn>>,
}

impl Stopper {
    /// Wrap an async deregistration closure.
    pub fn new<F, Fut>(stop: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            stop: Mutex::new(Some(Box::new(move || Box::pin(stop())))),
        }
    }

    /// A stopper with nothing to do.
    pub fn noop() -> Self {
        Self::new(|| async {})
    }

    /// Invoke the deregistration closure; subsequent calls do nothing.
    pub async fn stop(&self) {
        let stop = self
            .stop
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(stop) = stop {
            stop().await;
        }
    }

    /// Whether `stop` has already been invoked.
    pub fn is_stopped(&self) -> bool {
        self.stop
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }
}

impl std::fmt::Debug for Stopper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stopper")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
