//! LIFO shutdown-hook registry.
//!
//! Replaces a heterogeneous closer drop-box with a typed registry of
//! [`ShutdownHook`] trait objects, drained most-recently-registered-first
//! on [`ProjectionEngine::close`](crate::engine::ProjectionEngine::close).

use std::future::Future;
use std::pin::Pin;

use parking_lot::Mutex;

/// A resource the engine must close when it shuts down.
pub trait ShutdownHook: Send {
    /// Close the resource. Errors are logged, not propagated, so one
    /// failing hook does not prevent the rest from running.
    fn shutdown(self: Box<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// A [`ShutdownHook`] built from a plain async closure, for callers that
/// don't want to define a dedicated type.
pub struct FnShutdownHook<F> {
    name: &'static str,
    run: Option<F>,
}

impl<F, Fut> FnShutdownHook<F>
where
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = ()> + Send + 'static,
{
    /// Wrap `run` as a named shutdown hook.
    pub fn new(name: &'static str, run: F) -> Self {
        Self { name, run: Some(run) }
    }
}

impl<F, Fut> ShutdownHook for FnShutdownHook<F>
where
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn shutdown(mut self: Box<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let name = self.name;
        let run = self.run.take();
        Box::pin(async move {
            if let Some(run) = run {
                tracing::debug!(hook = name, "running shutdown hook");
                run().await;
            }
        })
    }
}

/// The set of managed objects an engine closes on shutdown.
///
/// Protected by an internal lock (mirrors the data model's
/// `managedObjects` set), drained in LIFO order so resources are torn
/// down in the reverse of their registration order.
#[derive(Default)]
pub struct ManagedRegistry {
    hooks: Mutex<Vec<Box<dyn ShutdownHook>>>,
}

impl ManagedRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook, to be run on `drain_and_close`.
    pub fn register(&self, hook: Box<dyn ShutdownHook>) {
        self.hooks.lock().push(hook);
    }

    /// Drain all registered hooks and run them in LIFO order.
    pub async fn drain_and_close(&self) {
        let hooks: Vec<_> = std::mem::take(&mut *self.hooks.lock());
        for hook in hooks.into_iter().rev() {
            hook.shutdown().await;
        }
    }

    /// Number of hooks currently registered (for tests).
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.lock().len()
    }

    /// Whether no hooks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.lock().is_empty()
    }
}
