//! Wire transport to the remote fact log.
//!
//! `Transport` is the one external collaborator the engine cannot do
//! without; it is kept deliberately narrow, mirroring the `EventBus`
//! trait's publish/subscribe split, but generalized from plain
//! topic-string subscriptions to [`FactSpec`]-filtered ones carrying an
//! explicit catchup/follow mode and an observer lifecycle, per the
//! subscription driver's needs.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::Result;
use crate::fact::{Cursor, Fact, FactSpec};

/// Whether a subscription should stop once it reaches the head of the
/// log (`Catchup`) or keep consuming indefinitely (`Follow`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionMode {
    /// Bounded replay: deliver everything up to the log's current head,
    /// then call `on_catchup` and complete.
    Catchup,
    /// Unbounded live subscription: keep delivering facts as they
    /// arrive, never completing on its own.
    Follow,
}

/// A subscription request.
#[derive(Clone, Debug)]
pub struct SubscriptionRequest {
    /// Consumption mode.
    pub mode: SubscriptionMode,
    /// Fact filters; a fact matching any one spec is delivered.
    pub specs: Vec<FactSpec>,
    /// Cursor to resume from; `None` starts from the beginning.
    pub from_cursor: Option<Cursor>,
}

/// Callbacks a [`SubscriptionDriver`](../../factflow_runtime/subscription/struct.SubscriptionDriver.html)
/// invokes as a subscription progresses.
///
/// All methods take `&self`; implementations that need mutable state
/// should use interior mutability (matching `ManagedProjection::execute_update`'s
/// pattern elsewhere in the runtime).
pub trait SubscriptionObserver: Send + Sync {
    /// Called for every fact delivered, in order, never overlapping with
    /// another call.
    fn on_next(&self, fact: &Fact) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Called exactly once, only in `Catchup` mode, when the head of the
    /// log at subscription time has been reached.
    fn on_catchup(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    /// Called when the subscription ends without error (catchup
    /// complete, or `Subscription::close` was invoked).
    fn on_complete(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    /// Called when the subscription ends because of an error. The
    /// subscription is considered terminated after this call.
    fn on_error(&self, error: &crate::error::CoreError) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// A handle to a live subscription.
pub trait Subscription: Send + Sync {
    /// Block (asynchronously) until the subscription completes, or
    /// until `max_wait` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::CoreError::CatchupTimeout`] if `max_wait`
    /// elapses first.
    fn await_complete(
        &self,
        max_wait: Option<Duration>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Stop the subscription. Idempotent.
    fn close(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

impl fmt::Debug for dyn Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// Wire transport to the remote fact log.
///
/// Trait-object friendly (`Pin<Box<dyn Future>>` return types) since
/// implementations are held behind `Arc<dyn Transport>` by the
/// projection engine, the same rationale `EventBus` and `EventStore`
/// document for their own method shapes.
pub trait Transport: Send + Sync {
    /// Publish `facts`, all-or-nothing.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::CoreError::Transport`] on failure.
    fn publish(&self, facts: Vec<Fact>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Start a subscription matching `request`, delivering to `observer`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::CoreError::Transport`] if the subscription
    /// could not be established.
    fn subscribe(
        &self,
        request: SubscriptionRequest,
        observer: std::sync::Arc<dyn SubscriptionObserver>,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn Subscription>>> + Send + '_>>;
}
