//! Optimistic-locked publish with bounded retry.
//!
//! Mirrors the freshen → invoke → conditional-publish → retry-on-conflict
//! loop: the caller's publish closure is re-run against a freshly
//! refreshed projection each time a concurrent writer wins the race,
//! up to a configurable bound.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use factflow_core::{CoreError, Fact, ManagedProjection, Transport};

use crate::error::{EngineError, Result};

/// Guards against a `with_lock_on` call re-entering itself on the same
/// engine.
///
/// Realized as an explicit marker rather than thread-local state: the
/// coordinator flips an `AtomicBool` for the duration of the call and a
/// second concurrent call observes it set, rather than relying on
/// ambient per-thread flags that don't compose with work spawned onto a
/// different task.
#[derive(Default)]
pub struct LockContext {
    in_flight: AtomicBool,
}

impl LockContext {
    /// Create a fresh, unlocked context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn enter(&self) -> Result<LockGuard<'_>> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return Err(EngineError::Core(CoreError::NestedLock));
        }
        Ok(LockGuard { context: self })
    }
}

struct LockGuard<'a> {
    context: &'a LockContext,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.context.in_flight.store(false, Ordering::Release);
    }
}

/// Coordinates optimistic-locked publish attempts for a single projection
/// at a time.
pub struct LockingCoordinator<T> {
    transport: Arc<T>,
    context: LockContext,
}

impl<T: Transport> LockingCoordinator<T> {
    /// Build a coordinator over `transport`.
    #[must_use]
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            context: LockContext::new(),
        }
    }

    /// Publish `facts` directly, outside the retry loop.
    ///
    /// Shares `with_lock_on`'s [`LockContext`], so a plain publish made
    /// while a `with_lock_on` call is in flight on this coordinator is
    /// rejected the same way a publish attempted from inside its closure
    /// would be.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NestedLock`] if a `with_lock_on` call is
    /// currently in flight, or whatever error the transport surfaces.
    pub async fn publish(&self, facts: Vec<Fact>) -> Result<()> {
        let _guard = self.context.enter()?;
        self.transport.publish(facts).await.map_err(Into::into)
    }

    /// Run `publish` against `projection` under the optimistic-publish
    /// protocol: freshen the projection via `refresh` (a catchup against
    /// the transport), invoke `publish` to compute candidate facts from
    /// the refreshed state, attempt to append them, and on a
    /// concurrent-modification conflict, refresh and retry up to
    /// `retry_bound` times.
    ///
    /// `refresh` runs before every attempt, including the first, so the
    /// publish closure always sees a projection caught up to the latest
    /// observed cursor (spec step 1's "freshly catch up P"). If `publish`
    /// yields no candidate facts, returns `Ok(vec![])` without issuing a
    /// transport publish.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NestedLock`] if another `with_lock_on` call
    /// is already in flight on this coordinator, [`EngineError::LockExceeded`]
    /// once `retry_bound` attempts have all lost the race, or whatever
    /// error `refresh`/the transport surface.
    pub async fn with_lock_on<P, F, Fut>(
        &self,
        projection: &P,
        retry_bound: u32,
        mut refresh: impl FnMut() -> Fut,
        mut publish: F,
    ) -> Result<Vec<factflow_core::FactId>>
    where
        P: ManagedProjection,
        F: FnMut(&P::State) -> Vec<Fact>,
        Fut: Future<Output = factflow_core::Result<()>>,
    {
        let _guard = self.context.enter()?;

        let mut attempt = 0;
        loop {
            refresh().await?;

            let candidates = projection.execute_update(|p| publish(p));
            if candidates.is_empty() {
                return Ok(Vec::new());
            }
            let ids = candidates.iter().map(|f| f.id).collect::<Vec<_>>();

            match self.transport.publish(candidates).await {
                Ok(()) => return Ok(ids),
                Err(CoreError::ConcurrentModification { aggregate_id }) => {
                    if attempt >= retry_bound {
                        return Err(EngineError::LockExceeded {
                            attempts: attempt + 1,
                            last: CoreError::ConcurrentModification { aggregate_id },
                        });
                    }
                    tracing::warn!(attempt, aggregate_id, "publish conflicted, retrying");
                    attempt += 1;
                }
                Err(other) => return Err(other.into()),
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use factflow_core::fact::Cursor;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::AtomicUsize;

    struct FlakyTransport {
        conflicts_remaining: AtomicUsize,
        published: Arc<std::sync::Mutex<Vec<Fact>>>,
    }

    impl Transport for FlakyTransport {
        fn publish(
            &self,
            facts: Vec<Fact>,
        ) -> Pin<Box<dyn Future<Output = factflow_core::Result<()>> + Send + '_>> {
            Box::pin(async move {
                if self.conflicts_remaining.load(Ordering::SeqCst) > 0 {
                    self.conflicts_remaining.fetch_sub(1, Ordering::SeqCst);
                    return Err(CoreError::ConcurrentModification {
                        aggregate_id: "order-1".to_string(),
                    });
                }
                self.published.lock().unwrap().extend(facts);
                Ok(())
            })
        }

        fn subscribe(
            &self,
            _request: factflow_core::SubscriptionRequest,
            _observer: Arc<dyn factflow_core::SubscriptionObserver>,
        ) -> Pin<Box<dyn Future<Output = factflow_core::Result<Box<dyn factflow_core::Subscription>>> + Send + '_>>
        {
            Box::pin(async { Err(CoreError::Transport("not supported in test".to_string())) })
        }
    }

    struct Counter {
        total: std::sync::Mutex<i64>,
    }

    impl ManagedProjection for Counter {
        type State = i64;

        fn cursor(&self) -> Cursor {
            Cursor::beginning()
        }

        fn execute_update<R>(&self, f: impl FnOnce(&mut i64) -> R) -> R {
            let mut guard = self.total.lock().unwrap();
            f(&mut guard)
        }

        fn advance_cursor(&self, _cursor: Cursor) {}
    }

    #[tokio::test]
    async fn retries_until_conflict_clears() {
        let transport = FlakyTransport {
            conflicts_remaining: AtomicUsize::new(2),
            published: Arc::new(std::sync::Mutex::new(Vec::new())),
        };
        let coordinator = LockingCoordinator::new(Arc::new(transport));
        let projection = Counter { total: std::sync::Mutex::new(0) };

        let result = coordinator
            .with_lock_on(
                &projection,
                5,
                || async { Ok(()) },
                |_p| vec![Fact::new("ns", "T", 1, vec![])],
            )
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn gives_up_after_retry_bound_exhausted() {
        let transport = FlakyTransport {
            conflicts_remaining: AtomicUsize::new(10),
            published: Arc::new(std::sync::Mutex::new(Vec::new())),
        };
        let coordinator = LockingCoordinator::new(Arc::new(transport));
        let projection = Counter { total: std::sync::Mutex::new(0) };

        let result = coordinator
            .with_lock_on(
                &projection,
                2,
                || async { Ok(()) },
                |_p| vec![Fact::new("ns", "T", 1, vec![])],
            )
            .await;

        assert!(matches!(result, Err(EngineError::LockExceeded { attempts: 3, .. })));
    }

    #[tokio::test]
    async fn empty_candidates_short_circuit_without_publishing() {
        let transport = FlakyTransport {
            conflicts_remaining: AtomicUsize::new(0),
            published: Arc::new(std::sync::Mutex::new(Vec::new())),
        };
        let published = transport.published.clone();
        let coordinator = LockingCoordinator::new(Arc::new(transport));
        let projection = Counter { total: std::sync::Mutex::new(0) };

        let result = coordinator
            .with_lock_on(&projection, 5, || async { Ok(()) }, |_p| vec![])
            .await;

        assert_eq!(result.unwrap(), Vec::new());
        assert!(published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_nested_call_on_same_coordinator() {
        let transport = FlakyTransport {
            conflicts_remaining: AtomicUsize::new(0),
            published: Arc::new(std::sync::Mutex::new(Vec::new())),
        };
        let coordinator = LockingCoordinator::new(Arc::new(transport));
        let projection = Counter { total: std::sync::Mutex::new(0) };

        let _guard = coordinator.context.enter().unwrap();
        let result = coordinator
            .with_lock_on(&projection, 1, || async { Ok(()) }, |_p| vec![])
            .await;

        assert!(matches!(result, Err(EngineError::Core(CoreError::NestedLock))));
    }
}
