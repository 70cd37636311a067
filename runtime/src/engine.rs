//! The projection engine: composes the subscription driver, locking
//! coordinator, snapshot repositories and managed-object registry into
//! the runtime's single public orchestrating surface.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::time::sleep;

use factflow_core::{
    Aggregate, CoreError, Cursor, Fact, FactConverter, FactId, ManagedProjection, PayloadCodec,
    Projector, SnapshotCache, SnapshotProjection, Subscription, SubscribedProjection, ToFact,
    Transport,
};
use factflow_projections::{AggregateSnapshotRepository, ProjectionSnapshotRepository};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::locking::LockingCoordinator;
use crate::managed::{FnShutdownHook, ManagedRegistry};
use crate::metrics::EngineMetrics;
use crate::subscription::SubscriptionDriver;

/// Wraps a plain value behind the [`ManagedProjection`] critical section
/// so `fetch`/`find` can drive it through the same
/// [`SubscriptionDriver::run_catchup`] path a continuously managed
/// projection uses, without requiring the application to implement
/// `ManagedProjection` for a one-shot value.
struct SnapshotCell<P> {
    state: Mutex<P>,
    cursor: Mutex<Cursor>,
}

impl<P: Send> ManagedProjection for SnapshotCell<P> {
    type State = P;

    fn cursor(&self) -> Cursor {
        *self.cursor.lock()
    }

    fn execute_update<R>(&self, f: impl FnOnce(&mut P) -> R) -> R {
        let mut guard = self.state.lock();
        f(&mut guard)
    }

    fn advance_cursor(&self, cursor: Cursor) {
        *self.cursor.lock() = cursor;
    }
}

/// Orchestrates fact-sourced projections: encoding and publishing
/// events, materializing snapshot-backed projections on demand, keeping
/// managed projections current, and coordinating optimistic-locked
/// publish, all on top of a single `Transport` and `SnapshotCache` pair.
pub struct ProjectionEngine<T, C, K> {
    driver: SubscriptionDriver<T>,
    locking: LockingCoordinator<T>,
    converter: FactConverter<K>,
    codec: K,
    projection_snapshots: ProjectionSnapshotRepository<C, K>,
    aggregate_snapshots: AggregateSnapshotRepository<C, K>,
    registry: ManagedRegistry,
    config: EngineConfig,
    closed: AtomicBool,
}

impl<T, C, K> ProjectionEngine<T, C, K>
where
    T: Transport + 'static,
    C: SnapshotCache + 'static,
    K: PayloadCodec + Clone,
{
    /// Build an engine over `transport` and `cache`, encoding payloads
    /// and snapshots with `codec`.
    #[must_use]
    pub fn new(transport: Arc<T>, cache: Arc<C>, codec: K, config: EngineConfig) -> Self {
        Self {
            driver: SubscriptionDriver::new(transport.clone()),
            locking: LockingCoordinator::new(transport),
            converter: FactConverter::new(codec.clone()),
            projection_snapshots: ProjectionSnapshotRepository::new(cache.clone(), codec.clone()),
            aggregate_snapshots: AggregateSnapshotRepository::new(cache, codec.clone()),
            codec,
            registry: ManagedRegistry::new(),
            config,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::Core(CoreError::Closed));
        }
        Ok(())
    }

    /// Encode `event` to a fact and publish it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Closed`] if the engine is closed,
    /// [`CoreError::NestedLock`] if a `with_lock_on` call is currently in
    /// flight, or whatever the transport surfaces.
    pub async fn publish<E: ToFact>(&self, event: &E) -> Result<FactId> {
        self.ensure_open()?;
        let fact = self.converter.to_fact(event)?;
        let id = fact.id;
        self.locking.publish(vec![fact]).await?;
        Ok(id)
    }

    /// Encode and publish every event in `events`, all-or-nothing.
    ///
    /// # Errors
    ///
    /// See [`Self::publish`].
    pub async fn publish_all<E: ToFact>(&self, events: &[E]) -> Result<Vec<FactId>> {
        self.ensure_open()?;
        let facts = events
            .iter()
            .map(|event| self.converter.to_fact(event))
            .collect::<factflow_core::Result<Vec<_>>>()?;
        let ids = facts.iter().map(|fact| fact.id).collect();
        self.locking.publish(facts).await?;
        Ok(ids)
    }

    /// Load the latest snapshot for `P`, catch it up to the log's
    /// current head, persist the advanced snapshot asynchronously, and
    /// return the materialized value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Closed`] if the engine is closed, or whatever
    /// the snapshot cache/transport surface.
    pub async fn fetch<P>(&self, class: &'static str, projector: Arc<Projector<P>>) -> Result<P>
    where
        P: SnapshotProjection,
    {
        self.ensure_open()?;
        let start = Instant::now();

        let (initial, from_cursor) = match self.projection_snapshots.find_latest::<P>().await? {
            Some((value, cursor)) => {
                if let Ok(bytes) = self.codec.encode(&value) {
                    EngineMetrics::record_fetch_size(class, bytes.len());
                }
                (value, cursor)
            }
            None => (P::default(), Cursor::beginning()),
        };

        let cell = Arc::new(SnapshotCell {
            state: Mutex::new(initial),
            cursor: Mutex::new(from_cursor),
        });
        self.driver
            .run_catchup(
                class,
                cell.clone(),
                projector,
                from_cursor,
                self.config.default_catchup_max_wait,
            )
            .await?;

        let advanced = cell.cursor();
        let result = cell.execute_update(std::mem::take);
        if advanced > from_cursor {
            let _ = self.projection_snapshots.put(&result, advanced);
        }

        EngineMetrics::record_fetch(class, start.elapsed());
        Ok(result)
    }

    /// Load the latest snapshot for `(A, aggregate_id)`, catch it up to
    /// the log's current head, persist the advanced snapshot
    /// synchronously, and return the materialized value. Returns `None`
    /// iff no snapshot existed for this aggregate and catchup applied no
    /// facts.
    ///
    /// # Errors
    ///
    /// See [`Self::fetch`].
    pub async fn find<A>(
        &self,
        class: &'static str,
        aggregate_id: &str,
        projector: Arc<Projector<A>>,
    ) -> Result<Option<A>>
    where
        A: Aggregate,
    {
        self.ensure_open()?;
        let start = Instant::now();

        let loaded = self.aggregate_snapshots.find_latest::<A>(aggregate_id).await?;
        let had_snapshot = loaded.is_some();
        let (initial, from_cursor) = match loaded {
            Some((value, cursor)) => (value, cursor),
            None => {
                let mut value = A::default();
                value.set_aggregate_id(aggregate_id.to_string());
                (value, Cursor::beginning())
            }
        };

        let cell = Arc::new(SnapshotCell {
            state: Mutex::new(initial),
            cursor: Mutex::new(from_cursor),
        });
        self.driver
            .run_catchup(
                class,
                cell.clone(),
                projector,
                from_cursor,
                self.config.default_catchup_max_wait,
            )
            .await?;

        let advanced = cell.cursor();
        let result = cell.execute_update(std::mem::take);

        EngineMetrics::record_find(class, false, start.elapsed());

        if advanced > from_cursor {
            self.aggregate_snapshots.put_blocking(&result, advanced).await;
            return Ok(Some(result));
        }
        if had_snapshot {
            return Ok(Some(result));
        }
        Ok(None)
    }

    /// Catch a managed projection up to the log's current head under its
    /// own intra-process write lock, bounded by `max_wait` (falling back
    /// to [`EngineConfig::default_catchup_max_wait`] when `None`).
    ///
    /// # Errors
    ///
    /// See [`Self::fetch`].
    pub async fn update<P>(
        &self,
        class: &'static str,
        projection: Arc<P>,
        projector: Arc<Projector<P::State>>,
        max_wait: Option<Duration>,
    ) -> Result<()>
    where
        P: ManagedProjection + 'static,
    {
        self.ensure_open()?;
        let from_cursor = projection.cursor();
        self.driver
            .run_catchup(
                class,
                projection,
                projector,
                from_cursor,
                max_wait.or(self.config.default_catchup_max_wait),
            )
            .await?;
        Ok(())
    }

    /// Run the optimistic-locked publish protocol against `projection`,
    /// refreshing it via a catchup subscription before every attempt.
    /// `publish` computes the candidate facts from the refreshed state;
    /// an empty return is a no-op success.
    ///
    /// # Errors
    ///
    /// See [`LockingCoordinator::with_lock_on`].
    pub async fn with_lock_on<P>(
        &self,
        class: &'static str,
        projection: Arc<P>,
        projector: Arc<Projector<P::State>>,
        publish: impl FnMut(&P::State) -> Vec<Fact>,
    ) -> Result<Vec<FactId>>
    where
        P: ManagedProjection + 'static,
    {
        self.ensure_open()?;
        let driver = &self.driver;
        let refresh_projection = projection.clone();
        let refresh_projector = projector.clone();
        let refresh = move || {
            let projection = refresh_projection.clone();
            let projector = refresh_projector.clone();
            async move {
                let from_cursor = projection.cursor();
                driver.run_catchup(class, projection, projector, from_cursor, None).await
            }
        };

        self.locking
            .with_lock_on(projection.as_ref(), self.config.lock_retry_bound, refresh, publish)
            .await
    }

    /// Acquire `projection`'s write token, retrying on a fixed renewal
    /// interval until it succeeds or the engine closes, then open a
    /// follow subscription from the projection's current cursor. Both
    /// the token lease and the subscription are registered for cleanup
    /// on [`Self::close`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Closed`] if the engine closes before or
    /// during token acquisition.
    pub async fn subscribe_and_block<P>(
        &self,
        class: &'static str,
        projection: Arc<P>,
        projector: Arc<Projector<P::State>>,
    ) -> Result<Arc<dyn Subscription>>
    where
        P: SubscribedProjection + 'static,
    {
        let lease = loop {
            self.ensure_open()?;
            match projection.token().try_acquire(self.config.token_renewal_interval).await {
                Ok(Some(lease)) => break lease,
                Ok(None) => sleep(self.config.token_renewal_interval).await,
                Err(error) => {
                    tracing::warn!(class, %error, "write token acquisition failed, retrying");
                    sleep(self.config.token_renewal_interval).await;
                }
            }
        };

        let from_cursor = projection.cursor();
        let subscription: Arc<dyn Subscription> =
            Arc::from(self.driver.run_follow(class, projection, projector, from_cursor).await?);

        self.registry.register(Box::new(FnShutdownHook::new("write-token-lease", move || async move {
            drop(lease);
        })));

        let subscription_for_hook = subscription.clone();
        self.registry.register(Box::new(FnShutdownHook::new("follow-subscription", move || async move {
            if let Err(error) = subscription_for_hook.close().await {
                tracing::warn!(class, %error, "failed to close follow subscription");
            }
        })));

        Ok(subscription)
    }

    /// Close the engine: mark it closed and drain all registered managed
    /// objects in LIFO order, swallowing individual close failures.
    /// Idempotent; a second call is logged and otherwise a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            tracing::warn!("engine already closed");
            return;
        }
        self.registry.drain_and_close().await;
    }
}
