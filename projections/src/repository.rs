//! Snapshot repositories: read/write versioned binary snapshots through a
//! [`SnapshotCache`], keyed by [`SnapshotKey`].
//!
//! Two shapes share the same read/write contract, parameterized only by
//! whether the projection in question carries an aggregate id:
//! [`ProjectionSnapshotRepository`] for plain [`SnapshotProjection`]s and
//! [`AggregateSnapshotRepository`] for [`Aggregate`]s. Grounded in the
//! teacher's `PostgresProjectionStore` read/write split
//! (`projections/src/postgres.rs`), generalized from a free-form string
//! key to the stable `SnapshotKey` format and from a single store type to
//! any `SnapshotCache` implementation.

use std::sync::Arc;

use tracing::warn;

use factflow_core::{Aggregate, Cursor, PayloadCodec, Snapshot, SnapshotCache, SnapshotKey, SnapshotProjection};

/// Reads and writes snapshots for [`SnapshotProjection`]s that are not
/// scoped to an aggregate id.
pub struct ProjectionSnapshotRepository<C, K> {
    cache: Arc<C>,
    codec: K,
}

impl<C: SnapshotCache, K: PayloadCodec> ProjectionSnapshotRepository<C, K> {
    /// Build a repository over `cache`, encoding payloads with `codec`.
    #[must_use]
    pub const fn new(cache: Arc<C>, codec: K) -> Self {
        Self { cache, codec }
    }

    /// Look up the latest snapshot for `P`, if any.
    ///
    /// A decode failure (e.g. a schema change the version key did not
    /// catch) degrades to a miss rather than propagating, exactly like a
    /// read I/O failure: the caller simply rebuilds from scratch.
    ///
    /// # Errors
    ///
    /// Propagates whatever error the cache surfaces on an I/O failure
    /// other than a miss (the `SnapshotCache` contract itself maps read
    /// failures to `Ok(None)`, so in practice this only returns `Err` if
    /// a future cache implementation chooses to surface one).
    pub async fn find_latest<P: SnapshotProjection>(&self) -> factflow_core::Result<Option<(P, Cursor)>> {
        let key = SnapshotKey::for_class(P::class_name(), P::SCHEMA_VERSION);
        let Some(snapshot) = self.cache.get(&key).await? else {
            return Ok(None);
        };
        match self.codec.decode::<P>(&snapshot.bytes) {
            Ok(value) => Ok(Some((value, snapshot.last_fact))),
            Err(error) => {
                warn!(key = %key, %error, "snapshot decode failed, rebuilding from scratch");
                Ok(None)
            }
        }
    }

    /// Persist `projection` at `cursor`, fire-and-forget.
    ///
    /// Spawns the write on the current Tokio runtime; the caller may
    /// `.await` the returned handle to observe completion or drop it, as
    /// spec.md's "asynchronous, non-blocking" `put` allows. Encode and
    /// cache-write failures are logged and discarded, never propagated.
    pub fn put<P: SnapshotProjection>(&self, projection: &P, cursor: Cursor) -> tokio::task::JoinHandle<()> {
        let key = SnapshotKey::for_class(P::class_name(), P::SCHEMA_VERSION);
        let compressed = self.codec.includes_compression();
        let encoded = self.codec.encode(projection);
        let cache = self.cache.clone();
        tokio::spawn(async move {
            write_snapshot(&*cache, key, cursor, encoded, compressed).await;
        })
    }
}

/// Reads and writes snapshots for [`Aggregate`]s, additionally scoped by
/// `aggregate_id`.
pub struct AggregateSnapshotRepository<C, K> {
    cache: Arc<C>,
    codec: K,
}

impl<C: SnapshotCache, K: PayloadCodec> AggregateSnapshotRepository<C, K> {
    /// Build a repository over `cache`, encoding payloads with `codec`.
    #[must_use]
    pub const fn new(cache: Arc<C>, codec: K) -> Self {
        Self { cache, codec }
    }

    /// Look up the latest snapshot for `(A, aggregate_id)`, if any.
    ///
    /// # Errors
    ///
    /// See [`ProjectionSnapshotRepository::find_latest`].
    pub async fn find_latest<A: Aggregate>(&self, aggregate_id: &str) -> factflow_core::Result<Option<(A, Cursor)>> {
        let key = SnapshotKey::for_aggregate(A::class_name(), A::SCHEMA_VERSION, aggregate_id);
        let Some(snapshot) = self.cache.get(&key).await? else {
            return Ok(None);
        };
        match self.codec.decode::<A>(&snapshot.bytes) {
            Ok(value) => Ok(Some((value, snapshot.last_fact))),
            Err(error) => {
                warn!(key = %key, %error, "snapshot decode failed, rebuilding from scratch");
                Ok(None)
            }
        }
    }

    /// Persist `aggregate` at `cursor`, fire-and-forget (see
    /// [`ProjectionSnapshotRepository::put`]).
    pub fn put<A: Aggregate>(&self, aggregate: &A, cursor: Cursor) -> tokio::task::JoinHandle<()> {
        let key = SnapshotKey::for_aggregate(A::class_name(), A::SCHEMA_VERSION, aggregate.aggregate_id());
        let compressed = self.codec.includes_compression();
        let encoded = self.codec.encode(aggregate);
        let cache = self.cache.clone();
        tokio::spawn(async move {
            write_snapshot(&*cache, key, cursor, encoded, compressed).await;
        })
    }

    /// Persist `aggregate` at `cursor`, awaiting the write before
    /// returning. Used where a caller (e.g. `ProjectionEngine::find`)
    /// must guarantee the snapshot is durable before handing back the
    /// state it derived from.
    ///
    /// Like `put`, failures are logged and discarded rather than
    /// propagated: spec.md's `SnapshotIOError` write policy applies
    /// uniformly regardless of which `put` variant is used.
    pub async fn put_blocking<A: Aggregate>(&self, aggregate: &A, cursor: Cursor) {
        let key = SnapshotKey::for_aggregate(A::class_name(), A::SCHEMA_VERSION, aggregate.aggregate_id());
        let compressed = self.codec.includes_compression();
        let encoded = self.codec.encode(aggregate);
        write_snapshot(&*self.cache, key, cursor, encoded, compressed).await;
    }
}

async fn write_snapshot<C: SnapshotCache>(
    cache: &C,
    key: SnapshotKey,
    cursor: Cursor,
    encoded: factflow_core::Result<Vec<u8>>,
    compressed: bool,
) {
    let bytes = match encoded {
        Ok(bytes) => bytes,
        Err(error) => {
            warn!(key = %key, %error, "snapshot encode failed, discarding write");
            return;
        }
    };
    let snapshot = Snapshot {
        key: key.clone(),
        last_fact: cursor,
        bytes,
        compressed,
    };
    if let Err(error) = cache.set(snapshot).await {
        warn!(key = %key, %error, "snapshot put failed, discarding");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use factflow_core::BincodeCodec;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    #[derive(Default, Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Total {
        amount: i64,
    }

    impl SnapshotProjection for Total {
        fn class_name() -> &'static str {
            "orders.Total"
        }
    }

    #[derive(Default, Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: String,
        amount: i64,
    }

    impl SnapshotProjection for Order {
        fn class_name() -> &'static str {
            "orders.Order"
        }
    }

    impl Aggregate for Order {
        fn aggregate_id(&self) -> &str {
            &self.id
        }

        fn set_aggregate_id(&mut self, id: String) {
            self.id = id;
        }
    }

    #[derive(Default)]
    struct FakeCache {
        data: Mutex<HashMap<String, Snapshot>>,
    }

    impl SnapshotCache for FakeCache {
        fn get(
            &self,
            key: &SnapshotKey,
        ) -> Pin<Box<dyn Future<Output = factflow_core::Result<Option<Snapshot>>> + Send + '_>> {
            let found = self.data.lock().unwrap().get(&key.to_string()).cloned();
            Box::pin(async move { Ok(found) })
        }

        fn set(&self, snapshot: Snapshot) -> Pin<Box<dyn Future<Output = factflow_core::Result<()>> + Send + '_>> {
            self.data.lock().unwrap().insert(snapshot.key.to_string(), snapshot);
            Box::pin(async { Ok(()) })
        }

        fn delete(&self, key: &SnapshotKey) -> Pin<Box<dyn Future<Output = factflow_core::Result<()>> + Send + '_>> {
            self.data.lock().unwrap().remove(&key.to_string());
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn find_latest_is_none_before_any_put() {
        let cache = Arc::new(FakeCache::default());
        let repo = ProjectionSnapshotRepository::new(cache, BincodeCodec);

        let found = repo.find_latest::<Total>().await.unwrap();

        assert!(found.is_none());
    }

    #[tokio::test]
    async fn put_then_find_latest_round_trips() {
        let cache = Arc::new(FakeCache::default());
        let repo = ProjectionSnapshotRepository::new(cache, BincodeCodec);
        let value = Total { amount: 42 };
        let mut fact = factflow_core::Fact::new("ns", "T", 1, vec![]);
        fact.position = Some(factflow_core::FactPosition::new(3));
        let cursor = Cursor::after(&fact).unwrap();

        repo.put(&value, cursor).await.unwrap();
        let (found, found_cursor) = repo.find_latest::<Total>().await.unwrap().unwrap();

        assert_eq!(found, value);
        assert_eq!(found_cursor, cursor);
    }

    #[tokio::test]
    async fn aggregate_put_blocking_is_durable_before_returning() {
        let cache = Arc::new(FakeCache::default());
        let repo = AggregateSnapshotRepository::new(cache, BincodeCodec);
        let order = Order { id: "order-1".to_string(), amount: 9 };
        let mut fact = factflow_core::Fact::new("ns", "T", 1, vec![]);
        fact.position = Some(factflow_core::FactPosition::new(1));
        let cursor = Cursor::after(&fact).unwrap();

        repo.put_blocking(&order, cursor).await;
        let found = repo.find_latest::<Order>("order-1").await.unwrap();

        assert_eq!(found.map(|(o, _)| o), Some(order));
    }

    #[tokio::test]
    async fn decode_failure_degrades_to_miss() {
        let cache = Arc::new(FakeCache::default());
        let key = SnapshotKey::for_class(Total::class_name(), Total::SCHEMA_VERSION);
        cache
            .set(Snapshot {
                key,
                last_fact: Cursor::beginning(),
                bytes: vec![0xff, 0xff, 0xff],
                compressed: false,
            })
            .await
            .unwrap();
        let repo = ProjectionSnapshotRepository::new(cache, BincodeCodec);

        let found = repo.find_latest::<Total>().await.unwrap();

        assert!(found.is_none());
    }
}
