//! Exercises the six boundary scenarios the engine's public surface is
//! expected to satisfy, end to end against the in-memory test doubles:
//! empty find, catchup-from-snapshot, synchronous aggregate persist,
//! optimistic lock retry, close idempotence, and subscribe-and-block
//! token handoff.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use factflow_core::{
    Aggregate, BincodeCodec, Cursor, Deserialize, Fact, HandlerTable, ManagedProjection, Projector,
    Serialize, SnapshotProjection, SubscribedProjection,
};
use factflow_runtime::{EngineConfig, ProjectionEngine};
use factflow_testing::{InMemorySnapshotCache, InMemoryTransport, InMemoryWriteToken};
use parking_lot::Mutex;

#[derive(Default, Serialize, Deserialize)]
struct OrderSummary {
    total_cents: i64,
}

impl SnapshotProjection for OrderSummary {
    fn class_name() -> &'static str {
        "orders.OrderSummary"
    }
}

fn summary_handlers() -> HandlerTable<OrderSummary> {
    HandlerTable::new().on_exact("orders", "AmountAdded", 1, |state, fact| {
        let amount: i64 = bincode::deserialize(&fact.payload)
            .map_err(|e| factflow_core::CoreError::Serialization(e.to_string()))?;
        state.total_cents += amount;
        Ok(())
    })
}

#[derive(Default, Serialize, Deserialize)]
struct OrderAggregate {
    aggregate_id: String,
    total_cents: i64,
}

impl SnapshotProjection for OrderAggregate {
    fn class_name() -> &'static str {
        "orders.OrderAggregate"
    }
}

impl Aggregate for OrderAggregate {
    fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    fn set_aggregate_id(&mut self, id: String) {
        self.aggregate_id = id;
    }
}

fn aggregate_handlers() -> HandlerTable<OrderAggregate> {
    HandlerTable::new().on_exact("orders", "AmountAdded", 1, |state, fact| {
        let amount: i64 = bincode::deserialize(&fact.payload)
            .map_err(|e| factflow_core::CoreError::Serialization(e.to_string()))?;
        state.total_cents += amount;
        Ok(())
    })
}

fn amount_added(aggregate_id: &str, amount: i64) -> Fact {
    Fact::new("orders", "AmountAdded", 1, bincode::serialize(&amount).unwrap())
        .with_header("aggregateId", aggregate_id)
}

fn engine(
    transport: Arc<InMemoryTransport>,
    cache: Arc<InMemorySnapshotCache>,
) -> ProjectionEngine<InMemoryTransport, InMemorySnapshotCache, BincodeCodec> {
    ProjectionEngine::new(transport, cache, BincodeCodec, EngineConfig::default())
}

#[tokio::test]
async fn empty_find_returns_absent_and_writes_no_snapshot() {
    let transport = Arc::new(InMemoryTransport::new());
    let cache = Arc::new(InMemorySnapshotCache::new());
    let engine = engine(transport, cache.clone());

    let result = engine
        .find::<OrderAggregate>("orders.OrderAggregate", "order-1", Arc::new(Projector::new(aggregate_handlers())))
        .await
        .unwrap();

    assert!(result.is_none());
    assert!(cache.is_empty());
}

#[tokio::test]
async fn fetch_catches_up_from_a_stored_snapshot_and_persists_the_advance() {
    let transport = Arc::new(InMemoryTransport::new());
    let cache = Arc::new(InMemorySnapshotCache::new());
    let engine = engine(transport.clone(), cache.clone());
    let projector = Arc::new(Projector::new(summary_handlers()));

    transport.publish(vec![amount_added("order-1", 5)]).await.unwrap();
    let first = engine.fetch("orders.OrderSummary", projector.clone()).await.unwrap();
    assert_eq!(first.total_cents, 5);

    // fetch's snapshot write is fire-and-forget; give it a tick.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(cache.len(), 1);

    transport.publish(vec![amount_added("order-1", 3), amount_added("order-1", 2)]).await.unwrap();
    let second = engine.fetch("orders.OrderSummary", projector).await.unwrap();
    assert_eq!(second.total_cents, 10);
}

#[tokio::test]
async fn find_rebuilds_an_aggregate_and_persists_synchronously() {
    let transport = Arc::new(InMemoryTransport::new());
    let cache = Arc::new(InMemorySnapshotCache::new());
    let engine = engine(transport.clone(), cache.clone());

    transport
        .publish(vec![
            amount_added("order-1", 4),
            amount_added("order-1", 6),
            amount_added("order-1", 1),
        ])
        .await
        .unwrap();

    let found = engine
        .find::<OrderAggregate>("orders.OrderAggregate", "order-1", Arc::new(Projector::new(aggregate_handlers())))
        .await
        .unwrap();

    let found = found.unwrap();
    assert_eq!(found.total_cents, 11);
    // find's put_blocking is awaited before returning: no extra tick needed.
    assert_eq!(cache.len(), 1);
}

struct ManagedCounter {
    total: Mutex<i64>,
    cursor: Mutex<Cursor>,
}

impl Default for ManagedCounter {
    fn default() -> Self {
        Self {
            total: Mutex::new(0),
            cursor: Mutex::new(Cursor::beginning()),
        }
    }
}

impl ManagedProjection for ManagedCounter {
    type State = i64;

    fn cursor(&self) -> Cursor {
        *self.cursor.lock()
    }

    fn execute_update<R>(&self, f: impl FnOnce(&mut i64) -> R) -> R {
        let mut guard = self.total.lock();
        f(&mut guard)
    }

    fn advance_cursor(&self, cursor: Cursor) {
        *self.cursor.lock() = cursor;
    }
}

fn counter_handlers() -> HandlerTable<i64> {
    HandlerTable::new().on_exact("orders", "AmountAdded", 1, |total, fact| {
        let amount: i64 = bincode::deserialize(&fact.payload)
            .map_err(|e| factflow_core::CoreError::Serialization(e.to_string()))?;
        *total += amount;
        Ok(())
    })
}

#[tokio::test]
async fn with_lock_on_retries_past_injected_conflicts_and_succeeds() {
    let transport = Arc::new(InMemoryTransport::new());
    transport.force_conflict("order-1", 2);
    let cache = Arc::new(InMemorySnapshotCache::new());
    let engine = engine(transport.clone(), cache);

    let projection = Arc::new(ManagedCounter::default());
    let projector = Arc::new(Projector::new(counter_handlers()));

    let ids = engine
        .with_lock_on("orders.Counter", projection, projector, |_state| vec![amount_added("order-1", 1)])
        .await
        .unwrap();

    assert_eq!(ids.len(), 1);
    assert_eq!(transport.facts().len(), 1);
}

#[tokio::test]
async fn close_is_idempotent() {
    let transport = Arc::new(InMemoryTransport::new());
    let cache = Arc::new(InMemorySnapshotCache::new());
    let engine = engine(transport, cache);

    engine.close().await;
    engine.close().await;

    let result = engine.publish(&TestEvent).await;
    assert!(result.is_err());
}

#[derive(Serialize)]
struct TestEvent;

impl factflow_core::ToFact for TestEvent {
    fn namespace(&self) -> &str {
        "orders"
    }

    fn fact_type(&self) -> &'static str {
        "AmountAdded.v1"
    }

    fn schema_version(&self) -> u32 {
        1
    }
}

struct SubscribedCounter {
    inner: ManagedCounter,
    token: InMemoryWriteToken,
}

impl ManagedProjection for SubscribedCounter {
    type State = i64;

    fn cursor(&self) -> Cursor {
        self.inner.cursor()
    }

    fn execute_update<R>(&self, f: impl FnOnce(&mut i64) -> R) -> R {
        self.inner.execute_update(f)
    }

    fn advance_cursor(&self, cursor: Cursor) {
        self.inner.advance_cursor(cursor);
    }
}

impl SubscribedProjection for SubscribedCounter {
    type Token = InMemoryWriteToken;

    fn token(&self) -> &InMemoryWriteToken {
        &self.token
    }
}

#[tokio::test]
async fn subscribe_and_block_retries_token_acquisition_then_hands_both_resources_to_close() {
    let transport = Arc::new(InMemoryTransport::new());
    let cache = Arc::new(InMemorySnapshotCache::new());
    let config = EngineConfig::builder().token_renewal_interval(Duration::from_millis(5)).build();
    let engine = ProjectionEngine::new(transport, cache, BincodeCodec, config);

    let projection = Arc::new(SubscribedCounter {
        inner: ManagedCounter::default(),
        token: InMemoryWriteToken::new(2),
    });
    let projector = Arc::new(Projector::new(counter_handlers()));

    let _subscription = engine
        .subscribe_and_block("orders.Counter", projection.clone(), projector)
        .await
        .unwrap();

    assert!(!projection.token.released());

    engine.close().await;

    assert!(projection.token.released());
}
