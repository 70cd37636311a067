//! Drives a catchup or follow subscription against a `Transport`,
//! applying each delivered fact to a projection in order.
//!
//! Grounded in the teacher's projection manager consume loop: a
//! `tokio::select!` over the incoming stream and a shutdown signal,
//! generalized from Kafka-topic subscriptions to `FactSpec`-filtered
//! ones and from a checkpoint store to the projector/projection pair
//! directly.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use factflow_core::{
    Cursor, Fact, ManagedProjection, Projector, Result, Subscription, SubscriptionMode,
    SubscriptionObserver, SubscriptionRequest, Transport,
};
use std::future::Future;
use std::pin::Pin;

use crate::metrics::EngineMetrics;

/// Header key a fact may carry its publish timestamp under, as epoch
/// milliseconds. Sampled to emit the event-processing-latency metric;
/// absent or unparseable values are silently skipped.
const TIMESTAMP_HEADER: &str = "_ts";

/// Drives facts from a [`Transport`] subscription into a projection via
/// its [`Projector`].
pub struct SubscriptionDriver<T> {
    transport: Arc<T>,
}

impl<T: Transport + 'static> SubscriptionDriver<T> {
    /// Build a driver over `transport`.
    #[must_use]
    pub const fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    /// Run a bounded catchup subscription: deliver every fact matching
    /// `projector`'s specs up to the log's current head, then return.
    ///
    /// # Errors
    ///
    /// Returns [`factflow_core::CoreError::CatchupTimeout`] if `max_wait`
    /// elapses first, or whatever error the transport/projector surface.
    pub async fn run_catchup<P>(
        &self,
        class: &'static str,
        projection: Arc<P>,
        projector: Arc<Projector<P::State>>,
        from_cursor: Cursor,
        max_wait: Option<Duration>,
    ) -> Result<()>
    where
        P: ManagedProjection + 'static,
    {
        let fact_specs = projector.fact_specs().to_vec();
        let observer: Arc<dyn SubscriptionObserver> = Arc::new(ApplyObserver {
            class,
            projection,
            projector,
        });

        let request = SubscriptionRequest {
            mode: SubscriptionMode::Catchup,
            specs: fact_specs,
            from_cursor: Some(from_cursor),
        };

        let subscription = self.transport.subscribe(request, observer).await?;
        subscription.await_complete(max_wait).await
    }

    /// Start an unbounded follow subscription. Returns the live
    /// subscription handle so the caller can `close()` it later.
    ///
    /// # Errors
    ///
    /// Returns whatever error the transport surfaces establishing the
    /// subscription.
    pub async fn run_follow<P>(
        &self,
        class: &'static str,
        projection: Arc<P>,
        projector: Arc<Projector<P::State>>,
        from_cursor: Cursor,
    ) -> Result<Box<dyn Subscription>>
    where
        P: ManagedProjection + 'static,
    {
        let fact_specs = projector.fact_specs().to_vec();
        let observer: Arc<dyn SubscriptionObserver> = Arc::new(ApplyObserver {
            class,
            projection,
            projector,
        });

        let request = SubscriptionRequest {
            mode: SubscriptionMode::Follow,
            specs: fact_specs,
            from_cursor: Some(from_cursor),
        };

        self.transport.subscribe(request, observer).await
    }
}

struct ApplyObserver<P: ManagedProjection> {
    class: &'static str,
    projection: Arc<P>,
    projector: Arc<Projector<P::State>>,
}

impl<P: ManagedProjection + 'static> SubscriptionObserver for ApplyObserver<P> {
    fn on_next(&self, fact: &Fact) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let fact = fact.clone();
        Box::pin(async move {
            let start = Instant::now();
            let projector = self.projector.clone();
            let applied = fact.clone();
            let result = self
                .projection
                .execute_update(move |state| projector.apply(state, &applied));
            EngineMetrics::record_managed_update(self.class, start.elapsed());
            if result.is_ok() {
                if let Some(cursor) = Cursor::after(&fact) {
                    self.projection.advance_cursor(cursor);
                    self.sample_processing_latency(&fact);
                } else {
                    tracing::warn!(class = self.class, "delivered fact has no position, cursor not advanced");
                }
            }
            result
        })
    }

    fn on_error(&self, error: &factflow_core::CoreError) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let message = error.to_string();
        Box::pin(async move {
            tracing::error!(class = self.class, error = %message, "subscription failed");
        })
    }
}

impl<P: ManagedProjection + 'static> ApplyObserver<P> {
    fn sample_processing_latency(&self, fact: &Fact) {
        let Some(raw) = fact.headers.get(TIMESTAMP_HEADER) else {
            return;
        };
        let Ok(millis) = raw.parse::<i64>() else {
            return;
        };
        let Some(published_at) = chrono::DateTime::from_timestamp_millis(millis) else {
            return;
        };
        if let Ok(latency) = (Utc::now() - published_at).to_std() {
            EngineMetrics::record_event_latency(self.class, latency);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use factflow_core::{FactPosition, HandlerTable};
    use std::sync::Mutex;

    struct Counter {
        total: Mutex<i64>,
        cursor: Mutex<Cursor>,
    }

    impl ManagedProjection for Counter {
        type State = i64;

        fn cursor(&self) -> Cursor {
            *self.cursor.lock().unwrap()
        }

        fn execute_update<R>(&self, f: impl FnOnce(&mut i64) -> R) -> R {
            let mut guard = self.total.lock().unwrap();
            f(&mut guard)
        }

        fn advance_cursor(&self, cursor: Cursor) {
            *self.cursor.lock().unwrap() = cursor;
        }
    }

    fn handlers() -> HandlerTable<i64> {
        HandlerTable::new().on_exact("orders", "AmountAdded", 1, |total, fact| {
            let amount: i64 = bincode::deserialize(&fact.payload)
                .map_err(|e| factflow_core::CoreError::Serialization(e.to_string()))?;
            *total += amount;
            Ok(())
        })
    }

    /// Delivers a fixed set of facts synchronously, recording the
    /// request it was asked to serve.
    struct ScriptedTransport {
        facts: Vec<Fact>,
        seen_specs: Mutex<Vec<factflow_core::FactSpec>>,
    }

    struct ImmediateSubscription;

    impl Subscription for ImmediateSubscription {
        fn await_complete(
            &self,
            _max_wait: Option<Duration>,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }

        fn close(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }
    }

    impl Transport for ScriptedTransport {
        fn publish(&self, _facts: Vec<Fact>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }

        fn subscribe(
            &self,
            request: SubscriptionRequest,
            observer: Arc<dyn SubscriptionObserver>,
        ) -> Pin<Box<dyn Future<Output = Result<Box<dyn Subscription>>> + Send + '_>> {
            self.seen_specs.lock().unwrap().clone_from(&request.specs);
            let facts = self.facts.clone();
            Box::pin(async move {
                for fact in &facts {
                    observer.on_next(fact).await?;
                }
                observer.on_catchup().await?;
                observer.on_complete().await?;
                Ok(Box::new(ImmediateSubscription) as Box<dyn Subscription>)
            })
        }
    }

    #[tokio::test]
    async fn catchup_applies_facts_in_order_and_advances_cursor() {
        let mut fact_a = Fact::new("orders", "AmountAdded", 1, bincode::serialize(&5i64).unwrap());
        fact_a.position = Some(FactPosition::new(1));
        let mut fact_b = Fact::new("orders", "AmountAdded", 1, bincode::serialize(&7i64).unwrap());
        fact_b.position = Some(FactPosition::new(2));

        let transport = Arc::new(ScriptedTransport {
            facts: vec![fact_a, fact_b.clone()],
            seen_specs: Mutex::new(Vec::new()),
        });
        let driver = SubscriptionDriver::new(transport.clone());
        let projection = Arc::new(Counter {
            total: Mutex::new(0),
            cursor: Mutex::new(Cursor::beginning()),
        });
        let projector = Arc::new(Projector::new(handlers()));

        driver
            .run_catchup("orders.Counter", projection.clone(), projector.clone(), Cursor::beginning(), None)
            .await
            .unwrap();

        assert_eq!(*projection.total.lock().unwrap(), 12);
        assert_eq!(projection.cursor(), Cursor::after(&fact_b).unwrap());
        assert_eq!(transport.seen_specs.lock().unwrap().as_slice(), projector.fact_specs());
    }
}
