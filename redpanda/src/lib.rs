//! Redpanda/Kafka-backed [`Transport`] implementation.
//!
//! # Topic layout
//!
//! Each namespace maps to its own single-partition topic, `factflow.{namespace}`
//! by default. A [`SubscriptionRequest`] may only mix specs drawn from one
//! namespace, since a [`Cursor`]'s position is a single global counter and
//! Kafka only orders messages within a partition — the same constraint the
//! at-least-once event bus this crate is descended from already documents.
//!
//! # Position mapping
//!
//! A fact's [`FactPosition`] is the Kafka offset it was read at, plus one:
//! `position 0` (`Cursor::beginning`) means "zero messages consumed", and
//! `position N` means the next unread offset is `N`. This makes a topic's
//! high watermark (the offset the *next* produced message will get, which
//! `fetch_watermarks` already reports as a count) line up exactly with the
//! position a fully caught-up cursor should hold.
//!
//! # Delivery semantics
//!
//! At-least-once: a crash between applying a fact and persisting the
//! projection's advanced cursor will redeliver that fact on restart.
//! Handlers must be idempotent, as the rest of the runtime already assumes
//! (`ManagedProjection::execute_update`'s re-apply-on-catchup pattern).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use factflow_core::{
    CoreError, Fact, FactPosition, FactSpec, Result, Subscription, SubscriptionMode,
    SubscriptionObserver, SubscriptionRequest, Transport,
};
use factflow_runtime::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
use factflow_runtime::retry::{RetryPolicy, retry_with_backoff};
use parking_lot::Mutex;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

const PARTITION: i32 = 0;

/// A Redpanda/Kafka-backed [`Transport`].
///
/// Publishes use a circuit breaker wrapped in exponential-backoff retry,
/// the same resilience pair `factflow-runtime` exposes for transport
/// implementations to share (`circuit_breaker::CircuitBreaker`,
/// `retry::RetryPolicy`).
pub struct RedpandaTransport {
    producer: FutureProducer,
    brokers: String,
    topic_prefix: String,
    send_timeout: Duration,
    publish_retry: RetryPolicy,
    publish_breaker: CircuitBreaker,
}

impl RedpandaTransport {
    /// Create a transport with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transport`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self> {
        Self::builder().brokers(brokers).build()
    }

    /// Start building a transport with non-default configuration.
    #[must_use]
    pub fn builder() -> RedpandaTransportBuilder {
        RedpandaTransportBuilder::default()
    }

    fn topic_for(&self, namespace: &str) -> String {
        format!("{}{namespace}", self.topic_prefix)
    }

    fn consumer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            // Manual partition assignment means group membership is a
            // formality rdkafka still requires a value for; a fresh id per
            // subscription keeps consumers from colliding on commits we
            // never make (offsets are tracked by `Cursor`, not the broker).
            .set("group.id", format!("factflow-{}", uuid::Uuid::new_v4()))
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000");
        config
    }
}

impl Transport for RedpandaTransport {
    fn publish(&self, facts: Vec<Fact>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            // Group by namespace so each namespace's facts land on its own
            // topic while preserving publish order within a namespace.
            let mut by_namespace: BTreeMap<String, Vec<Fact>> = BTreeMap::new();
            for fact in facts {
                by_namespace.entry(fact.namespace.clone()).or_default().push(fact);
            }

            for (namespace, facts) in by_namespace {
                let topic = self.topic_for(&namespace);
                for fact in facts {
                    self.send_with_resilience(&topic, &fact).await?;
                }
            }

            Ok(())
        })
    }

    fn subscribe(
        &self,
        request: SubscriptionRequest,
        observer: Arc<dyn SubscriptionObserver>,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn Subscription>>> + Send + '_>> {
        Box::pin(async move {
            let namespace = single_namespace(&request)?;
            let topic = self.topic_for(&namespace);
            let start_offset = request.from_cursor.map_or(0, |c| c.position().serial()) as i64;

            let consumer: StreamConsumer = self
                .consumer_config()
                .create()
                .map_err(|e| CoreError::Transport(format!("failed to create consumer: {e}")))?;

            let mut assignment = TopicPartitionList::new();
            assignment
                .add_partition_offset(&topic, PARTITION, Offset::Offset(start_offset))
                .map_err(|e| CoreError::Transport(format!("failed to build assignment: {e}")))?;
            consumer
                .assign(&assignment)
                .map_err(|e| CoreError::Transport(format!("failed to assign partition: {e}")))?;

            let (low, high) = consumer
                .fetch_watermarks(&topic, PARTITION, Timeout::After(self.send_timeout))
                .map_err(|e| CoreError::Transport(format!("failed to fetch watermarks: {e}")))?;
            #[allow(clippy::cast_sign_loss)]
            let catchup_target = high.max(low).max(start_offset) as u64;

            let closed = Arc::new(AtomicBool::new(false));
            let close_signal = Arc::new(Notify::new());
            let completion: Arc<Mutex<Option<std::result::Result<(), String>>>> = Arc::new(Mutex::new(None));
            let completion_signal = Arc::new(Notify::new());

            let driver = SubscriptionDriverTask {
                consumer,
                specs: request.specs,
                mode: request.mode,
                catchup_target,
                observer,
                closed: closed.clone(),
                close_signal: close_signal.clone(),
                completion: completion.clone(),
                completion_signal: completion_signal.clone(),
            };

            let handle = tokio::spawn(driver.run());

            Ok(Box::new(RedpandaSubscription {
                closed,
                close_signal,
                completion,
                completion_signal,
                handle: tokio::sync::Mutex::new(Some(handle)),
            }) as Box<dyn Subscription>)
        })
    }
}

impl RedpandaTransport {
    async fn send_with_resilience(&self, topic: &str, fact: &Fact) -> Result<()> {
        let payload = bincode::serialize(fact)
            .map_err(|e| CoreError::Serialization(format!("failed to encode fact: {e}")))?;
        let key = fact.r#type.clone();
        let timeout = self.send_timeout;

        let outcome = retry_with_backoff(self.publish_retry.clone(), move || {
            let payload = payload.clone();
            let key = key.clone();
            self.publish_breaker.call(move || {
                let payload = payload.clone();
                let key = key.clone();
                async move {
                    let record = FutureRecord::to(topic).payload(&payload).key(&key);
                    self.producer
                        .send(record, Timeout::After(timeout))
                        .await
                        .map_err(|(err, _)| err)
                }
            })
        })
        .await;

        match outcome {
            Ok(_) => Ok(()),
            Err(CircuitBreakerError::Open) => {
                Err(CoreError::Transport(format!("circuit open for topic {topic}")))
            }
            Err(CircuitBreakerError::Inner(kafka_error)) => {
                Err(CoreError::Transport(format!("publish to {topic} failed: {kafka_error}")))
            }
        }
    }
}

fn single_namespace(request: &SubscriptionRequest) -> Result<String> {
    let mut namespaces = request.specs.iter().map(|spec| spec.namespace.as_str());
    let first = namespaces
        .next()
        .ok_or_else(|| CoreError::Transport("subscription request has no specs".to_string()))?;
    if namespaces.any(|ns| ns != first) {
        return Err(CoreError::Transport(
            "a single subscription can only span one namespace's topic".to_string(),
        ));
    }
    Ok(first.to_string())
}

struct SubscriptionDriverTask {
    consumer: StreamConsumer,
    specs: Vec<FactSpec>,
    mode: SubscriptionMode,
    catchup_target: u64,
    observer: Arc<dyn SubscriptionObserver>,
    closed: Arc<AtomicBool>,
    close_signal: Arc<Notify>,
    completion: Arc<Mutex<Option<std::result::Result<(), String>>>>,
    completion_signal: Arc<Notify>,
}

impl SubscriptionDriverTask {
    async fn run(self) {
        let result = self.drive().await;
        if let Err(ref err) = result {
            self.observer.on_error(err).await;
        }
        let stored = result.map_err(|err| err.to_string());
        *self.completion.lock() = Some(stored);
        self.completion_signal.notify_waiters();
    }

    async fn drive(&self) -> Result<()> {
        let mut reached_catchup = self.catchup_target == 0;
        if reached_catchup {
            self.observer.on_catchup().await?;
            if self.mode == SubscriptionMode::Catchup {
                self.observer.on_complete().await?;
                return Ok(());
            }
        }

        loop {
            if self.closed.load(Ordering::Acquire) {
                self.observer.on_complete().await?;
                return Ok(());
            }

            let message = tokio::select! {
                () = self.close_signal.notified() => {
                    self.observer.on_complete().await?;
                    return Ok(());
                }
                message = self.consumer.recv() => message,
            };

            let message = message.map_err(|e| CoreError::Transport(format!("consume failed: {e}")))?;

            let payload = message
                .payload()
                .ok_or_else(|| CoreError::Transport("message had no payload".to_string()))?;
            let mut fact: Fact = bincode::deserialize(payload)
                .map_err(|e| CoreError::Serialization(format!("failed to decode fact: {e}")))?;

            #[allow(clippy::cast_sign_loss)]
            let position = FactPosition::new(message.offset() as u64 + 1);
            fact.position = Some(position);

            if self.specs.iter().any(|spec| spec.matches(&fact)) {
                self.observer.on_next(&fact).await?;
            }

            if !reached_catchup && position.serial() >= self.catchup_target {
                reached_catchup = true;
                self.observer.on_catchup().await?;
                if self.mode == SubscriptionMode::Catchup {
                    self.observer.on_complete().await?;
                    return Ok(());
                }
            }
        }
    }
}

struct RedpandaSubscription {
    closed: Arc<AtomicBool>,
    close_signal: Arc<Notify>,
    completion: Arc<Mutex<Option<std::result::Result<(), String>>>>,
    completion_signal: Arc<Notify>,
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Subscription for RedpandaSubscription {
    fn await_complete(
        &self,
        max_wait: Option<Duration>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            loop {
                if let Some(result) = self.completion.lock().clone() {
                    return result.map_err(CoreError::Transport);
                }

                let notified = self.completion_signal.notified();
                match max_wait {
                    Some(wait) => {
                        if tokio::time::timeout(wait, notified).await.is_err() {
                            return Err(CoreError::CatchupTimeout);
                        }
                    }
                    None => notified.await,
                }
            }
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.closed.store(true, Ordering::Release);
            self.close_signal.notify_waiters();

            if let Some(handle) = self.handle.lock().await.take() {
                let _ = handle.await;
            }
            Ok(())
        })
    }
}

/// Builder for [`RedpandaTransport`].
#[derive(Default)]
pub struct RedpandaTransportBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    send_timeout: Option<Duration>,
    topic_prefix: Option<String>,
    publish_retry: Option<RetryPolicy>,
    circuit_breaker: Option<CircuitBreakerConfig>,
}

impl RedpandaTransportBuilder {
    /// Set the broker addresses (comma-separated, e.g. `"localhost:9092"`).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode (`"0"`, `"1"`, `"all"`). Default `"all"`.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the producer compression codec. Default `"none"`.
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the per-send/per-fetch timeout. Default 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    /// Set the topic prefix namespaces are appended to. Default `"factflow."`.
    #[must_use]
    pub fn topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topic_prefix = Some(prefix.into());
        self
    }

    /// Set the retry policy wrapping each publish attempt.
    #[must_use]
    pub fn publish_retry(mut self, policy: RetryPolicy) -> Self {
        self.publish_retry = Some(policy);
        self
    }

    /// Set the circuit breaker configuration guarding publishes.
    #[must_use]
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    /// Build the transport.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transport`] if brokers are unset or the
    /// producer cannot be created.
    pub fn build(self) -> Result<RedpandaTransport> {
        let brokers = self
            .brokers
            .ok_or_else(|| CoreError::Transport("brokers not configured".to_string()))?;

        let mut producer_config = ClientConfig::new();
        producer_config
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", self.producer_acks.as_deref().unwrap_or("all"))
            .set("compression.type", self.compression.as_deref().unwrap_or("none"));

        let producer: FutureProducer = producer_config
            .create()
            .map_err(|e| CoreError::Transport(format!("failed to create producer: {e}")))?;

        tracing::info!(
            brokers = %brokers,
            acks = self.producer_acks.as_deref().unwrap_or("all"),
            "RedpandaTransport created"
        );

        Ok(RedpandaTransport {
            producer,
            brokers,
            topic_prefix: self.topic_prefix.unwrap_or_else(|| "factflow.".to_string()),
            send_timeout: self.send_timeout.unwrap_or(Duration::from_secs(5)),
            publish_retry: self.publish_retry.unwrap_or_default(),
            publish_breaker: CircuitBreaker::new(self.circuit_breaker.unwrap_or_default()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redpanda_transport_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaTransport>();
        assert_sync::<RedpandaTransport>();
    }

    #[test]
    fn builder_requires_brokers() {
        let err = RedpandaTransport::builder().build();
        assert!(err.is_err());
    }

    #[test]
    fn topic_for_applies_the_configured_prefix() {
        let transport = RedpandaTransport::builder()
            .brokers("localhost:9092")
            .topic_prefix("custom.")
            .build()
            .expect("build should succeed without connecting");
        assert_eq!(transport.topic_for("orders"), "custom.orders");
    }

    #[test]
    fn single_namespace_rejects_empty_specs() {
        let request = SubscriptionRequest {
            mode: SubscriptionMode::Catchup,
            specs: vec![],
            from_cursor: None,
        };
        assert!(single_namespace(&request).is_err());
    }

    #[test]
    fn single_namespace_rejects_mixed_namespaces() {
        let request = SubscriptionRequest {
            mode: SubscriptionMode::Catchup,
            specs: vec![
                FactSpec::exact("orders", "Placed", 1),
                FactSpec::exact("billing", "Charged", 1),
            ],
            from_cursor: None,
        };
        assert!(single_namespace(&request).is_err());
    }

    #[test]
    fn single_namespace_accepts_one_shared_namespace() {
        let request = SubscriptionRequest {
            mode: SubscriptionMode::Catchup,
            specs: vec![
                FactSpec::exact("orders", "Placed", 1),
                FactSpec::exact("orders", "Cancelled", 1),
            ],
            from_cursor: None,
        };
        assert_eq!(single_namespace(&request).expect("should resolve"), "orders");
    }
}
