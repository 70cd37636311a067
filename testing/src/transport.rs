//! An in-process [`Transport`] backed by a `Vec<Fact>`, for engine tests
//! that need a real catchup/follow subscription without a network hop.
//!
//! Grounded in the teacher's `InMemoryEventBus`: a `Mutex`-guarded
//! subscriber list fanning out published messages, generalized here to
//! carry a persistent log (so a catchup subscription started after
//! publish still sees the backlog) and to key fan-out on `FactSpec`
//! matches rather than a single message type.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use factflow_core::{
    CoreError, Cursor, Fact, FactPosition, Result, Subscription, SubscriptionMode,
    SubscriptionObserver, SubscriptionRequest, Transport,
};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::broadcast;

struct Log {
    facts: Vec<Fact>,
    next_position: u64,
    forced_conflicts: HashMap<String, u32>,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            facts: Vec::new(),
            next_position: 0,
            forced_conflicts: HashMap::new(),
        }
    }
}

/// An in-process fact log, usable as a [`Transport`] directly.
pub struct InMemoryTransport {
    log: Mutex<Log>,
    appended: broadcast::Sender<Fact>,
}

impl InMemoryTransport {
    /// Build an empty transport.
    #[must_use]
    pub fn new() -> Self {
        let (appended, _) = broadcast::channel(1024);
        Self {
            log: Mutex::new(Log::default()),
            appended,
        }
    }

    /// Make the next `count` publishes carrying `aggregate_id` fail with
    /// [`CoreError::ConcurrentModification`], to exercise the locking
    /// coordinator's retry path.
    pub fn force_conflict(&self, aggregate_id: impl Into<String>, count: u32) {
        self.log.lock().forced_conflicts.insert(aggregate_id.into(), count);
    }

    /// Every fact currently on the log, in publish order.
    #[must_use]
    pub fn facts(&self) -> Vec<Fact> {
        self.log.lock().facts.clone()
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for InMemoryTransport {
    fn publish(&self, facts: Vec<Fact>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut log = self.log.lock();
            for fact in &facts {
                if let Some(aggregate_id) = fact.headers.get("aggregateId")
                    && let Some(remaining) = log.forced_conflicts.get_mut(aggregate_id)
                    && *remaining > 0
                {
                    *remaining -= 1;
                    return Err(CoreError::ConcurrentModification {
                        aggregate_id: aggregate_id.clone(),
                    });
                }
            }

            let mut appended = Vec::with_capacity(facts.len());
            for mut fact in facts {
                log.next_position += 1;
                fact.position = Some(FactPosition::new(log.next_position));
                log.facts.push(fact.clone());
                appended.push(fact);
            }
            drop(log);

            for fact in appended {
                let _ = self.appended.send(fact);
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
            let from = request.from_cursor.unwrap_or_else(Cursor::beginning);
            let backlog: Vec<Fact> = {
                let log = self.log.lock();
                log.facts
                    .iter()
                    .filter(|fact| fact.position.is_some_and(|p| p > from.position()))
                    .filter(|fact| request.specs.iter().any(|spec| spec.matches(fact)))
                    .cloned()
                    .collect()
            };

            for fact in &backlog {
                observer.on_next(fact).await?;
            }

            match request.mode {
                SubscriptionMode::Catchup => {
                    observer.on_catchup().await?;
                    observer.on_complete().await?;
                    Ok(Box::new(CompletedSubscription) as Box<dyn Subscription>)
                }
                SubscriptionMode::Follow => {
                    let mut rx = self.appended.subscribe();
                    let specs = request.specs.clone();
                    let closed = Arc::new(AtomicBool::new(false));
                    let closed_for_task = closed.clone();

                    let handle = tokio::spawn(async move {
                        loop {
                            match rx.recv().await {
                                Ok(fact) => {
                                    if closed_for_task.load(Ordering::Acquire) {
                                        break;
                                    }
                                    if !specs.iter().any(|spec| spec.matches(&fact)) {
                                        continue;
                                    }
                                    if let Err(error) = observer.on_next(&fact).await {
                                        observer.on_error(&error).await;
                                        break;
                                    }
                                }
                                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                                Err(broadcast::error::RecvError::Closed) => break,
                            }
                        }
                    });

                    Ok(Box::new(FollowSubscription {
                        closed,
                        handle: tokio::sync::Mutex::new(Some(handle)),
                    }) as Box<dyn Subscription>)
                }
            }
        })
    }
}

struct CompletedSubscription;

impl Subscription for CompletedSubscription {
    fn await_complete(&self, _max_wait: Option<Duration>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}

struct FollowSubscription {
    closed: Arc<AtomicBool>,
    handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Subscription for FollowSubscription {
    fn await_complete(&self, max_wait: Option<Duration>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            match max_wait {
                Some(wait) => {
                    tokio::time::sleep(wait).await;
                    Err(CoreError::CatchupTimeout)
                }
                None => std::future::pending().await,
            }
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.closed.store(true, Ordering::Release);
            if let Some(handle) = self.handle.lock().await.take() {
                handle.abort();
            }
            Ok(())
        })
    }
}
