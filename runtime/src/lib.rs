//! # factflow-runtime
//!
//! Orchestration layer for the factflow event-sourcing runtime: drives
//! fact subscriptions into projections, coordinates optimistic-locked
//! publish, and exposes the [`engine::ProjectionEngine`] that ties both
//! together with snapshot persistence and managed-object cleanup.
//!
//! ## Core components
//!
//! - [`subscription::SubscriptionDriver`]: applies catchup/follow facts
//!   to a projection in log order.
//! - [`locking::LockingCoordinator`]: the freshen → publish →
//!   retry-on-conflict loop behind `with_lock_on`.
//! - [`engine::ProjectionEngine`]: the public orchestrating surface —
//!   `publish`, `fetch`, `find`, `update`, `with_lock_on`,
//!   `subscribe_and_block`, `close`.
//! - [`managed::ManagedRegistry`]: LIFO shutdown-hook registry the engine
//!   drains on close.
//! - [`config::EngineConfig`]: lock retry bound, token renewal interval,
//!   default catchup wait.
//! - [`metrics::EngineMetrics`]: Prometheus recorders for the engine's
//!   four timed spans and one gauge.
//! - [`retry::RetryPolicy`] and [`circuit_breaker::CircuitBreaker`]:
//!   general-purpose resilience helpers used by transport
//!   implementations (see `factflow-redpanda`).

pub mod circuit_breaker;
pub mod config;
pub mod engine;
pub mod error;
pub mod locking;
pub mod managed;
pub mod metrics;
pub mod retry;
pub mod subscription;

pub use config::{EngineConfig, EngineConfigBuilder};
pub use engine::ProjectionEngine;
pub use error::EngineError;
pub use locking::{LockContext, LockingCoordinator};
pub use managed::{FnShutdownHook, ManagedRegistry, ShutdownHook};
pub use subscription::SubscriptionDriver;

pub use error::Result;
