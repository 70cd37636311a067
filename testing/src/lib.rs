//! # factflow-testing
//!
//! In-memory test doubles and fixtures for factflow: a [`Transport`]
//! and [`SnapshotCache`] implementation fast and deterministic enough
//! to drive real `ProjectionEngine` calls in unit tests, plus a clock
//! fixture and a lightweight projector test harness.
//!
//! [`Transport`]: factflow_core::Transport
//! [`SnapshotCache`]: factflow_core::SnapshotCache

pub mod clock;
pub mod harness;
pub mod snapshot_cache;
pub mod token;
pub mod transport;

pub use clock::{FixedClock, test_clock};
pub use harness::ProjectionTestHarness;
pub use snapshot_cache::InMemorySnapshotCache;
pub use token::InMemoryWriteToken;
pub use transport::InMemoryTransport;
