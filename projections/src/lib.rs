//! Snapshot repositories for factflow.
//!
//! # Overview
//!
//! This crate provides the two snapshot repository shapes the engine
//! composes on top of a [`factflow_core::SnapshotCache`]:
//! - [`ProjectionSnapshotRepository`] for plain
//!   [`factflow_core::SnapshotProjection`]s, read with `fetch`.
//! - [`AggregateSnapshotRepository`] for [`factflow_core::Aggregate`]s,
//!   read with `find` and additionally supporting a blocking write for
//!   callers that must observe durability before returning.
//!
//! Both key their snapshots through [`factflow_core::SnapshotKey`], so a
//! schema version bump naturally invalidates stale snapshots rather than
//! requiring an explicit migration step.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod repository;

pub use repository::{AggregateSnapshotRepository, ProjectionSnapshotRepository};
