//! # factflow-core
//!
//! Data model and trait surface for the factflow event-sourcing runtime:
//! facts, fact specs, cursors, the projection trait family, the fact
//! converter and projector, and the external collaborator traits
//! (`Transport`, `SnapshotCache`, `PayloadCodec`, `WriteToken`) that the
//! runtime crate orchestrates.
//!
//! ## Core Concepts
//!
//! - **Fact**: an immutable unit on the remote log (see [`fact::Fact`])
//! - **Projection**: a read model kept current from facts (see [`projection`])
//! - **Projector**: dispatches facts to a projection's handlers (see [`projector::Projector`])
//! - **Transport**: the remote log's wire client (see [`transport::Transport`])
//! - **SnapshotCache**: the blob store for projection snapshots (see [`snapshot::SnapshotCache`])

pub use serde::{Deserialize, Serialize};

pub mod codec;
pub mod converter;
pub mod error;
pub mod fact;
pub mod projection;
pub mod projector;
pub mod snapshot;
pub mod token;
pub mod transport;

pub use codec::{BincodeCodec, JsonCodec, PayloadCodec};
pub use converter::{FactConverter, ToFact};
pub use error::{CoreError, Result};
pub use fact::{Cursor, Fact, FactId, FactPosition, FactSpec, VersionRange};
pub use projection::{Aggregate, ManagedProjection, SnapshotProjection, SubscribedProjection};
pub use projector::{HandlerTable, Projector};
pub use snapshot::{Snapshot, SnapshotCache, SnapshotKey};
pub use token::{TokenLease, WriteToken};
pub use transport::{Subscription, SubscriptionMode, SubscriptionObserver, SubscriptionRequest, Transport};
