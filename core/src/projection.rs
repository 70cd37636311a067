//! The projection trait family: `SnapshotProjection`, `Aggregate`,
//! `ManagedProjection`, `SubscribedProjection`.
//!
//! These traits replace runtime reflection (used by the system this
//! runtime is modeled on to discover a projection's handler table and
//! construct fresh instances) with an explicit, typed contract the
//! application implements once per projection type.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::fact::Cursor;

/// A projection that can be snapshotted and restored wholesale.
///
/// `fetch`-style entry points are generic over this trait; `find`-style
/// entry points require the stronger [`Aggregate`] bound. This split is
/// what makes passing an aggregate to `fetch` (or vice versa) a compile
/// error rather than the runtime `ArgumentError` the reflection-based
/// system raised.
pub trait SnapshotProjection: Default + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Schema version for this projection's snapshot payload.
    ///
    /// Bumping this invalidates previously stored snapshots for the same
    /// class (they simply stop matching the derived `SnapshotKey` and are
    /// treated as a cache miss).
    const SCHEMA_VERSION: u32 = 0;

    /// A stable, fully-qualified class identifier used as the first
    /// segment of this projection's `SnapshotKey`.
    fn class_name() -> &'static str;
}

/// A [`SnapshotProjection`] that is additionally scoped to one
/// aggregate instance, identified by `aggregate_id`.
pub trait Aggregate: SnapshotProjection {
    /// The aggregate instance this projection represents.
    fn aggregate_id(&self) -> &str;

    /// Assign the aggregate id after construction (mirrors the
    /// lifecycle documented on the data model: an aggregate snapshot is
    /// constructed first, then bound to its id).
    fn set_aggregate_id(&mut self, id: String);
}

/// A projection the engine keeps current, either on demand
/// (`update`/`find`) or via a continuous subscription.
///
/// The critical section around a mutation is realized as
/// `execute_update`, matching the closure-based critical-section
/// pattern already used for the Store's state mutations elsewhere in the
/// runtime, rather than exposing the lock itself. The mutable state
/// lives behind the associated `State` type so implementations can hold
/// it in a `parking_lot::Mutex`/`RwLock` internally without requiring
/// `&mut Self` at the call site.
pub trait ManagedProjection: Send + Sync {
    /// The mutable state `execute_update` grants access to.
    type State: Send;

    /// The cursor this projection has been advanced to.
    fn cursor(&self) -> Cursor;

    /// Run `f` against the projection's mutable state under the
    /// projection's internal lock, returning whatever `f` returns.
    fn execute_update<R>(&self, f: impl FnOnce(&mut Self::State) -> R) -> R;

    /// Advance the cursor to `cursor`, called by the subscription driver
    /// immediately after a fact has been applied.
    ///
    /// Implementations back this with the same interior-mutability cell
    /// `execute_update` locks, so a concurrent `cursor()` read never
    /// observes a cursor pointing past a fact whose handler has not yet
    /// run. Callers must only ever advance to a strictly later position
    /// than the current cursor (the data model's monotonic-advance
    /// invariant); implementations may assert this.
    fn advance_cursor(&self, cursor: Cursor);
}

/// A [`ManagedProjection`] additionally kept current by a live
/// subscription, and therefore eligible to participate in
/// `with_lock_on`'s optimistic publish protocol via its
/// [`crate::token::WriteToken`].
pub trait SubscribedProjection: ManagedProjection {
    /// The write-token type coordinating single-writer leadership for
    /// this projection across processes.
    type Token: crate::token::WriteToken;

    /// The token instance bound to this projection.
    fn token(&self) -> &Self::Token;
}
