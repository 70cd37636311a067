//! Snapshot blob storage: keying, payload shape, and the cache trait.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::error::Result;
use crate::fact::Cursor;

/// Deterministic key identifying a stored snapshot.
///
/// Format: `{class_fqn}:{schema_version}` for a [`crate::projection::SnapshotProjection`],
/// or `{class_fqn}:{schema_version}:{aggregate_id}` for an
/// [`crate::projection::Aggregate`]. This is a persisted, observable
/// layout and must stay stable.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SnapshotKey {
    class_fqn: String,
    schema_version: u32,
    aggregate_id: Option<String>,
}

impl SnapshotKey {
    /// Key for a class-scoped snapshot (no aggregate id).
    #[must_use]
    pub fn for_class(class_fqn: impl Into<String>, schema_version: u32) -> Self {
        Self {
            class_fqn: class_fqn.into(),
            schema_version,
            aggregate_id: None,
        }
    }

    /// Key for an aggregate-scoped snapshot.
    #[must_use]
    pub fn for_aggregate(
        class_fqn: impl Into<String>,
        schema_version: u32,
        aggregate_id: impl Into<String>,
    ) -> Self {
        Self {
            class_fqn: class_fqn.into(),
            schema_version,
            aggregate_id: Some(aggregate_id.into()),
        }
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.aggregate_id {
            Some(id) => write!(f, "{}:{}:{}", self.class_fqn, self.schema_version, id),
            None => write!(f, "{}:{}", self.class_fqn, self.schema_version),
        }
    }
}

/// A stored projection snapshot.
#[derive(Clone, Debug)]
pub struct Snapshot {
    /// The key this snapshot is stored under.
    pub key: SnapshotKey,
    /// The cursor the snapshotted projection had been advanced to.
    pub last_fact: Cursor,
    /// Encoded payload bytes.
    pub bytes: Vec<u8>,
    /// Whether `bytes` has had the codec's own compression applied.
    pub compressed: bool,
}

/// External collaborator storing snapshot blobs.
///
/// Read failures degrade to `Ok(None)` (a miss) rather than propagating;
/// write failures are surfaced so `put_blocking` callers can decide
/// whether to retry, while fire-and-forget `put` callers may simply log
/// and discard them.
pub trait SnapshotCache: Send + Sync {
    /// Fetch the snapshot stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// This method does not propagate read failures; implementations
    /// should return `Ok(None)` and log internally instead.
    fn get(&self, key: &SnapshotKey) -> Pin<Box<dyn Future<Output = Result<Option<Snapshot>>> + Send + '_>>;

    /// Store `snapshot` under its key, overwriting any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::CoreError::SnapshotIo`] on failure.
    fn set(&self, snapshot: Snapshot) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Remove the snapshot stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::CoreError::SnapshotIo`] on failure.
    fn delete(&self, key: &SnapshotKey) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_key_display_has_two_segments() {
        let key = SnapshotKey::for_class("orders.OrderSummary", 3);
        assert_eq!(key.to_string(), "orders.OrderSummary:3");
    }

    #[test]
    fn aggregate_key_display_has_three_segments() {
        let key = SnapshotKey::for_aggregate("orders.Order", 1, "order-42");
        assert_eq!(key.to_string(), "orders.Order:1:order-42");
    }

    proptest::proptest! {
        #[test]
        fn distinct_class_tuples_render_to_distinct_keys(
            a_class in "[a-zA-Z0-9_.]{1,16}",
            a_version: u32,
            b_class in "[a-zA-Z0-9_.]{1,16}",
            b_version: u32,
        ) {
            proptest::prop_assume!((&a_class, a_version) != (&b_class, b_version));
            let a = SnapshotKey::for_class(a_class, a_version);
            let b = SnapshotKey::for_class(b_class, b_version);
            proptest::prop_assert_ne!(a.to_string(), b.to_string());
        }

        #[test]
        fn distinct_aggregate_tuples_render_to_distinct_keys(
            a_class in "[a-zA-Z0-9_.]{1,16}",
            a_version: u32,
            a_id in "[a-zA-Z0-9_.]{1,16}",
            b_class in "[a-zA-Z0-9_.]{1,16}",
            b_version: u32,
            b_id in "[a-zA-Z0-9_.]{1,16}",
        ) {
            proptest::prop_assume!((&a_class, a_version, &a_id) != (&b_class, b_version, &b_id));
            let a = SnapshotKey::for_aggregate(a_class, a_version, a_id);
            let b = SnapshotKey::for_aggregate(b_class, b_version, b_id);
            proptest::prop_assert_ne!(a.to_string(), b.to_string());
        }

        #[test]
        fn equal_tuples_render_to_equal_keys(
            class in "[a-zA-Z0-9_.]{1,16}",
            version: u32,
            id in "[a-zA-Z0-9_.]{1,16}",
        ) {
            let a = SnapshotKey::for_aggregate(class.clone(), version, id.clone());
            let b = SnapshotKey::for_aggregate(class, version, id);
            proptest::prop_assert_eq!(a.to_string(), b.to_string());
        }
    }
}
