//! An in-process [`SnapshotCache`] backed by a `HashMap`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use factflow_core::{Result, Snapshot, SnapshotCache, SnapshotKey};
use parking_lot::RwLock;

/// A snapshot cache keyed in memory, for tests that exercise
/// `fetch`/`find` without a real blob store.
#[derive(Default)]
pub struct InMemorySnapshotCache {
    snapshots: RwLock<HashMap<String, Snapshot>>,
}

impl InMemorySnapshotCache {
    /// Build an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of snapshots currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    /// Whether no snapshots are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.read().is_empty()
    }
}

impl SnapshotCache for InMemorySnapshotCache {
    fn get(&self, key: &SnapshotKey) -> Pin<Box<dyn Future<Output = Result<Option<Snapshot>>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.snapshots.read().get(&key).cloned()) })
    }

    fn set(&self, snapshot: Snapshot) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.snapshots.write().insert(snapshot.key.to_string(), snapshot);
            Ok(())
        })
    }

    fn delete(&self, key: &SnapshotKey) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            self.snapshots.write().remove(&key);
            Ok(())
        })
    }
}
