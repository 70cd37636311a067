//! The fact data model: `Fact`, `FactSpec`, `Cursor` and their supporting types.
//!
//! A fact is the unit the runtime exchanges with the remote log. Facts are
//! opaque to the runtime beyond their header fields; the payload is handled
//! entirely by a [`crate::codec::PayloadCodec`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier for a single fact.
///
/// Generated fresh by the [`crate::converter::FactConverter`] for every
/// candidate fact; never reused across publish retries, even when the
/// retried fact's content is unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FactId(Uuid);

impl FactId {
    /// Generate a new, random fact id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing uuid, e.g. one assigned by the remote log.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// The underlying uuid.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for FactId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned ordering key. Absent until the fact has been durably
/// appended to the log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FactPosition(u64);

impl FactPosition {
    /// Construct a position from its raw serial number.
    #[must_use]
    pub const fn new(serial: u64) -> Self {
        Self(serial)
    }

    /// The raw serial number.
    #[must_use]
    pub const fn serial(&self) -> u64 {
        self.0
    }

    /// The position preceding the first ever appended fact.
    #[must_use]
    pub const fn beginning() -> Self {
        Self(0)
    }
}

/// A range of acceptable schema versions for a [`FactSpec`] match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionRange {
    /// Matches exactly one schema version.
    Exact(u32),
    /// Matches the given version or any later one.
    AtLeast(u32),
}

impl VersionRange {
    /// Whether `version` satisfies this range.
    #[must_use]
    pub const fn matches(&self, version: u32) -> bool {
        match self {
            Self::Exact(v) => version == *v,
            Self::AtLeast(v) => version >= *v,
        }
    }
}

/// A filter describing which facts a projection or subscription is
/// interested in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactSpec {
    /// Logical namespace the fact belongs to.
    pub namespace: String,
    /// Fact type name within the namespace.
    pub r#type: String,
    /// Acceptable schema version range.
    pub version: VersionRange,
    /// Optional aggregate-id predicate; `None` matches any aggregate.
    pub aggregate_id: Option<String>,
    /// Header key/value pairs that must all be present and equal on a
    /// matching fact.
    pub meta_match: BTreeMap<String, String>,
}

impl FactSpec {
    /// Build a spec matching an exact `(namespace, type, version)` triple
    /// with no further predicates.
    #[must_use]
    pub fn exact(namespace: impl Into<String>, r#type: impl Into<String>, version: u32) -> Self {
        Self {
            namespace: namespace.into(),
            r#type: r#type.into(),
            version: VersionRange::Exact(version),
            aggregate_id: None,
            meta_match: BTreeMap::new(),
        }
    }

    /// Whether `fact` satisfies this spec.
    #[must_use]
    pub fn matches(&self, fact: &Fact) -> bool {
        if self.namespace != fact.namespace || self.r#type != fact.r#type {
            return false;
        }
        if !self.version.matches(fact.version) {
            return false;
        }
        if let Some(expected) = &self.aggregate_id
            && fact.headers.get("aggregateId") != Some(expected)
        {
            return false;
        }
        self.meta_match
            .iter()
            .all(|(k, v)| fact.headers.get(k) == Some(v))
    }
}

/// A single immutable unit on the log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Fact {
    /// Stable identifier, assigned by the converter.
    pub id: FactId,
    /// Logical namespace.
    pub namespace: String,
    /// Fact type name.
    pub r#type: String,
    /// Schema version of the payload.
    pub version: u32,
    /// Header key/value pairs (ordered for deterministic serialization).
    pub headers: BTreeMap<String, String>,
    /// Encoded payload bytes; format is owned by the configured codec.
    pub payload: Vec<u8>,
    /// Server-assigned ordering key; `None` before durable append.
    pub position: Option<FactPosition>,
}

impl Fact {
    /// Build a new, not-yet-appended fact.
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        r#type: impl Into<String>,
        version: u32,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            id: FactId::new(),
            namespace: namespace.into(),
            r#type: r#type.into(),
            version,
            headers: BTreeMap::new(),
            payload,
            position: None,
        }
    }

    /// Attach a header, returning `self` for chaining.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// A marker of "how far" a consumer has progressed through a fact stream.
///
/// Orderable on the underlying [`FactPosition`], not on [`FactId`] (ids
/// carry no intrinsic order).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    fact_id: Option<FactId>,
    position: FactPosition,
}

impl Cursor {
    /// The cursor preceding any fact.
    #[must_use]
    pub const fn beginning() -> Self {
        Self {
            fact_id: None,
            position: FactPosition::beginning(),
        }
    }

    /// Construct a cursor pointing just past `fact`.
    ///
    /// Returns `None` if `fact.position` is `None` (the fact has not been
    /// appended yet and therefore has no ordering key to derive a cursor
    /// from).
    #[must_use]
    pub fn after(fact: &Fact) -> Option<Self> {
        Some(Self {
            fact_id: Some(fact.id),
            position: fact.position?,
        })
    }

    /// Reconstruct a cursor from its raw parts, for backends that persist
    /// `(fact_id, position)` and need to rebuild a `Cursor` on read-back
    /// rather than deriving one from a freshly appended [`Fact`].
    #[must_use]
    pub const fn from_parts(fact_id: Option<FactId>, position: FactPosition) -> Self {
        Self { fact_id, position }
    }

    /// The fact id this cursor points past, if any.
    #[must_use]
    pub const fn fact_id(&self) -> Option<FactId> {
        self.fact_id
    }

    /// The underlying ordering key.
    #[must_use]
    pub const fn position(&self) -> FactPosition {
        self.position
    }
}

impl PartialOrd for Cursor {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cursor {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.position.cmp(&other.position)
    }
}
