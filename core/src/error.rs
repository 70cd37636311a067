//! The unified error taxonomy for the factflow runtime.

use thiserror::Error;

/// Errors that can surface from core data-model and trait-boundary
/// operations.
///
/// Runtime-only conditions that depend on engine configuration (lock
/// retry exhaustion, catchup timeouts) live on `EngineError` in
/// `factflow-runtime` instead, which wraps this enum.
#[derive(Error, Debug)]
pub enum CoreError {
    /// The engine has already been closed; no further operations are
    /// accepted.
    #[error("engine is closed")]
    Closed,

    /// A caller passed an argument that is invalid for the operation,
    /// e.g. an `Aggregate` type to an entry point that requires a
    /// `SnapshotProjection`.
    ///
    /// The typed `fetch`/`find` split (see the `projection` module) makes
    /// this variant unreachable through the typed API; it is retained for
    /// API-surface completeness against future untyped entry points.
    #[error("invalid argument: {0}")]
    Argument(String),

    /// A `with_lock_on` call was attempted while one was already in
    /// flight on the same engine.
    #[error("nested lock attempted on the same engine")]
    NestedLock,

    /// A catchup subscription did not reach completion within its
    /// configured `max_wait`.
    #[error("catchup did not complete within the configured wait")]
    CatchupTimeout,

    /// Payload encoding or decoding failed.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// No handler in a `Projector`'s dispatch table matched an incoming
    /// fact.
    #[error("no handler registered for fact {namespace}/{type_} v{version}")]
    UnhandledFact {
        /// The fact's namespace.
        namespace: String,
        /// The fact's type name.
        #[allow(clippy::struct_field_names)]
        type_: String,
        /// The fact's schema version.
        version: u32,
    },

    /// An optimistic publish lost the race against a concurrent writer.
    #[error("concurrent modification detected for aggregate {aggregate_id}")]
    ConcurrentModification {
        /// The aggregate whose expected cursor no longer matched.
        aggregate_id: String,
    },

    /// A snapshot could not be read or written.
    ///
    /// Read failures degrade to a cache miss rather than surfacing this
    /// variant; it is only raised for writes, and only when the caller
    /// explicitly awaits the write (`put_blocking`).
    #[error("snapshot I/O failed: {0}")]
    SnapshotIo(String),

    /// The transport collaborator returned an error.
    #[error("transport error: {0}")]
    Transport(String),

    /// A write token could not be acquired or renewed.
    #[error("write token unavailable: {0}")]
    Token(String),
}

impl CoreError {
    /// Build an [`CoreError::UnhandledFact`] from its three key fields.
    #[must_use]
    pub fn unhandled_fact(namespace: impl Into<String>, type_: impl Into<String>, version: u32) -> Self {
        Self::UnhandledFact {
            namespace: namespace.into(),
            type_: type_.into(),
            version,
        }
    }
}

/// Convenience alias for core-crate fallible operations.
pub type Result<T> = std::result::Result<T, CoreError>;
