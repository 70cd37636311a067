//! Runtime-level error taxonomy.
//!
//! Wraps [`CoreError`] with the two variants that depend on engine
//! configuration rather than core data (`LockExceededError`,
//! `CatchupTimeoutError`'s `EngineConfig`-aware framing), so a caller of
//! `factflow-runtime` sees one error type at the public surface instead of
//! having to match on both `CoreError` and a runtime-only enum.

use thiserror::Error;

use factflow_core::CoreError;

/// Errors surfaced by [`crate::engine::ProjectionEngine`] and its
/// collaborators.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A data-model or trait-boundary failure from `factflow-core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The optimistic-publish retry bound was exhausted without a
    /// successful publish.
    #[error("optimistic lock exceeded after {attempts} attempt(s)")]
    LockExceeded {
        /// Number of attempts made before giving up.
        attempts: u32,
        /// The conflict error from the final attempt.
        #[source]
        last: CoreError,
    },
}

/// Convenience alias for runtime-crate fallible operations.
pub type Result<T> = std::result::Result<T, EngineError>;
