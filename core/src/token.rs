//! Cross-process single-writer leasing.
//!
//! A [`WriteToken`] is how the engine coordinates leadership for
//! operations that must run on exactly one process at a time (e.g. a
//! `subscribe_and_block` loop driving a `ManagedProjection` forward).
//! The lease is released on every exit path because it is represented as
//! a guard value dropped at the end of its scope, not by a try/finally
//! pair a caller could forget.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::Result;

/// A trait object-friendly write-token source.
///
/// `try_acquire` returns `Pin<Box<dyn Future>>` rather than using
/// `impl Future` because implementations are held behind `Arc<dyn
/// WriteToken>` in the projection engine.
pub trait WriteToken: Send + Sync {
    /// Attempt to acquire the token for `lease`, returning `None` if
    /// another process currently holds it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::CoreError::Token`] if the backing store
    /// could not be reached.
    fn try_acquire(
        &self,
        lease: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Option<TokenLease>>> + Send + '_>>;
}

/// A held write-token lease. Releases on drop.
pub struct TokenLease {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl TokenLease {
    /// Construct a lease from a release callback.
    #[must_use]
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for TokenLease {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for TokenLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenLease").finish_non_exhaustive()
    }
}
