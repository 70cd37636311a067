//! An in-process [`WriteToken`] that fails a configurable number of
//! acquisition attempts before succeeding, for exercising
//! `subscribe_and_block`'s retry loop.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use factflow_core::{Result, TokenLease, WriteToken};
use parking_lot::Mutex;

/// A write token held by at most one lease at a time, failing
/// `fail_first_n` acquisition attempts before granting one.
pub struct InMemoryWriteToken {
    held: Mutex<bool>,
    failures_remaining: AtomicU32,
    released: std::sync::Arc<AtomicBool>,
}

impl InMemoryWriteToken {
    /// Build a token that fails `fail_first_n` attempts before granting
    /// a lease.
    #[must_use]
    pub fn new(fail_first_n: u32) -> Self {
        Self {
            held: Mutex::new(false),
            failures_remaining: AtomicU32::new(fail_first_n),
            released: std::sync::Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether the most recently granted lease has since been released.
    #[must_use]
    pub fn released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl WriteToken for InMemoryWriteToken {
    fn try_acquire(
        &self,
        _lease: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Option<TokenLease>>> + Send + '_>> {
        Box::pin(async move {
            if self.failures_remaining.load(Ordering::Acquire) > 0 {
                self.failures_remaining.fetch_sub(1, Ordering::AcqRel);
                return Ok(None);
            }

            let mut held = self.held.lock();
            if *held {
                return Ok(None);
            }
            *held = true;
            self.released.store(false, Ordering::Release);

            let released = self.released.clone();
            Ok(Some(TokenLease::new(move || {
                released.store(true, Ordering::Release);
            })))
        })
    }
}
