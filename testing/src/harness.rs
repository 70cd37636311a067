//! A fluent test harness for driving a projector against a sequence of
//! facts without a live transport.
//!
//! Mirrors the teacher's `ProjectionTestHarness` (`given_events` /
//! `then_contains`), adapted from the store-and-key model to the
//! projector/fact model: `given` applies facts directly through a
//! [`Projector`] rather than appending to an event store first.

use factflow_core::{Fact, Projector, Result};

/// Drives facts through a `Projector` against a plain in-memory state
/// value, for projection unit tests that don't need a transport.
pub struct ProjectionTestHarness<P> {
    state: P,
    projector: Projector<P>,
}

impl<P: Default> ProjectionTestHarness<P> {
    /// Start from `P::default()`.
    #[must_use]
    pub fn new(projector: Projector<P>) -> Self {
        Self {
            state: P::default(),
            projector,
        }
    }
}

impl<P> ProjectionTestHarness<P> {
    /// Start from an explicit initial state, e.g. one restored from a
    /// snapshot fixture.
    #[must_use]
    pub const fn with_state(projector: Projector<P>, state: P) -> Self {
        Self { state, projector }
    }

    /// Apply a single fact.
    ///
    /// # Errors
    ///
    /// Returns whatever error the projector's handler raises.
    pub fn given(&mut self, fact: &Fact) -> Result<&mut Self> {
        self.projector.apply(&mut self.state, fact)?;
        Ok(self)
    }

    /// Apply a sequence of facts in order.
    ///
    /// # Errors
    ///
    /// Returns on the first fact that fails to apply; later facts are
    /// not attempted.
    pub fn given_all(&mut self, facts: &[Fact]) -> Result<&mut Self> {
        for fact in facts {
            self.given(fact)?;
        }
        Ok(self)
    }

    /// The current projected state.
    #[must_use]
    pub const fn state(&self) -> &P {
        &self.state
    }

    /// Consume the harness, returning the final state.
    #[must_use]
    pub fn into_state(self) -> P {
        self.state
    }
}
