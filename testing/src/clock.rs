//! Deterministic timestamps for tests that need to control what the
//! engine's event-processing-latency sampling sees on a fact's `_ts`
//! header.

use chrono::{DateTime, Utc};

/// Always returns the same instant, for reproducible latency assertions.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    time: DateTime<Utc>,
}

impl FixedClock {
    /// Build a clock fixed at `time`.
    #[must_use]
    pub const fn new(time: DateTime<Utc>) -> Self {
        Self { time }
    }

    /// The fixed instant.
    #[must_use]
    pub const fn now(&self) -> DateTime<Utc> {
        self.time
    }

    /// `now()` as epoch milliseconds, the format the `_ts` fact header
    /// is read in.
    #[must_use]
    pub fn now_millis(&self) -> i64 {
        self.time.timestamp_millis()
    }
}

/// A fixed clock at `2025-01-01T00:00:00Z`, for tests that don't care
/// about the specific instant, only that it's stable.
#[must_use]
pub fn test_clock() -> FixedClock {
    FixedClock::new(DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_else(Utc::now))
}
