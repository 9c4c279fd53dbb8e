//! Time source for every time-window decision in the ledger.
//!
//! Auctions open and close and tasks fall due by comparing against
//! [`Clock::now`]. Production uses [`SystemClock`]; tests and the one-shot
//! `sweep` command can pin or advance time with [`ManualClock`].

use std::sync::{Arc, Mutex};

use chrono::{NaiveDateTime, TimeDelta, Timelike, Utc};

/// Source of "now" as a naive UTC timestamp (the storage representation).
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().naive_utc()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<NaiveDateTime>>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Starts at the current wall-clock time, truncated to whole seconds.
    pub fn starting_now() -> Self {
        let now = Utc::now().naive_utc();
        Self::new(now.with_nanosecond(0).unwrap_or(now))
    }

    pub fn set(&self, to: NaiveDateTime) {
        *self.lock() = to;
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut guard = self.lock();
        *guard += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NaiveDateTime> {
        // A poisoned clock still holds a valid timestamp.
        self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.lock()
    }
}
