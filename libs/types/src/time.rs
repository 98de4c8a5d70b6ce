//! Time handling for the feature pipeline
//!
//! All timestamps are exchange-local `NaiveDateTime` values. The pipeline
//! never reads the wall clock directly: every duration-based decision goes
//! through a [`Clock`] so that replay and backtesting are deterministic.

use std::sync::RwLock;

use chrono::{Local, NaiveDateTime, TimeDelta};

/// A datum carrying the instant it describes
pub trait Timestamped {
    /// Instant this datum refers to
    fn timestamp(&self) -> NaiveDateTime;
}

impl<T: Timestamped + ?Sized> Timestamped for &T {
    fn timestamp(&self) -> NaiveDateTime {
        (**self).timestamp()
    }
}

/// Current-time oracle
pub trait Clock: Send + Sync {
    /// The current time as seen by the pipeline
    fn now(&self) -> NaiveDateTime;
}

/// Clock that only moves when told to
///
/// Used for replay and backtesting, where time is driven by the recorded
/// event stream rather than the host.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<NaiveDateTime>,
}

impl ManualClock {
    /// Create a clock frozen at `start`
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Move the clock to `time`
    ///
    /// Moving backwards is permitted; callers replaying recorded data are
    /// responsible for feeding monotonic times.
    pub fn set(&self, time: NaiveDateTime) {
        match self.now.write() {
            Ok(mut now) => *now = time,
            Err(poisoned) => *poisoned.into_inner() = time,
        }
    }

    /// Advance the clock by `delta`
    pub fn advance(&self, delta: TimeDelta) {
        match self.now.write() {
            Ok(mut now) => *now += delta,
            Err(poisoned) => *poisoned.into_inner() += delta,
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        match self.now.read() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Host clock in local time, for live trading
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}
