//! High-resolution clocks.
//!
//! Metric timestamps are milliseconds as `f64`, measured from an arbitrary
//! origin (the moment the clock was created). Only differences between two
//! readings of the same clock are meaningful.

use std::cell::Cell;
use std::fmt::Debug;
use std::rc::Rc;
use std::time::Instant;

thread_local! {
    static DEFAULT_CLOCK: Rc<MonotonicClock> = Rc::new(MonotonicClock::new());
}

/// The clock shared by every metric created without an explicit one.
///
/// All metrics on a thread read the same origin, so their timestamps can be
/// compared and aggregated.
pub fn default_clock() -> Rc<dyn Clock> {
    let clock: Rc<MonotonicClock> = DEFAULT_CLOCK.with(Rc::clone);
    clock
}

/// A monotonic source of timestamps in milliseconds.
pub trait Clock: Debug {
    fn now(&self) -> f64;
}

/// Monotonic wall clock backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// A clock that only moves when told to.
///
/// Useful for tests and for hosts that already own a timestamp source.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<f64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    pub fn set(&self, time: f64) {
        self.now.set(time);
    }

    pub fn advance(&self, delta: f64) {
        self.now.set(self.now.get() + delta);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.now.get()
    }
}
