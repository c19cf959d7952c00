//! Monotonic microsecond clocks
//!
//! All timing in the engine (silence detection, response timeout,
//! turnaround delay) compares a clock snapshot against a deadline on each
//! `update()` call.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Source of monotonic time in microseconds
pub trait Clock {
    fn now_micros(&self) -> u64;
}

/// Wall clock backed by [`Instant`]
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
    #[inline]
    fn now_micros(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}

/// Manually advanced clock
///
/// Clones share the same time source, so one handle can drive a master and
/// a slave in lock-step simulation.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, micros: u64) {
        self.now.set(micros);
    }

    pub fn advance(&self, micros: u64) {
        self.now.set(self.now.get().saturating_add(micros));
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now_micros(&self) -> u64 {
        self.now.get()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_micros(&self) -> u64 {
        (**self).now_micros()
    }
}
