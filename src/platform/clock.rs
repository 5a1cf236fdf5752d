//! Tick counters
//!
//! `MonotonicClock` reads the host clock. `ManualClock` is a shared counter
//! that only moves when told to; tests and simulations drive it from the idle
//! callback to stand in for sleeping.

use crate::kernel::error::KernelResult;
use crate::kernel::time::{Tick, TickSource};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Host monotonic clock, counted from construction
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

    pub fn source(self, hz: u32) -> KernelResult<TickSource> {
        let origin = self.origin;
        TickSource::new(hz, move || {
            let ticks = origin.elapsed().as_nanos() * hz as u128 / 1_000_000_000;
            ticks.min(Tick::MAX as u128) as Tick
        })
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Manually advanced tick counter
///
/// Clones share the same counter.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    ticks: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Tick {
        self.ticks.load(Ordering::Acquire)
    }

    pub fn set(&self, ticks: Tick) {
        self.ticks.store(ticks, Ordering::Release);
    }

    /// Move the counter forward, saturating at `Tick::MAX`
    pub fn advance(&self, ticks: Tick) {
        let _ = self
            .ticks
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |t| {
                Some(t.saturating_add(ticks))
            });
    }

    pub fn source(&self, hz: u32) -> KernelResult<TickSource> {
        let ticks = Arc::clone(&self.ticks);
        TickSource::new(hz, move || ticks.load(Ordering::Acquire))
    }
}
