//! Tick source and time conversion
//!
//! The kernel never reads a clock directly. It is handed a tick function and
//! the frequency it runs at, and converts between ticks and milliseconds:
//! - Tick counts are `u64` and never wrap in practice
//! - Conversions saturate at the target type's range instead of wrapping
//! - Signed differences (`elapsed_ms`) are how lateness is reported

use super::error::{KernelError, KernelResult};
use std::fmt;
use std::sync::Arc;

/// Raw platform time unit
pub type Tick = u64;

type NowFn = dyn Fn() -> Tick + Send + Sync;

/// A monotonic tick counter plus its frequency
#[derive(Clone)]
pub struct TickSource {
    now: Arc<NowFn>,
    hz: u32,
}

impl TickSource {
    /// Wrap a tick function running at `hz` ticks per second
    pub fn new<F>(hz: u32, now: F) -> KernelResult<Self>
    where
        F: Fn() -> Tick + Send + Sync + 'static,
    {
        if hz == 0 {
            return Err(KernelError::InvalidArgument("tick frequency"));
        }
        Ok(Self {
            now: Arc::new(now),
            hz,
        })
    }

    /// Tick source backed by the host's monotonic clock
    pub fn monotonic(hz: u32) -> KernelResult<Self> {
        crate::platform::clock::MonotonicClock::new().source(hz)
    }

    pub fn hz(&self) -> u32 {
        self.hz
    }

    pub fn now(&self) -> Tick {
        (self.now)()
    }

    pub fn ms_to_ticks(&self, ms: u32) -> Tick {
        // u32 * u32 always fits in u64
        ms as u64 * self.hz as u64 / 1000
    }

    pub fn ticks_to_ms(&self, ticks: Tick) -> u32 {
        let ms = ticks as u128 * 1000 / self.hz as u128;
        ms.min(u32::MAX as u128) as u32
    }

    /// Milliseconds from `since` to `now`: positive when `now` is later,
    /// negative when it is earlier. Saturates to the `i32` range.
    pub fn elapsed_ms(&self, now: Tick, since: Tick) -> i32 {
        if now >= since {
            self.ticks_to_ms(now - since).min(i32::MAX as u32) as i32
        } else {
            -(self.ticks_to_ms(since - now).min(i32::MAX as u32) as i32)
        }
    }

    /// Current time in milliseconds since the tick origin
    pub fn now_ms(&self) -> u64 {
        let ms = self.now() as u128 * 1000 / self.hz as u128;
        ms.min(u64::MAX as u128) as u64
    }
}

impl fmt::Debug for TickSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickSource").field("hz", &self.hz).finish()
    }
}
