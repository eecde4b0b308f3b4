//! Platform time capability
//!
//! The scheduler never touches a time source directly; it consumes this
//! trait. Physical instants are offsets from the clock's anchor, which is
//! aligned with the logical origin at startup.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::{Error, Result};

/// Abstract "get physical time" and "sleep until physical time" capability.
pub trait PhysicalClock: Send + Sync {
    /// Physical time elapsed since the clock's anchor.
    fn now(&self) -> Duration;

    /// Block until physical time reaches `target`. Returning early is not
    /// allowed; returning late is inherent.
    fn sleep_until(&self, target: Duration);
}

/// Monotonic wall-clock time, anchored at construction.
#[derive(Debug)]
pub struct WallClock {
    anchor: Instant,
}

impl WallClock {
    /// Probe the monotonic source once at startup; an unusable clock is
    /// fatal here, before any tag executes.
    pub fn try_new() -> Result<Self> {
        let anchor = Instant::now();
        let probe = Instant::now();
        if probe < anchor {
            return Err(Error::ClockUnavailable {
                reason: "monotonic clock went backward during startup probe".to_string(),
            });
        }
        Ok(WallClock { anchor })
    }
}

impl PhysicalClock for WallClock {
    fn now(&self) -> Duration {
        self.anchor.elapsed()
    }

    fn sleep_until(&self, target: Duration) {
        let now = self.now();
        if let Some(remaining) = target.checked_sub(now) {
            if !remaining.is_zero() {
                trace!(?remaining, "sleeping until physical time");
                std::thread::sleep(remaining);
            }
        }
    }
}

/// A clock that never waits: sleeping jumps it straight to the target.
///
/// Used for fast-forward execution and tests; runs are reproducible
/// because no physical duration is ever observed.
#[derive(Debug, Default)]
pub struct VirtualClock {
    now_nanos: AtomicU64,
}

impl VirtualClock {
    pub fn new() -> Self {
        VirtualClock {
            now_nanos: AtomicU64::new(0),
        }
    }
}

impl PhysicalClock for VirtualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.now_nanos.load(Ordering::Acquire))
    }

    fn sleep_until(&self, target: Duration) {
        let target_nanos = u64::try_from(target.as_nanos()).unwrap_or(u64::MAX);
        self.now_nanos.fetch_max(target_nanos, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wall_clock_is_monotonic() {
        let clock = WallClock::try_new().unwrap();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn test_virtual_clock_jumps_on_sleep() {
        let clock = VirtualClock::new();
        clock.sleep_until(Duration::from_millis(5));
        assert_eq!(clock.now(), Duration::from_millis(5));

        // Never moves backward
        clock.sleep_until(Duration::from_millis(1));
        assert_eq!(clock.now(), Duration::from_millis(5));
    }
}
