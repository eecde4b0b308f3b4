//! Logical time
//!
//! Tags are the runtime's unit of global ordering: a pair of logical time
//! and microstep. Every effect in a program is attributed to exactly one tag.

use std::fmt;
use std::time::Duration;

/// A point on the logical timeline, in nanoseconds since origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct LogicalTime(u64);

impl LogicalTime {
    pub const ZERO: LogicalTime = LogicalTime(0);

    pub fn from_nanos(nanos: u64) -> Self {
        LogicalTime(nanos)
    }

    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Offset into the physical timeline relative to the clock anchor.
    pub fn as_duration(&self) -> Duration {
        Duration::from_nanos(self.0)
    }

    /// The instant `d` after this one. Saturates at the end of the timeline
    /// rather than wrapping.
    pub fn after(&self, d: Duration) -> LogicalTime {
        let nanos = u64::try_from(d.as_nanos()).unwrap_or(u64::MAX);
        LogicalTime(self.0.saturating_add(nanos))
    }
}

impl fmt::Display for LogicalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// Index for same-instant re-triggering (zero-delay chains).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Microstep(u32);

impl Microstep {
    pub const ZERO: Microstep = Microstep(0);

    pub fn from_raw(step: u32) -> Self {
        Microstep(step)
    }

    pub fn as_raw(&self) -> u32 {
        self.0
    }

    pub fn next(&self) -> Microstep {
        Microstep(self.0 + 1)
    }
}

impl fmt::Display for Microstep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// (logical time, microstep) — totally ordered, lexicographic.
///
/// Invariant: the runtime's tag cursor is monotonically non-decreasing;
/// the microstep resets to zero whenever logical time advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Tag {
    pub time: LogicalTime,
    pub microstep: Microstep,
}

impl Tag {
    /// The first tag of every execution.
    pub const ORIGIN: Tag = Tag {
        time: LogicalTime::ZERO,
        microstep: Microstep::ZERO,
    };

    pub fn new(time: LogicalTime, microstep: Microstep) -> Self {
        Tag { time, microstep }
    }

    /// The tag at which an effect scheduled from this tag with logical
    /// delay `d` becomes visible: `(t + d, 0)` for a positive delay,
    /// `(t, m + 1)` for a zero delay.
    pub fn delay(&self, d: Duration) -> Tag {
        if d.is_zero() {
            Tag {
                time: self.time,
                microstep: self.microstep.next(),
            }
        } else {
            Tag {
                time: self.time.after(d),
                microstep: Microstep::ZERO,
            }
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.time, self.microstep)
    }
}
