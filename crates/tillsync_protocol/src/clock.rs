//! Per-device monotonic clock.

use crate::ids::Timestamp;
use std::sync::atomic::{AtomicU64, Ordering};

/// A device-local clock whose readings strictly increase.
///
/// Readings follow the wall clock when it moves forward and otherwise step
/// one millisecond past the previous reading. Timestamps observed from
/// remote records are folded in with [`DeviceClock::observe`], so a local
/// edit made after seeing a remote version always orders after it even when
/// the two devices' wall clocks disagree.
#[derive(Debug, Default)]
pub struct DeviceClock {
    last: AtomicU64,
}

impl DeviceClock {
    /// Creates a clock that has issued no readings yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a clock whose next reading is after `floor`.
    ///
    /// Used on restart so readings stay monotonic across process lifetimes.
    pub fn starting_after(floor: Timestamp) -> Self {
        Self {
            last: AtomicU64::new(floor.as_millis()),
        }
    }

    /// Issues the next reading using the wall clock.
    pub fn tick(&self) -> Timestamp {
        self.tick_at(Timestamp::wall_clock())
    }

    /// Issues the next reading given a wall clock value.
    pub fn tick_at(&self, wall: Timestamp) -> Timestamp {
        let wall = wall.as_millis();
        let mut next = 0;
        let _ = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                next = wall.max(prev.saturating_add(1));
                Some(next)
            });
        Timestamp::from_millis(next)
    }

    /// Folds a timestamp seen on another device into this clock.
    pub fn observe(&self, seen: Timestamp) {
        self.last.fetch_max(seen.as_millis(), Ordering::SeqCst);
    }

    /// Returns the last issued or observed reading.
    pub fn last(&self) -> Timestamp {
        Timestamp::from_millis(self.last.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readings_strictly_increase_when_wall_clock_stalls() {
        let clock = DeviceClock::new();
        let wall = Timestamp::from_millis(1_000);
        let a = clock.tick_at(wall);
        let b = clock.tick_at(wall);
        let c = clock.tick_at(Timestamp::from_millis(500));
        assert_eq!(a.as_millis(), 1_000);
        assert_eq!(b.as_millis(), 1_001);
        assert_eq!(c.as_millis(), 1_002);
    }

    #[test]
    fn follows_wall_clock_forward() {
        let clock = DeviceClock::new();
        clock.tick_at(Timestamp::from_millis(10));
        assert_eq!(clock.tick_at(Timestamp::from_millis(50)).as_millis(), 50);
    }

    #[test]
    fn observed_remote_time_pushes_clock_forward() {
        let clock = DeviceClock::new();
        clock.tick_at(Timestamp::from_millis(100));
        clock.observe(Timestamp::from_millis(5_000));
        assert_eq!(clock.tick_at(Timestamp::from_millis(101)).as_millis(), 5_001);

        // Observing the past changes nothing.
        clock.observe(Timestamp::from_millis(3));
        assert_eq!(clock.last().as_millis(), 5_001);
    }

    #[test]
    fn restart_floor() {
        let clock = DeviceClock::starting_after(Timestamp::from_millis(9_999));
        assert_eq!(clock.tick_at(Timestamp::from_millis(1)).as_millis(), 10_000);
    }
}
