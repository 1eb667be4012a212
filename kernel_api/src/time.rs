//! Time abstractions

use core::ops::Add;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A point in simulated time, counted in SysTick interrupts
///
/// Unlike wall-clock time, a tick only advances when the simulated SysTick
/// handler runs. It never decreases except when the whole simulation is
/// reset.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Tick(u64);

impl Tick {
    /// Tick value at boot
    pub const ZERO: Tick = Tick(0);

    /// Creates a tick from its raw count
    pub const fn new(count: u64) -> Self {
        Self(count)
    }

    /// Returns the raw count
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Returns the following tick
    pub const fn next(&self) -> Tick {
        Tick(self.0.saturating_add(1))
    }

    /// Returns the deadline `delay` ticks after this one
    pub const fn after(&self, delay: u64) -> Tick {
        Tick(self.0.saturating_add(delay))
    }

    /// Returns true once `deadline` has been reached
    pub fn has_reached(&self, deadline: Tick) -> bool {
        *self >= deadline
    }
}

impl Add<u64> for Tick {
    type Output = Tick;

    fn add(self, delay: u64) -> Self::Output {
        self.after(delay)
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_creation() {
        assert_eq!(Tick::ZERO.value(), 0);
        assert_eq!(Tick::new(4).value(), 4);
        assert_eq!(Tick::default(), Tick::ZERO);
    }

    #[test]
    fn test_tick_next() {
        assert_eq!(Tick::ZERO.next(), Tick::new(1));
        assert_eq!(Tick::new(u64::MAX).next(), Tick::new(u64::MAX));
    }

    #[test]
    fn test_tick_deadline_arithmetic() {
        let now = Tick::new(10);
        assert_eq!(now.after(4), Tick::new(14));
        assert_eq!(now + 2, Tick::new(12));
        assert_eq!(Tick::new(u64::MAX - 1).after(5), Tick::new(u64::MAX));
    }

    #[test]
    fn test_tick_has_reached() {
        let deadline = Tick::new(4);
        assert!(!Tick::new(3).has_reached(deadline));
        assert!(Tick::new(4).has_reached(deadline));
        assert!(Tick::new(5).has_reached(deadline));
    }

    #[test]
    fn test_tick_serializes_as_number() {
        assert_eq!(serde_json::to_string(&Tick::new(7)).unwrap(), "7");
    }
}
