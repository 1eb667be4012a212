//! # Simulated SysTick Counter
//!
//! Deterministic tick counter for the simulated kernel.
//!
//! ## Philosophy
//!
//! **Determinism enables thorough testing.**
//!
//! The counter never advances on its own. Only the SysTick handler's
//! `IncrementTick` instruction moves it forward, exactly one tick at a time,
//! and a kernel reset starts over with a fresh counter.

use kernel_api::Tick;

/// Simulated tick counter
///
/// # Examples
///
/// ```
/// use sim_kernel::timer::SimTimer;
/// use kernel_api::Tick;
///
/// let mut timer = SimTimer::new();
/// assert_eq!(timer.now(), Tick::ZERO);
///
/// timer.increment_tick();
/// timer.increment_tick();
/// assert_eq!(timer.now(), Tick::new(2));
/// ```
#[derive(Debug, Clone, Default)]
pub struct SimTimer {
    now: Tick,
}

impl SimTimer {
    /// Creates a counter at tick 0
    pub fn new() -> Self {
        Self { now: Tick::ZERO }
    }

    /// Advances time by exactly one tick and returns the new value
    pub fn increment_tick(&mut self) -> Tick {
        self.now = self.now.next();
        self.now
    }

    /// Returns the current tick without advancing
    pub fn now(&self) -> Tick {
        self.now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_timer_starts_at_zero() {
        let timer = SimTimer::new();
        assert_eq!(timer.now(), Tick::ZERO);
    }

    #[test]
    fn test_increment_tick_advances_by_one() {
        let mut timer = SimTimer::new();
        assert_eq!(timer.increment_tick(), Tick::new(1));
        assert_eq!(timer.increment_tick(), Tick::new(2));
        assert_eq!(timer.now(), Tick::new(2));
    }

    #[test]
    fn test_monotonic_progression() {
        let mut timer = SimTimer::new();
        let mut last = timer.now();
        for _ in 0..50 {
            let next = timer.increment_tick();
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn test_clone_preserves_state() {
        let mut timer1 = SimTimer::new();
        timer1.increment_tick();
        let timer2 = timer1.clone();
        assert_eq!(timer1.now(), timer2.now());
    }
}
