//! Deterministic SysTick injection
//!
//! Decides when the simulated SysTick interrupt becomes due. Nothing here
//! reads a wall clock and nothing is unseeded: the same source and the same
//! sequence of executed instructions always produce the same ticks.
//!
//! ## Example
//!
//! ```
//! use sim_kernel::tick_source::{TickInjector, TickSource};
//!
//! let mut injector = TickInjector::new(TickSource::Periodic { every: 2 }).unwrap();
//! injector.record_instruction();
//! assert!(!injector.is_due());
//! injector.record_instruction();
//! assert!(injector.take_due());
//! ```

use kernel_api::KernelError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// When SysTick fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TickSource {
    /// After every `every` task instructions
    Periodic { every: u64 },
    /// After each task instruction with probability `1 / one_in`
    Seeded { seed: u64, one_in: u32 },
    /// Only when the caller pends a tick or the CPU waits for interrupt
    Manual,
}

impl Default for TickSource {
    fn default() -> Self {
        TickSource::Periodic { every: 8 }
    }
}

impl TickSource {
    pub fn validate(&self) -> Result<(), KernelError> {
        match self {
            TickSource::Periodic { every: 0 } => Err(KernelError::InvalidScenario(
                "periodic tick source needs every >= 1".to_string(),
            )),
            TickSource::Seeded { one_in: 0, .. } => Err(KernelError::InvalidScenario(
                "seeded tick source needs one_in >= 1".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Tracks progress towards the next tick
#[derive(Debug, Clone)]
pub struct TickInjector {
    source: TickSource,
    rng: Option<StdRng>,
    since_last: u64,
    due: bool,
}

impl TickInjector {
    pub fn new(source: TickSource) -> Result<Self, KernelError> {
        source.validate()?;
        Ok(Self {
            source,
            rng: Self::seeded_rng(source),
            since_last: 0,
            due: false,
        })
    }

    /// Counts one executed task instruction
    pub fn record_instruction(&mut self) {
        self.since_last += 1;
        match self.source {
            TickSource::Periodic { every } => {
                if self.since_last >= every {
                    self.due = true;
                }
            }
            TickSource::Seeded { one_in, .. } => {
                if let Some(rng) = self.rng.as_mut() {
                    if rng.gen_ratio(1, one_in) {
                        self.due = true;
                    }
                }
            }
            TickSource::Manual => {}
        }
    }

    /// Makes the next tick due right away
    pub fn pend(&mut self) {
        self.due = true;
    }

    pub fn is_due(&self) -> bool {
        self.due
    }

    /// Consumes a due tick; returns false if none was due
    pub fn take_due(&mut self) -> bool {
        if self.due {
            self.due = false;
            self.since_last = 0;
            true
        } else {
            false
        }
    }

    fn seeded_rng(source: TickSource) -> Option<StdRng> {
        match source {
            TickSource::Seeded { seed, .. } => Some(StdRng::seed_from_u64(seed)),
            _ => None,
        }
    }
}
