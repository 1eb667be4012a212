//! The engine trait driven by the view layer

use crate::KernelError;
use serde::{Deserialize, Serialize};

/// How far one call to [`SimulationEngine::step`] advances
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    /// One kernel micro-instruction (handler, ISR or task)
    #[default]
    Instruction,
    /// Until one instruction of a task program has executed
    TaskInstruction,
    /// Until the tick has advanced and the kernel is back in thread mode
    Tick,
}

/// A step-driven simulator
///
/// The driver owns the loop. It calls [`step`](Self::step) once per
/// "next" click or auto-play interval and renders the returned snapshot.
/// Each call runs to completion before returning; nothing happens between
/// calls.
///
/// # Example
///
/// ```
/// use kernel_api::{Granularity, KernelError, SimulationEngine};
///
/// fn play<E: SimulationEngine>(engine: &mut E, steps: usize) -> Result<(), KernelError> {
///     engine.reset();
///     for _ in 0..steps {
///         engine.step(Granularity::Instruction)?;
///     }
///     Ok(())
/// }
/// ```
pub trait SimulationEngine {
    /// Read-only view of the engine state
    type Snapshot;

    /// Reinitializes all state to the fixed initial scenario
    fn reset(&mut self);

    /// Advances by one unit of `granularity` and returns the new state
    fn step(&mut self, granularity: Granularity) -> Result<Self::Snapshot, KernelError>;

    /// Returns the current state without advancing
    fn snapshot(&self) -> Self::Snapshot;
}
