//! Lesson Test Utilities
//!
//! Shared helpers for the end-to-end lesson tests in `tests/`.
//!
//! ## Test Philosophy
//!
//! - **Whole lessons**: drive the public controller the way a front end would
//! - **Deterministic**: every run of a scenario produces the same trace
//! - **Invariants after every step**: single runner, wait bookkeeping

use core_types::{TaskId, TaskState};
use kernel_api::{Granularity, KernelError, SimulationEngine};
use sim_kernel::test_utils::{assert_single_runner, assert_wait_bookkeeping};
use sim_kernel::{Scenario, SimulatedKernel};

/// Boots a kernel from a preset, panicking on an invalid scenario
pub fn boot(scenario: Scenario) -> SimulatedKernel {
    SimulatedKernel::new(scenario).expect("preset scenarios are valid")
}

/// Looks a task up by name
pub fn task_id(kernel: &SimulatedKernel, name: &str) -> TaskId {
    kernel
        .tasks()
        .iter()
        .find(|t| t.name() == name)
        .map(|t| t.id())
        .unwrap_or_else(|| panic!("no task named {name}"))
}

pub fn state_of(kernel: &SimulatedKernel, name: &str) -> TaskState {
    let id = task_id(kernel, name);
    kernel.tasks().get(id).map(|t| t.state()).unwrap_or_else(|e| panic!("{e}"))
}

pub fn effective_priority_of(kernel: &SimulatedKernel, name: &str) -> u8 {
    let id = task_id(kernel, name);
    kernel
        .tasks()
        .get(id)
        .map(|t| t.effective_priority().value())
        .unwrap_or_else(|e| panic!("{e}"))
}

pub fn running_name(kernel: &SimulatedKernel) -> Option<String> {
    let id = kernel.current_task()?;
    kernel.tasks().get(id).ok().map(|t| t.name().to_string())
}

/// Steps one instruction at a time until `predicate` holds, checking the
/// kernel invariants after every step
pub fn step_checked_until<F>(
    kernel: &mut SimulatedKernel,
    max_steps: usize,
    predicate: F,
) -> Result<usize, KernelError>
where
    F: Fn(&SimulatedKernel) -> bool,
{
    for taken in 1..=max_steps {
        kernel.step(Granularity::Instruction)?;
        assert_single_runner(kernel);
        assert_wait_bookkeeping(kernel);
        if predicate(kernel) {
            return Ok(taken);
        }
    }
    Err(KernelError::StepLimitExceeded { limit: max_steps })
}
