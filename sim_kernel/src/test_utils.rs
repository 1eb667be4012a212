//! Test utilities for lesson and property tests
//!
//! Helpers that drive a [`SimulatedKernel`] forward and check the
//! invariants every step must preserve.

use crate::SimulatedKernel;
use core_types::TaskState;
use kernel_api::{Granularity, KernelError, SimulationEngine};

/// Steps until `predicate` holds, at most `max_steps` times
///
/// Returns the number of steps taken. The predicate is checked after each
/// step, never before the first.
///
/// # Example
///
/// ```
/// use kernel_api::Granularity;
/// use sim_kernel::test_utils::run_until;
/// use sim_kernel::{Scenario, SimulatedKernel};
///
/// let mut kernel = SimulatedKernel::new(Scenario::scheduler_demo()).unwrap();
/// let steps = run_until(&mut kernel, Granularity::Instruction, 100, |k| k.led_on()).unwrap();
/// assert_eq!(steps, 1);
/// ```
pub fn run_until<F>(
    kernel: &mut SimulatedKernel,
    granularity: Granularity,
    max_steps: usize,
    predicate: F,
) -> Result<usize, KernelError>
where
    F: Fn(&SimulatedKernel) -> bool,
{
    for taken in 1..=max_steps {
        kernel.step(granularity)?;
        if predicate(kernel) {
            return Ok(taken);
        }
    }
    Err(KernelError::StepLimitExceeded { limit: max_steps })
}

/// Advances exactly `ticks` kernel ticks
pub fn run_ticks(kernel: &mut SimulatedKernel, ticks: u64) -> Result<(), KernelError> {
    for _ in 0..ticks {
        kernel.step(Granularity::Tick)?;
    }
    Ok(())
}

/// Panics unless at most one task is RUNNING, and exactly one in thread mode
/// with no reschedule outstanding
pub fn assert_single_runner(kernel: &SimulatedKernel) {
    let running = kernel.tasks().running_count();
    assert!(running <= 1, "{running} tasks RUNNING");
    if kernel.context().is_thread() && !kernel.yield_pending() {
        assert_eq!(running, 1, "no task RUNNING in thread mode");
    }
}

/// Panics if any blocked task lacks a reason or a delayed one lacks a
/// wake tick
pub fn assert_wait_bookkeeping(kernel: &SimulatedKernel) {
    for task in kernel.tasks().iter() {
        match task.state() {
            TaskState::Blocked => assert!(
                task.blocked_on().is_some(),
                "{} BLOCKED without a reason",
                task.name()
            ),
            _ => assert!(
                task.wake_tick().is_none(),
                "{} has a wake tick while {}",
                task.name(),
                task.state()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Scenario;
    use kernel_api::Tick;

    #[test]
    fn test_run_until_counts_steps() {
        let mut kernel = SimulatedKernel::new(Scenario::scheduler_demo()).unwrap();
        let steps = run_until(&mut kernel, Granularity::TaskInstruction, 10, |k| {
            k.task_instructions() == 3
        })
        .unwrap();
        assert_eq!(steps, 3);
    }

    #[test]
    fn test_run_until_gives_up() {
        let mut kernel = SimulatedKernel::new(Scenario::scheduler_demo()).unwrap();
        let err = run_until(&mut kernel, Granularity::Instruction, 5, |_| false).unwrap_err();
        assert_eq!(err, KernelError::StepLimitExceeded { limit: 5 });
    }

    #[test]
    fn test_run_ticks() {
        let mut kernel = SimulatedKernel::new(Scenario::scheduler_demo()).unwrap();
        run_ticks(&mut kernel, 6).unwrap();
        assert_eq!(kernel.now(), Tick::new(6));
        assert_single_runner(&kernel);
        assert_wait_bookkeeping(&kernel);
    }
}
