//! Blocking and unblocking of tasks
//!
//! Delays put a task to sleep until a wake tick. Event waits (mutex, queue,
//! semaphore) block with no deadline and are woken by the object itself.

use crate::tcb::TaskTable;
use core_types::{BlockReason, TaskId, TaskState};
use kernel_api::{KernelError, Tick};

/// Blocks `task` for `delay` ticks and returns its wake tick
///
/// A zero delay is rejected; the idle task can never block.
pub fn block_current(
    tasks: &mut TaskTable,
    task: TaskId,
    delay: u64,
    now: Tick,
) -> Result<Tick, KernelError> {
    if delay == 0 {
        return Err(KernelError::InvalidDelay { task, delay });
    }
    let wake = now.after(delay);
    let tcb = tasks.get_mut(task)?;
    tcb.transition(TaskState::Blocked)?;
    tcb.wake_tick = Some(wake);
    tcb.blocked_on = Some(BlockReason::Delay);
    Ok(wake)
}

/// Blocks `task` on a synchronisation object, without a deadline
pub fn block_on_event(
    tasks: &mut TaskTable,
    task: TaskId,
    reason: BlockReason,
) -> Result<(), KernelError> {
    let tcb = tasks.get_mut(task)?;
    tcb.transition(TaskState::Blocked)?;
    tcb.wake_tick = None;
    tcb.blocked_on = Some(reason);
    Ok(())
}

/// Wakes every task whose delay has expired
///
/// Tasks wake in ascending id order and are appended to the back of their
/// ready level in that order. Returns the woken ids.
pub fn unblock_due(tasks: &mut TaskTable, now: Tick) -> Result<Vec<TaskId>, KernelError> {
    let due: Vec<TaskId> = tasks
        .iter()
        .filter(|t| t.state() == TaskState::Blocked)
        .filter(|t| t.wake_tick().is_some_and(|wake| now.has_reached(wake)))
        .map(|t| t.id())
        .collect();

    for id in &due {
        tasks.make_ready(*id)?;
    }
    Ok(due)
}
