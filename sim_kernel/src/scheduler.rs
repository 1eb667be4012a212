//! Ready-List Scheduler
//!
//! Fixed-priority preemptive scheduling with round robin among equals.
//!
//! ## Philosophy
//!
//! - **Determinism first**: Same task table => same selection.
//! - **No hidden yields**: The scheduler only runs when the kernel asks.
//! - **Pure selection**: Choosing a task never mutates anything; applying
//!   the choice is a separate step.
//!
//! ## Design
//!
//! - **Priority**: The highest `effective_priority` among READY and
//!   RUNNING tasks wins.
//! - **Round robin**: Ties go to the smallest insertion stamp. A task that
//!   yields or is time-sliced gets a fresh stamp and moves to the back.
//! - **Idle fallback**: With nothing else schedulable the idle task runs.

use crate::tcb::TaskTable;
use core_types::{TaskId, TaskState};
use kernel_api::{KernelError, Tick};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Audit entries kept before the oldest is dropped
const AUDIT_CAPACITY: usize = 1024;

/// Scheduling event for audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleEvent {
    /// First selection after boot or reset
    TaskSelected { task_id: TaskId, tick: Tick },
    /// The running task changed
    ContextSwitch {
        from: TaskId,
        to: TaskId,
        tick: Tick,
    },
    /// The running task gave up the rest of its turn
    Yielded { task_id: TaskId, tick: Tick },
}

/// Picks the task that should run, without changing anything
///
/// Never fails: the idle task is always a valid answer.
pub fn select_candidate(tasks: &TaskTable) -> TaskId {
    tasks
        .iter()
        .filter(|t| t.state().is_schedulable())
        .max_by(|a, b| {
            a.effective_priority()
                .cmp(&b.effective_priority())
                .then_with(|| b.insert_order().cmp(&a.insert_order()))
        })
        .map(|t| t.id())
        .unwrap_or_else(|| tasks.idle())
}

/// Preemptive priority scheduler
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    current: Option<TaskId>,
    context_switches: u64,
    /// Audit log for scheduling events (test verification)
    audit_log: VecDeque<ScheduleEvent>,
}

impl Scheduler {
    /// Creates a scheduler with nothing selected yet
    pub fn new() -> Self {
        Self::default()
    }

    /// The task selected by the last call to `select_next`
    pub fn current(&self) -> Option<TaskId> {
        self.current
    }

    /// Number of times the running task changed
    pub fn context_switches(&self) -> u64 {
        self.context_switches
    }

    /// Re-runs selection and applies it
    ///
    /// If the winner differs from the running task, the old runner goes back
    /// to READY at the back of its level and the winner becomes RUNNING.
    pub fn select_next(&mut self, tasks: &mut TaskTable, now: Tick) -> Result<TaskId, KernelError> {
        let winner = select_candidate(tasks);
        let previous = tasks.running();

        if previous != Some(winner) {
            if let Some(previous) = previous {
                tasks.make_ready(previous)?;
            }
            tasks.get_mut(winner)?.transition(TaskState::Running)?;

            match previous {
                Some(from) => {
                    self.context_switches += 1;
                    self.record(ScheduleEvent::ContextSwitch {
                        from,
                        to: winner,
                        tick: now,
                    });
                }
                None => self.record(ScheduleEvent::TaskSelected {
                    task_id: winner,
                    tick: now,
                }),
            }
        }

        self.current = Some(winner);
        Ok(winner)
    }

    /// Moves the running task behind its equal-priority peers
    ///
    /// The task stays RUNNING until the next `select_next`.
    pub fn yield_current(&mut self, tasks: &mut TaskTable, now: Tick) -> Result<(), KernelError> {
        if let Some(task_id) = tasks.running() {
            tasks.restamp(task_id)?;
            self.record(ScheduleEvent::Yielded { task_id, tick: now });
        }
        Ok(())
    }

    /// Returns the audit log
    pub fn audit_log(&self) -> impl Iterator<Item = &ScheduleEvent> {
        self.audit_log.iter()
    }

    fn record(&mut self, event: ScheduleEvent) {
        if self.audit_log.len() == AUDIT_CAPACITY {
            self.audit_log.pop_front();
        }
        self.audit_log.push_back(event);
    }
}
