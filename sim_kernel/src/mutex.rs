//! Single-resource mutex with optional priority inheritance
//!
//! ## Protocol
//!
//! - A free mutex is taken immediately.
//! - A contended take blocks the caller and appends it to the waiters.
//!   Under priority inheritance the holder is then raised to the waiter's
//!   priority if that is higher; a boost only ever raises.
//! - Release restores the holder's base priority and hands the mutex
//!   directly to the highest-priority waiter (oldest first among equals),
//!   so no third task can grab it in between.

use crate::delay;
use crate::tcb::TaskTable;
use core_types::{BlockReason, Priority, TaskId};
use kernel_api::KernelError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Whether contention boosts the holder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutexProtocol {
    /// No boosting, shows unbounded priority inversion
    Plain,
    /// Holder inherits the priority of the waiters
    #[default]
    PriorityInheritance,
}

/// Result of a take attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The caller now holds the mutex
    Acquired,
    /// The caller is BLOCKED; `boosted` names a holder that inherited
    Blocked { boosted: Option<(TaskId, Priority)> },
}

/// Result of a release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Nobody was waiting
    Released,
    /// Ownership moved to a woken waiter
    HandedOff { to: TaskId },
}

#[derive(Debug, Clone, Default)]
pub struct Mutex {
    protocol: MutexProtocol,
    holder: Option<TaskId>,
    waiters: VecDeque<TaskId>,
}

impl Mutex {
    pub fn new(protocol: MutexProtocol) -> Self {
        Self {
            protocol,
            holder: None,
            waiters: VecDeque::new(),
        }
    }

    pub fn protocol(&self) -> MutexProtocol {
        self.protocol
    }

    pub fn holder(&self) -> Option<TaskId> {
        self.holder
    }

    /// Blocked takers in attempt order
    pub fn waiters(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.waiters.iter().copied()
    }

    pub fn try_acquire(
        &mut self,
        tasks: &mut TaskTable,
        task: TaskId,
    ) -> Result<AcquireOutcome, KernelError> {
        let holder = match self.holder {
            None => {
                tasks.get(task)?;
                self.holder = Some(task);
                return Ok(AcquireOutcome::Acquired);
            }
            Some(holder) if holder == task => return Err(KernelError::RecursiveMutexTake(task)),
            Some(holder) => holder,
        };

        delay::block_on_event(tasks, task, BlockReason::Mutex)?;
        self.waiters.push_back(task);

        let mut boosted = None;
        if self.protocol == MutexProtocol::PriorityInheritance {
            let waiter_priority = tasks.get(task)?.effective_priority();
            let owner = tasks.get_mut(holder)?;
            if waiter_priority > owner.effective_priority {
                owner.effective_priority = waiter_priority;
                boosted = Some((holder, waiter_priority));
            }
        }
        Ok(AcquireOutcome::Blocked { boosted })
    }

    pub fn release(
        &mut self,
        tasks: &mut TaskTable,
        task: TaskId,
    ) -> Result<ReleaseOutcome, KernelError> {
        if self.holder != Some(task) {
            return Err(KernelError::MutexNotHeld {
                task,
                holder: self.holder,
            });
        }
        self.holder = None;
        let owner = tasks.get_mut(task)?;
        owner.effective_priority = owner.base_priority;

        let Some(next) = self.highest_waiter(tasks)? else {
            return Ok(ReleaseOutcome::Released);
        };
        self.waiters.retain(|&id| id != next);
        tasks.make_ready(next)?;
        self.holder = Some(next);
        Ok(ReleaseOutcome::HandedOff { to: next })
    }

    /// Drops a waiter without giving it the mutex; returns true if it waited
    pub fn remove_waiter(&mut self, task: TaskId) -> bool {
        let before = self.waiters.len();
        self.waiters.retain(|&id| id != task);
        self.waiters.len() != before
    }

    fn highest_waiter(&self, tasks: &TaskTable) -> Result<Option<TaskId>, KernelError> {
        let mut best: Option<(TaskId, Priority)> = None;
        for &id in &self.waiters {
            let priority = tasks.get(id)?.effective_priority();
            // strict comparison keeps the oldest waiter on ties
            if best.map_or(true, |(_, p)| priority > p) {
                best = Some((id, priority));
            }
        }
        Ok(best.map(|(id, _)| id))
    }
}
