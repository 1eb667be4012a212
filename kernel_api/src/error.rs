//! Kernel error types

use core_types::{Priority, TaskId, TaskState};
use thiserror::Error;

/// Contract violations reported by a simulation engine
///
/// These indicate a bug in whoever drives the engine. Capacity outcomes
/// (queue full, semaphore empty) and benign saturations are not errors and
/// never appear here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// No task with this id exists in the scenario
    #[error("Unknown task: {0}")]
    UnknownTask(TaskId),

    /// A delay must be at least one tick
    #[error("{task} requested an invalid delay of {delay} ticks")]
    InvalidDelay { task: TaskId, delay: u64 },

    /// The idle task must always stay schedulable
    #[error("Idle task {0} cannot block, suspend or be re-prioritised")]
    IdleTaskMisuse(TaskId),

    /// User priorities live in `1..max`
    #[error("Invalid priority {priority} for {task} (allowed 1..{max})")]
    InvalidPriority {
        task: TaskId,
        priority: Priority,
        max: u8,
    },

    /// State change not allowed by the task state machine
    #[error("{task} cannot move from {from} to {to}")]
    InvalidTransition {
        task: TaskId,
        from: TaskState,
        to: TaskState,
    },

    /// The holder tried to take the mutex again
    #[error("{0} already holds the mutex")]
    RecursiveMutexTake(TaskId),

    /// Release by a task that does not own the mutex
    #[error("{task} released a mutex it does not hold (holder: {holder:?})")]
    MutexNotHeld {
        task: TaskId,
        holder: Option<TaskId>,
    },

    /// A blocked or suspended task was asked to act
    #[error("{task} is {state} and cannot act")]
    TaskNotRunnable { task: TaskId, state: TaskState },

    /// Blocking with interrupts masked would deadlock the kernel
    #[error("{0} tried to block inside a critical section")]
    BlockedInCriticalSection(TaskId),

    /// The scenario has no such resource
    #[error("Scenario has no {0}")]
    ResourceUnavailable(&'static str),

    /// Scenario or configuration failed validation
    #[error("Invalid scenario: {0}")]
    InvalidScenario(String),

    /// A multi-instruction step did not finish within its budget
    #[error("Step did not complete within {limit} micro-steps")]
    StepLimitExceeded { limit: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_task() {
        let err = KernelError::InvalidDelay {
            task: TaskId::new(1),
            delay: 0,
        };
        assert_eq!(err.to_string(), "Task(1) requested an invalid delay of 0 ticks");

        let err = KernelError::MutexNotHeld {
            task: TaskId::new(2),
            holder: Some(TaskId::new(1)),
        };
        assert!(err.to_string().contains("Task(2)"));
    }

    #[test]
    fn test_transition_error_uses_state_names() {
        let err = KernelError::InvalidTransition {
            task: TaskId::new(3),
            from: TaskState::Suspended,
            to: TaskState::Running,
        };
        assert_eq!(err.to_string(), "Task(3) cannot move from SUSPENDED to RUNNING");
    }
}
