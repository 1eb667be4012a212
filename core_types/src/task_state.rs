//! Task states and the legal transitions between them

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scheduling state of a simulated task
///
/// At most one task is `Running` at any time. The idle task is never
/// `Blocked` or `Suspended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Eligible to run, waiting in the ready list
    Ready,
    /// Currently owns the CPU
    Running,
    /// Waiting for a tick deadline or a synchronisation object
    Blocked,
    /// Removed from scheduling until explicitly resumed
    Suspended,
}

impl TaskState {
    /// Returns true if the scheduler may select a task in this state
    pub fn is_schedulable(&self) -> bool {
        matches!(self, TaskState::Ready | TaskState::Running)
    }

    /// Returns true if `next` is a legal successor of this state
    ///
    /// ```text
    ///            ┌──────── yield / preempt ───────┐
    ///            ▼                                 │
    ///  SUSPENDED ─resume─► READY ──schedule──► RUNNING
    ///      ▲                ▲ │                 │ │
    ///      │                │ └──── block ──┐   │ │
    ///      │           wake │               ▼   │ │
    ///      │                └────────── BLOCKED ◄┘ │
    ///      └───────────── suspend ─────────────────┘
    /// ```
    ///
    /// READY and BLOCKED tasks may also be suspended by another task.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Ready, Running)
                | (Ready, Blocked)
                | (Ready, Suspended)
                | (Running, Ready)
                | (Running, Blocked)
                | (Running, Suspended)
                | (Blocked, Ready)
                | (Blocked, Suspended)
                | (Suspended, Ready)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Ready => "READY",
            TaskState::Running => "RUNNING",
            TaskState::Blocked => "BLOCKED",
            TaskState::Suspended => "SUSPENDED",
        };
        f.write_str(name)
    }
}

/// What a blocked task is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// Sleeping until its wake tick (vTaskDelay)
    Delay,
    /// Waiting for the mutex holder to release
    Mutex,
    /// Waiting for free space in the queue
    QueueSend,
    /// Waiting for an item in the queue
    QueueReceive,
    /// Waiting for a semaphore token
    Semaphore,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlockReason::Delay => "delay",
            BlockReason::Mutex => "mutex",
            BlockReason::QueueSend => "queue send",
            BlockReason::QueueReceive => "queue receive",
            BlockReason::Semaphore => "semaphore",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [TaskState; 4] = [
        TaskState::Ready,
        TaskState::Running,
        TaskState::Blocked,
        TaskState::Suspended,
    ];

    #[test]
    fn test_no_self_transitions() {
        for state in ALL {
            assert!(!state.can_transition_to(state), "{state} -> {state}");
        }
    }

    #[test]
    fn test_only_ready_tasks_start_running() {
        for state in ALL {
            let expected = state == TaskState::Ready;
            assert_eq!(state.can_transition_to(TaskState::Running), expected);
        }
    }

    #[test]
    fn test_suspended_only_resumes_to_ready() {
        assert!(TaskState::Suspended.can_transition_to(TaskState::Ready));
        assert!(!TaskState::Suspended.can_transition_to(TaskState::Blocked));
        assert!(!TaskState::Suspended.can_transition_to(TaskState::Running));
    }

    #[test]
    fn test_blocked_wakes_to_ready() {
        assert!(TaskState::Blocked.can_transition_to(TaskState::Ready));
        assert!(!TaskState::Blocked.can_transition_to(TaskState::Running));
    }

    #[test]
    fn test_schedulable_states() {
        assert!(TaskState::Ready.is_schedulable());
        assert!(TaskState::Running.is_schedulable());
        assert!(!TaskState::Blocked.is_schedulable());
        assert!(!TaskState::Suspended.is_schedulable());
    }

    #[test]
    fn test_serialized_names_match_display() {
        for state in ALL {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{state}\""));
        }
    }
}
