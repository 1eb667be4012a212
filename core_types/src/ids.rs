//! Identifiers and priorities for simulated tasks

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a task
///
/// Task ids are stable small integers assigned by the scenario. They never
/// change during a simulation and survive `reset()`, which lets the view
/// layer key its rendering on them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TaskId(u32);

impl TaskId {
    /// Creates a task ID from its raw value
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw value
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Scheduling priority
///
/// Larger values are more urgent. Priority 0 is reserved for the idle task.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Priority(u8);

impl Priority {
    /// The idle task's priority
    pub const IDLE: Priority = Priority(0);

    /// Creates a priority from its raw value
    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    /// Returns the raw value
    pub const fn value(&self) -> u8 {
        self.0
    }

    /// Returns true for the reserved idle priority
    pub const fn is_idle(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
