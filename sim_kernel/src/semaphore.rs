//! Binary and counting semaphores
//!
//! Semaphores start full. A taker that finds no token waits; a give wakes
//! the oldest waiter, which then retries its take.

use core_types::TaskId;
use kernel_api::KernelError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemaphoreKind {
    /// One token
    Binary,
    /// Up to `max` tokens
    Counting { max: u32 },
}

impl SemaphoreKind {
    pub fn max_tokens(&self) -> u32 {
        match self {
            SemaphoreKind::Binary => 1,
            SemaphoreKind::Counting { max } => *max,
        }
    }
}

impl Default for SemaphoreKind {
    fn default() -> Self {
        SemaphoreKind::Counting { max: 3 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeStatus {
    Taken,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveStatus {
    /// Token returned; `woke` should retry its take
    Given { woke: Option<TaskId> },
    /// Already at the maximum, nothing changed
    Full,
}

#[derive(Debug, Clone)]
pub struct Semaphore {
    kind: SemaphoreKind,
    tokens: u32,
    waiters: VecDeque<TaskId>,
}

impl Semaphore {
    pub fn new(kind: SemaphoreKind) -> Result<Self, KernelError> {
        if kind.max_tokens() == 0 {
            return Err(KernelError::InvalidScenario(
                "counting semaphore needs a maximum of at least 1".to_string(),
            ));
        }
        Ok(Self {
            kind,
            tokens: kind.max_tokens(),
            waiters: VecDeque::new(),
        })
    }

    pub fn kind(&self) -> SemaphoreKind {
        self.kind
    }

    pub fn tokens(&self) -> u32 {
        self.tokens
    }

    pub fn max_tokens(&self) -> u32 {
        self.kind.max_tokens()
    }

    pub fn waiters(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.waiters.iter().copied()
    }

    pub fn take(&mut self, task: TaskId) -> TakeStatus {
        if self.tokens > 0 {
            self.tokens -= 1;
            self.waiters.retain(|&id| id != task);
            TakeStatus::Taken
        } else {
            if !self.waiters.contains(&task) {
                self.waiters.push_back(task);
            }
            TakeStatus::Blocked
        }
    }

    pub fn give(&mut self) -> GiveStatus {
        if self.tokens >= self.max_tokens() {
            return GiveStatus::Full;
        }
        self.tokens += 1;
        GiveStatus::Given {
            woke: self.waiters.pop_front(),
        }
    }

    pub fn remove_waiter(&mut self, task: TaskId) -> bool {
        let before = self.waiters.len();
        self.waiters.retain(|&id| id != task);
        self.waiters.len() != before
    }
}
