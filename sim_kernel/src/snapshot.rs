//! Serializable views of kernel state
//!
//! A snapshot is a plain copy: holding one never borrows the kernel, and two
//! snapshots of the same state compare equal.

use crate::mutex::MutexProtocol;
use crate::semaphore::SemaphoreKind;
use crate::SimulatedKernel;
use core_types::{BlockReason, Priority, TaskId, TaskState};
use kernel_api::Tick;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub name: String,
    pub base_priority: Priority,
    pub effective_priority: Priority,
    pub state: TaskState,
    pub wake_tick: Option<Tick>,
    pub blocked_on: Option<BlockReason>,
    pub pc: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptSnapshot {
    pub critical_nesting: u32,
    pub pending_interrupt: bool,
    pub executing_isr: bool,
    pub serviced: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutexSnapshot {
    pub protocol: MutexProtocol,
    pub holder: Option<TaskId>,
    pub waiters: Vec<TaskId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Slots in storage order
    pub slots: Vec<Option<i32>>,
    pub write_cursor: usize,
    pub read_cursor: usize,
    pub count: usize,
    pub capacity: usize,
    pub send_waiters: Vec<TaskId>,
    pub receive_waiters: Vec<TaskId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemaphoreSnapshot {
    pub kind: SemaphoreKind,
    pub tokens: u32,
    pub max_tokens: u32,
    pub waiters: Vec<TaskId>,
}

/// Everything a visualisation needs after one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSnapshot {
    pub scenario: String,
    pub step: u64,
    pub tick: Tick,
    pub tasks: Vec<TaskSnapshot>,
    pub current_task: Option<TaskId>,
    /// "Thread", or the name of the executing handler
    pub context: String,
    pub next_instruction: String,
    pub interrupts: InterruptSnapshot,
    pub yield_pending: bool,
    pub tick_pending: bool,
    pub mutex: Option<MutexSnapshot>,
    pub queue: Option<QueueSnapshot>,
    pub semaphore: Option<SemaphoreSnapshot>,
    pub led_on: bool,
    pub uart_output: String,
    pub last_log: String,
}

impl KernelSnapshot {
    pub(crate) fn capture(kernel: &SimulatedKernel) -> Self {
        let tasks = kernel
            .tasks()
            .iter()
            .map(|t| TaskSnapshot {
                id: t.id(),
                name: t.name().to_string(),
                base_priority: t.base_priority(),
                effective_priority: t.effective_priority(),
                state: t.state(),
                wake_tick: t.wake_tick(),
                blocked_on: t.blocked_on(),
                pc: t.pc(),
            })
            .collect();

        let interrupts = kernel.interrupts();
        let interrupts = InterruptSnapshot {
            critical_nesting: interrupts.critical_nesting(),
            pending_interrupt: interrupts.is_pending(),
            executing_isr: interrupts.is_executing_isr(),
            serviced: interrupts.serviced_count(),
        };

        let mutex = kernel.mutex().map(|m| MutexSnapshot {
            protocol: m.protocol(),
            holder: m.holder(),
            waiters: m.waiters().collect(),
        });

        let queue = kernel.queue().map(|q| QueueSnapshot {
            slots: q.slots().to_vec(),
            write_cursor: q.write_cursor(),
            read_cursor: q.read_cursor(),
            count: q.len(),
            capacity: q.capacity(),
            send_waiters: q.send_waiters().collect(),
            receive_waiters: q.receive_waiters().collect(),
        });

        let semaphore = kernel.semaphore().map(|s| SemaphoreSnapshot {
            kind: s.kind(),
            tokens: s.tokens(),
            max_tokens: s.max_tokens(),
            waiters: s.waiters().collect(),
        });

        Self {
            scenario: kernel.scenario().name.clone(),
            step: kernel.steps(),
            tick: kernel.now(),
            tasks,
            current_task: kernel.current_task(),
            context: kernel.context().label().to_string(),
            next_instruction: kernel.next_instruction(),
            interrupts,
            yield_pending: kernel.yield_pending(),
            tick_pending: kernel.tick_pending(),
            mutex,
            queue,
            semaphore,
            led_on: kernel.led_on(),
            uart_output: kernel.uart_output().to_string(),
            last_log: kernel.trace().last_message().to_string(),
        }
    }

    /// Looks a task up by id
    pub fn task(&self, id: TaskId) -> Option<&TaskSnapshot> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Pretty-printed JSON for the front end
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
