//! Task control blocks and the fixed task registry

use crate::program::Program;
use core_types::{BlockReason, Priority, TaskId, TaskState};
use kernel_api::{KernelError, Tick};
use serde::{Deserialize, Serialize};

/// How a scenario declares a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: TaskId,
    pub name: String,
    pub priority: Priority,
    pub program: Program,
}

impl TaskSpec {
    /// Creates a task declaration
    pub fn new(id: u32, name: &str, priority: u8, program: impl Into<Program>) -> Self {
        Self {
            id: TaskId::new(id),
            name: name.to_string(),
            priority: Priority::new(priority),
            program: program.into(),
        }
    }
}

/// Kernel bookkeeping for one task
#[derive(Debug, Clone)]
pub struct TaskControlBlock {
    pub(crate) id: TaskId,
    pub(crate) name: String,
    pub(crate) base_priority: Priority,
    pub(crate) effective_priority: Priority,
    pub(crate) state: TaskState,
    pub(crate) wake_tick: Option<Tick>,
    pub(crate) blocked_on: Option<BlockReason>,
    pub(crate) insert_order: u64,
    pub(crate) pc: usize,
    pub(crate) program: Program,
}

impl TaskControlBlock {
    fn from_spec(spec: &TaskSpec, insert_order: u64) -> Self {
        Self {
            id: spec.id,
            name: spec.name.clone(),
            base_priority: spec.priority,
            effective_priority: spec.priority,
            state: TaskState::Ready,
            wake_tick: None,
            blocked_on: None,
            insert_order,
            pc: 0,
            program: spec.program.clone(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Priority assigned by the scenario or by `set_priority`
    pub fn base_priority(&self) -> Priority {
        self.base_priority
    }

    /// Priority the scheduler uses, possibly raised by inheritance
    pub fn effective_priority(&self) -> Priority {
        self.effective_priority
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Deadline of a delay; `None` when not sleeping on the tick
    pub fn wake_tick(&self) -> Option<Tick> {
        self.wake_tick
    }

    pub fn blocked_on(&self) -> Option<BlockReason> {
        self.blocked_on
    }

    /// Arrival stamp in the ready list; smaller runs first among peers
    pub fn insert_order(&self) -> u64 {
        self.insert_order
    }

    /// Index of the next instruction
    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Returns true for the priority-0 idle task
    pub fn is_idle(&self) -> bool {
        self.base_priority.is_idle()
    }

    /// Moves to `to`, rejecting transitions the state machine forbids
    pub(crate) fn transition(&mut self, to: TaskState) -> Result<(), KernelError> {
        if self.is_idle() && matches!(to, TaskState::Blocked | TaskState::Suspended) {
            return Err(KernelError::IdleTaskMisuse(self.id));
        }
        if !self.state.can_transition_to(to) {
            return Err(KernelError::InvalidTransition {
                task: self.id,
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }
}

/// The fixed set of tasks of one simulation
///
/// Tasks are created once from the scenario and never added or removed.
/// Iteration is always in ascending id order.
#[derive(Debug, Clone)]
pub struct TaskTable {
    tasks: Vec<TaskControlBlock>,
    idle: TaskId,
    next_insert_order: u64,
}

impl TaskTable {
    /// Builds the registry, all tasks READY and stamped in declaration order
    pub fn new(specs: &[TaskSpec], max_priorities: u8) -> Result<Self, KernelError> {
        let mut idle = None;
        for (index, spec) in specs.iter().enumerate() {
            if specs[..index].iter().any(|other| other.id == spec.id) {
                return Err(KernelError::InvalidScenario(format!(
                    "duplicate task id {}",
                    spec.id
                )));
            }
            if spec.priority.is_idle() {
                if idle.is_some() {
                    return Err(KernelError::InvalidScenario(
                        "more than one priority-0 task".to_string(),
                    ));
                }
                idle = Some(spec.id);
            } else if spec.priority.value() >= max_priorities {
                return Err(KernelError::InvalidScenario(format!(
                    "{} has priority {}, allowed 1..{}",
                    spec.name, spec.priority, max_priorities
                )));
            }
            spec.program
                .validate()
                .map_err(|e| KernelError::InvalidScenario(format!("{}: {e}", spec.name)))?;
        }
        let idle = idle.ok_or_else(|| {
            KernelError::InvalidScenario("scenario needs exactly one priority-0 idle task".into())
        })?;

        let mut tasks: Vec<TaskControlBlock> = specs
            .iter()
            .enumerate()
            .map(|(order, spec)| TaskControlBlock::from_spec(spec, order as u64))
            .collect();
        tasks.sort_by_key(|t| t.id);

        Ok(Self {
            tasks,
            idle,
            next_insert_order: specs.len() as u64,
        })
    }

    pub fn get(&self, id: TaskId) -> Result<&TaskControlBlock, KernelError> {
        self.tasks
            .binary_search_by_key(&id, |t| t.id)
            .map(|index| &self.tasks[index])
            .map_err(|_| KernelError::UnknownTask(id))
    }

    pub(crate) fn get_mut(&mut self, id: TaskId) -> Result<&mut TaskControlBlock, KernelError> {
        match self.tasks.binary_search_by_key(&id, |t| t.id) {
            Ok(index) => Ok(&mut self.tasks[index]),
            Err(_) => Err(KernelError::UnknownTask(id)),
        }
    }

    /// Tasks in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = &TaskControlBlock> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// The idle task
    pub fn idle(&self) -> TaskId {
        self.idle
    }

    /// The task currently in RUNNING, if any
    pub fn running(&self) -> Option<TaskId> {
        self.tasks
            .iter()
            .find(|t| t.state == TaskState::Running)
            .map(|t| t.id)
    }

    /// Number of tasks in RUNNING
    pub fn running_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.state == TaskState::Running)
            .count()
    }

    /// Moves a task to READY at the back of its priority level
    pub(crate) fn make_ready(&mut self, id: TaskId) -> Result<(), KernelError> {
        let stamp = self.next_stamp();
        let task = self.get_mut(id)?;
        task.transition(TaskState::Ready)?;
        task.insert_order = stamp;
        task.wake_tick = None;
        task.blocked_on = None;
        Ok(())
    }

    /// Gives a task a fresh arrival stamp without changing its state
    pub(crate) fn restamp(&mut self, id: TaskId) -> Result<(), KernelError> {
        let stamp = self.next_stamp();
        self.get_mut(id)?.insert_order = stamp;
        Ok(())
    }

    /// Reassigns a base priority
    ///
    /// A task currently boosted above its new base keeps the boost; the
    /// effective priority never drops below the base.
    pub(crate) fn set_base_priority(
        &mut self,
        id: TaskId,
        priority: Priority,
    ) -> Result<(), KernelError> {
        let task = self.get_mut(id)?;
        let boosted = task.effective_priority > task.base_priority;
        task.base_priority = priority;
        task.effective_priority = if boosted {
            task.effective_priority.max(priority)
        } else {
            priority
        };
        Ok(())
    }

    fn next_stamp(&mut self) -> u64 {
        let stamp = self.next_insert_order;
        self.next_insert_order += 1;
        stamp
    }
}
