//! Single-task lifecycle walk-through
//!
//! One task, `MainTask`, moved between the four states by explicit actions.
//! Each action highlights the line of the task function that causes it.

use core_types::{TaskId, TaskState};
use kernel_api::KernelError;
use serde::{Deserialize, Serialize};

/// Id reported in transition errors
pub const LIFECYCLE_TASK: TaskId = TaskId::new(1);

/// The task function shown next to the state diagram (1-based lines)
pub const CODE_LINES: [&str; 21] = [
    "void vTaskFunction( void *pvParameters )",
    "{",
    "    for( ;; )",
    "    {",
    "        // 1. Task Running",
    "        PerformApplicationTask();",
    "",
    "        // 2. Yield",
    "        taskYIELD();",
    "",
    "        // 3. Block (event or delay)",
    "        vTaskDelay( pdMS_TO_TICKS(100) );",
    "",
    "        // 4. Suspend",
    "        vTaskSuspend( NULL );",
    "    }",
    "}",
    "",
    "// ISR Context",
    "xTaskResumeFromISR( xHandle );",
    "xTimerCallback(); // Timeout",
];

const RUNNING_LINE: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    /// Scheduler picks the task
    Schedule,
    /// `taskYIELD()`
    Yield,
    /// `vTaskDelay()`
    Block,
    /// `vTaskSuspend(NULL)`
    Suspend,
    /// The awaited event arrives
    EventReceived,
    /// The delay expires
    Timeout,
    /// `xTaskResumeFromISR()`
    Resume,
}

impl LifecycleAction {
    pub const ALL: [LifecycleAction; 7] = [
        LifecycleAction::Schedule,
        LifecycleAction::Yield,
        LifecycleAction::Block,
        LifecycleAction::Suspend,
        LifecycleAction::EventReceived,
        LifecycleAction::Timeout,
        LifecycleAction::Resume,
    ];

    /// (from, to, highlighted line, log text)
    fn rule(self) -> (TaskState, TaskState, usize, &'static str) {
        use TaskState::*;
        match self {
            LifecycleAction::Schedule => {
                (Ready, Running, 6, "Scheduler picked highest priority task.")
            }
            LifecycleAction::Yield => (Running, Ready, 9, "Task yielded voluntarily."),
            LifecycleAction::Block => (Running, Blocked, 12, "Task entered Blocked state."),
            LifecycleAction::Suspend => {
                (Running, Suspended, 15, "Task suspended explicitly.")
            }
            LifecycleAction::EventReceived => {
                (Blocked, Ready, 21, "Event received! Moved to Ready list.")
            }
            LifecycleAction::Timeout => (Blocked, Ready, 21, "Timeout expired. Moved to Ready list."),
            LifecycleAction::Resume => (Suspended, Ready, 20, "Task Resumed by system."),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLifecycle {
    state: TaskState,
    active_line: Option<usize>,
    log: Vec<String>,
}

impl Default for TaskLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskLifecycle {
    /// The task starts READY
    pub fn new() -> Self {
        Self {
            state: TaskState::Ready,
            active_line: None,
            log: vec!["System Boot: Task 'MainTask' created in READY list.".to_string()],
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn active_line(&self) -> Option<usize> {
        self.active_line
    }

    pub fn log(&self) -> &[String] {
        &self.log
    }

    /// Actions legal in the current state
    pub fn available_actions(&self) -> Vec<LifecycleAction> {
        LifecycleAction::ALL
            .into_iter()
            .filter(|action| action.rule().0 == self.state)
            .collect()
    }

    /// Applies `action`, returning the new state
    pub fn apply(&mut self, action: LifecycleAction) -> Result<TaskState, KernelError> {
        let (from, to, line, message) = action.rule();
        if from != self.state || !from.can_transition_to(to) {
            return Err(KernelError::InvalidTransition {
                task: LIFECYCLE_TASK,
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.active_line = Some(line);
        self.log.push(message.to_string());
        if to == TaskState::Running {
            self.active_line = Some(RUNNING_LINE);
            self.log.push("... CPU executing application code ...".to_string());
        }
        Ok(to)
    }

    /// Text of the highlighted line
    pub fn active_code(&self) -> Option<&'static str> {
        self.active_line
            .and_then(|line| CODE_LINES.get(line.checked_sub(1)?).copied())
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_cycle() {
        let mut task = TaskLifecycle::new();
        assert_eq!(task.available_actions(), vec![LifecycleAction::Schedule]);

        assert_eq!(task.apply(LifecycleAction::Schedule).unwrap(), TaskState::Running);
        assert_eq!(task.active_code(), Some("        PerformApplicationTask();"));
        assert_eq!(
            task.available_actions(),
            vec![
                LifecycleAction::Yield,
                LifecycleAction::Block,
                LifecycleAction::Suspend
            ]
        );

        task.apply(LifecycleAction::Block).unwrap();
        assert_eq!(task.active_line(), Some(12));
        task.apply(LifecycleAction::Timeout).unwrap();
        task.apply(LifecycleAction::Schedule).unwrap();
        task.apply(LifecycleAction::Suspend).unwrap();
        assert_eq!(task.available_actions(), vec![LifecycleAction::Resume]);
        task.apply(LifecycleAction::Resume).unwrap();
        assert_eq!(task.state(), TaskState::Ready);
        assert_eq!(task.active_code(), Some("xTaskResumeFromISR( xHandle );"));
    }

    #[test]
    fn test_illegal_action() {
        let mut task = TaskLifecycle::new();
        let err = task.apply(LifecycleAction::Yield).unwrap_err();
        assert_eq!(
            err,
            KernelError::InvalidTransition {
                task: LIFECYCLE_TASK,
                from: TaskState::Ready,
                to: TaskState::Ready,
            }
        );
        assert_eq!(task.log().len(), 1);
    }

    #[test]
    fn test_schedule_logs_execution() {
        let mut task = TaskLifecycle::new();
        task.apply(LifecycleAction::Schedule).unwrap();
        assert_eq!(
            task.log().last().map(String::as_str),
            Some("... CPU executing application code ...")
        );
        task.reset();
        assert_eq!(task, TaskLifecycle::new());
    }
}
