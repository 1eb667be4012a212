//! Fixed task sets for the lessons
//!
//! A scenario is everything a simulation is built from: tasks with their
//! programs, which synchronisation objects exist, and the kernel
//! configuration. `reset()` rebuilds the kernel from it.

use crate::config::KernelConfig;
use crate::message_queue::BoundedQueue;
use crate::mutex::MutexProtocol;
use crate::program::TaskOp;
use crate::semaphore::{Semaphore, SemaphoreKind};
use crate::tcb::TaskSpec;
use crate::tick_source::TickSource;
use core_types::TaskId;
use kernel_api::KernelError;
use serde::{Deserialize, Serialize};

/// Queue capacity used by the queue lesson
pub const QUEUE_SIZE: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub tasks: Vec<TaskSpec>,
    /// A mutex exists when a protocol is given
    #[serde(default)]
    pub mutex: Option<MutexProtocol>,
    /// A queue exists when a capacity is given
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    #[serde(default)]
    pub semaphore: Option<SemaphoreKind>,
    /// Task that `request_send` acts as
    #[serde(default)]
    pub queue_producer: Option<TaskId>,
    /// Task that `request_receive` acts as
    #[serde(default)]
    pub queue_consumer: Option<TaskId>,
    #[serde(default)]
    pub config: KernelConfig,
}

impl Scenario {
    /// An empty scenario; add tasks and objects with the builder methods
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tasks: Vec::new(),
            mutex: None,
            queue_capacity: None,
            semaphore: None,
            queue_producer: None,
            queue_consumer: None,
            config: KernelConfig::default(),
        }
    }

    pub fn with_task(mut self, spec: TaskSpec) -> Self {
        self.tasks.push(spec);
        self
    }

    pub fn with_mutex(mut self, protocol: MutexProtocol) -> Self {
        self.mutex = Some(protocol);
        self
    }

    pub fn with_queue(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    pub fn with_semaphore(mut self, kind: SemaphoreKind) -> Self {
        self.semaphore = Some(kind);
        self
    }

    pub fn with_queue_roles(mut self, producer: TaskId, consumer: TaskId) -> Self {
        self.queue_producer = Some(producer);
        self.queue_consumer = Some(consumer);
        self
    }

    pub fn with_config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_tick_source(mut self, tick_source: TickSource) -> Self {
        self.config.tick_source = tick_source;
        self
    }

    /// Parses a scenario from JSON
    pub fn from_json(json: &str) -> Result<Self, KernelError> {
        serde_json::from_str(json).map_err(|e| KernelError::InvalidScenario(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, KernelError> {
        serde_json::to_string_pretty(self).map_err(|e| KernelError::InvalidScenario(e.to_string()))
    }

    /// Checks everything the task table does not
    pub fn validate(&self) -> Result<(), KernelError> {
        self.config.validate()?;
        if let Some(capacity) = self.queue_capacity {
            BoundedQueue::<i32>::with_capacity(capacity)?;
        }
        if let Some(kind) = self.semaphore {
            Semaphore::new(kind)?;
        }
        for (role, task) in [
            ("producer", self.queue_producer),
            ("consumer", self.queue_consumer),
        ] {
            if let Some(task) = task {
                if !self.tasks.iter().any(|spec| spec.id == task) {
                    return Err(KernelError::InvalidScenario(format!(
                        "queue {role} {task} is not a task of the scenario"
                    )));
                }
            }
        }
        Ok(())
    }

    /// LED and UART tasks over an idle task
    ///
    /// LED (priority 2) toggles and sleeps 4 ticks. UART (priority 1) prints
    /// the tick inside a critical section and sleeps 2 ticks. Idle waits for
    /// interrupts.
    pub fn scheduler_demo() -> Self {
        Self::new("scheduler")
            .with_task(TaskSpec::new(
                1,
                "LED_Task",
                2,
                vec![
                    TaskOp::ToggleLed,
                    TaskOp::Work("ulToggleCount++".into()),
                    TaskOp::Delay(4),
                    TaskOp::Jump(0),
                ],
            ))
            .with_task(TaskSpec::new(
                2,
                "UART_Task",
                1,
                vec![
                    TaskOp::EnterCritical,
                    TaskOp::UartPrint,
                    TaskOp::ExitCritical,
                    TaskOp::Delay(2),
                    TaskOp::Jump(0),
                ],
            ))
            .with_task(idle_task())
    }

    /// Low, medium and high tasks contending for one mutex
    ///
    /// L takes the mutex first and works for a long time. H wakes at tick 3
    /// and blocks on the mutex; M wakes at tick 4 and is pure CPU work.
    /// With `Plain`, M starves L and therefore H.
    pub fn priority_inversion(protocol: MutexProtocol) -> Self {
        let mut low = vec![TaskOp::TakeMutex];
        low.extend((0..10).map(|i| TaskOp::Work(format!("write_shared_buffer({i})"))));
        low.extend([TaskOp::GiveMutex, TaskOp::Delay(50), TaskOp::Jump(0)]);

        let mut medium = vec![TaskOp::Delay(4)];
        medium.extend((0..6).map(|i| TaskOp::Work(format!("crunch_numbers({i})"))));
        medium.extend([TaskOp::Delay(30), TaskOp::Jump(0)]);

        Self::new("priority_inversion")
            .with_mutex(protocol)
            .with_task(TaskSpec::new(1, "Task_L", 1, low))
            .with_task(TaskSpec::new(2, "Task_M", 2, medium))
            .with_task(TaskSpec::new(
                3,
                "Task_H",
                3,
                vec![
                    TaskOp::Delay(3),
                    TaskOp::TakeMutex,
                    TaskOp::Work("read_shared_buffer()".into()),
                    TaskOp::GiveMutex,
                    TaskOp::Delay(20),
                    TaskOp::Jump(1),
                ],
            ))
            .with_task(idle_task())
            .with_tick_source(TickSource::Periodic { every: 2 })
    }

    /// A sensor task feeding a consumer through a 5-slot queue
    pub fn queue_demo() -> Self {
        Self::new("queue")
            .with_queue(QUEUE_SIZE)
            .with_task(TaskSpec::new(
                1,
                "SensorTask",
                2,
                vec![
                    TaskOp::QueueSend {
                        value: 10,
                        urgent: false,
                    },
                    TaskOp::QueueSend {
                        value: 20,
                        urgent: false,
                    },
                    TaskOp::Delay(3),
                    TaskOp::Jump(0),
                ],
            ))
            .with_task(TaskSpec::new(
                2,
                "ConsumerTask",
                1,
                vec![
                    TaskOp::QueueReceive,
                    TaskOp::Work("process(rx)".into()),
                    TaskOp::Delay(2),
                    TaskOp::Jump(0),
                ],
            ))
            .with_task(idle_task())
            .with_queue_roles(TaskId::new(1), TaskId::new(2))
    }

    /// Three equal-priority takers and a slower giver
    pub fn semaphore_demo(kind: SemaphoreKind) -> Self {
        fn taker(id: u32, name: &str) -> TaskSpec {
            TaskSpec::new(
                id,
                name,
                2,
                vec![
                    TaskOp::SemaphoreTake,
                    TaskOp::Work("use_resource()".into()),
                    TaskOp::Delay(3),
                    TaskOp::Jump(0),
                ],
            )
        }

        Self::new("semaphore")
            .with_semaphore(kind)
            .with_task(taker(1, "Task_A"))
            .with_task(taker(2, "Task_B"))
            .with_task(taker(3, "Task_C"))
            .with_task(TaskSpec::new(
                4,
                "Giver",
                1,
                vec![TaskOp::Delay(4), TaskOp::SemaphoreGive, TaskOp::Jump(0)],
            ))
            .with_task(idle_task())
    }
}

/// The priority-0 task every scenario needs
pub fn idle_task() -> TaskSpec {
    TaskSpec::new(
        0,
        "IDLE",
        0,
        vec![TaskOp::WaitForInterrupt, TaskOp::Jump(0)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        for scenario in [
            Scenario::scheduler_demo(),
            Scenario::priority_inversion(MutexProtocol::PriorityInheritance),
            Scenario::priority_inversion(MutexProtocol::Plain),
            Scenario::queue_demo(),
            Scenario::semaphore_demo(SemaphoreKind::Binary),
        ] {
            assert!(scenario.validate().is_ok(), "{}", scenario.name);
        }
    }

    #[test]
    fn test_scheduler_demo_task_set() {
        let scenario = Scenario::scheduler_demo();
        let summary: Vec<(u32, &str, u8)> = scenario
            .tasks
            .iter()
            .map(|t| (t.id.as_u32(), t.name.as_str(), t.priority.value()))
            .collect();
        assert_eq!(
            summary,
            vec![(1, "LED_Task", 2), (2, "UART_Task", 1), (0, "IDLE", 0)]
        );
    }

    #[test]
    fn test_json_round_trip() {
        let scenario = Scenario::queue_demo();
        let json = scenario.to_json().unwrap();
        assert_eq!(Scenario::from_json(&json).unwrap(), scenario);
    }

    #[test]
    fn test_from_json_with_defaults() {
        let json = r#"{
            "name": "tiny",
            "tasks": [
                {"id": 0, "name": "IDLE", "priority": 0, "program": ["wait_for_interrupt"]},
                {"id": 1, "name": "Blink", "priority": 1, "program": ["toggle_led", {"delay": 1}]}
            ]
        }"#;
        let scenario = Scenario::from_json(json).unwrap();
        assert_eq!(scenario.tasks.len(), 2);
        assert_eq!(scenario.mutex, None);
        assert_eq!(scenario.config, KernelConfig::default());
    }

    #[test]
    fn test_bad_json_is_invalid_scenario() {
        let err = Scenario::from_json("{").unwrap_err();
        assert!(matches!(err, KernelError::InvalidScenario(_)));
    }

    #[test]
    fn test_unknown_queue_role() {
        let scenario = Scenario::queue_demo().with_queue_roles(TaskId::new(9), TaskId::new(2));
        assert!(scenario.validate().is_err());
    }

    #[test]
    fn test_zero_capacity_queue() {
        assert!(Scenario::queue_demo().with_queue(0).validate().is_err());
    }
}
