//! Instruction tables for tasks, exception handlers and the external ISR
//!
//! Every piece of simulated code is a fixed table of typed instructions
//! walked by an index. Task programs are an implicit `for (;;)`: running
//! past the last instruction wraps to 0. `Jump` is resolved while fetching
//! and never costs a step of its own.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One instruction of a task program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOp {
    /// Plain computation with a display label
    Work(String),
    /// Toggle the board LED
    ToggleLed,
    /// Print the current tick on the UART
    UartPrint,
    /// `taskENTER_CRITICAL()`
    EnterCritical,
    /// `taskEXIT_CRITICAL()`
    ExitCritical,
    /// `vTaskDelay(n)`
    Delay(u64),
    /// `taskYIELD()`
    Yield,
    /// `vTaskSuspend(NULL)`
    Suspend,
    /// Take the scenario mutex, waiting forever
    TakeMutex,
    /// Give the scenario mutex back
    GiveMutex,
    /// Send to the scenario queue, at the front when `urgent`
    QueueSend { value: i32, urgent: bool },
    /// Receive from the scenario queue, waiting forever
    QueueReceive,
    /// Take a semaphore token, waiting forever
    SemaphoreTake,
    /// Give a semaphore token
    SemaphoreGive,
    /// `__WFI()`: sleep until the next interrupt
    WaitForInterrupt,
    /// Continue at another index
    Jump(usize),
}

impl TaskOp {
    /// Returns true if the instruction can put the task to sleep
    pub fn may_block(&self) -> bool {
        matches!(
            self,
            TaskOp::Delay(_)
                | TaskOp::Suspend
                | TaskOp::TakeMutex
                | TaskOp::QueueSend { .. }
                | TaskOp::QueueReceive
                | TaskOp::SemaphoreTake
        )
    }
}

impl fmt::Display for TaskOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOp::Work(label) => f.write_str(label),
            TaskOp::ToggleLed => f.write_str("HAL_GPIO_TogglePin(LED_GPIO_Port, LED_Pin)"),
            TaskOp::UartPrint => f.write_str("printf(\"Tick: %lu\\n\", xTaskGetTickCount())"),
            TaskOp::EnterCritical => f.write_str("taskENTER_CRITICAL()"),
            TaskOp::ExitCritical => f.write_str("taskEXIT_CRITICAL()"),
            TaskOp::Delay(ticks) => write!(f, "vTaskDelay({ticks})"),
            TaskOp::Yield => f.write_str("taskYIELD()"),
            TaskOp::Suspend => f.write_str("vTaskSuspend(NULL)"),
            TaskOp::TakeMutex => f.write_str("xSemaphoreTake(xMutex, portMAX_DELAY)"),
            TaskOp::GiveMutex => f.write_str("xSemaphoreGive(xMutex)"),
            TaskOp::QueueSend {
                value,
                urgent: false,
            } => write!(f, "xQueueSendToBack(xQueue, &{value}, portMAX_DELAY)"),
            TaskOp::QueueSend {
                value,
                urgent: true,
            } => write!(f, "xQueueSendToFront(xQueue, &{value}, portMAX_DELAY)"),
            TaskOp::QueueReceive => f.write_str("xQueueReceive(xQueue, &rx, portMAX_DELAY)"),
            TaskOp::SemaphoreTake => f.write_str("xSemaphoreTake(xSemaphore, portMAX_DELAY)"),
            TaskOp::SemaphoreGive => f.write_str("xSemaphoreGive(xSemaphore)"),
            TaskOp::WaitForInterrupt => f.write_str("__WFI()"),
            TaskOp::Jump(target) => write!(f, "goto {target}"),
        }
    }
}

/// A task's instruction table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Program {
    ops: Vec<TaskOp>,
}

impl Program {
    /// Creates a program from its instructions
    pub fn new(ops: Vec<TaskOp>) -> Self {
        Self { ops }
    }

    /// Returns the instructions
    pub fn ops(&self) -> &[TaskOp] {
        &self.ops
    }

    /// Number of instructions
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true for a program with no instructions
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Checks that every index resolves to a real instruction
    ///
    /// Rejects empty programs, zero delays, jumps past the end, and cycles
    /// made only of jumps.
    pub fn validate(&self) -> Result<(), String> {
        if self.ops.is_empty() {
            return Err("program has no instructions".to_string());
        }
        for (index, op) in self.ops.iter().enumerate() {
            match op {
                TaskOp::Delay(0) => {
                    return Err(format!("delay at {index} is zero ticks"));
                }
                TaskOp::Jump(target) if *target >= self.ops.len() => {
                    return Err(format!(
                        "jump at {index} targets {target}, program has {} instructions",
                        self.ops.len()
                    ));
                }
                _ => {}
            }
        }
        for start in 0..self.ops.len() {
            if self.resolve(start).is_none() {
                return Err(format!("jump cycle reachable from {start}"));
            }
        }
        Ok(())
    }

    /// Follows jumps from `pc` to the next real instruction
    ///
    /// An index past the end wraps to 0. Returns `None` for an empty
    /// program or when only jumps are reachable.
    pub fn resolve(&self, pc: usize) -> Option<(usize, &TaskOp)> {
        if self.ops.is_empty() {
            return None;
        }
        let mut pc = if pc >= self.ops.len() { 0 } else { pc };
        for _ in 0..=self.ops.len() {
            match self.ops.get(pc)? {
                TaskOp::Jump(target) => pc = *target,
                op => return Some((pc, op)),
            }
        }
        None
    }
}

impl From<Vec<TaskOp>> for Program {
    fn from(ops: Vec<TaskOp>) -> Self {
        Self::new(ops)
    }
}

/// One instruction of a kernel exception handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerOp {
    MaskInterrupts,
    IncrementTick,
    UnblockDue,
    UnmaskInterrupts,
    SwitchContext,
    ReturnFromHandler,
}

impl fmt::Display for HandlerOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            HandlerOp::MaskInterrupts => "portDISABLE_INTERRUPTS()",
            HandlerOp::IncrementTick => "xTickCount++",
            HandlerOp::UnblockDue => "move expired delays to the ready list",
            HandlerOp::UnmaskInterrupts => "portENABLE_INTERRUPTS()",
            HandlerOp::SwitchContext => "vTaskSwitchContext()",
            HandlerOp::ReturnFromHandler => "bx lr",
        };
        f.write_str(text)
    }
}

/// Kernel exception handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Handler {
    /// Periodic tick interrupt
    SysTick,
    /// Deferred context switch
    PendSv,
}

const SYSTICK_PROGRAM: [HandlerOp; 6] = [
    HandlerOp::MaskInterrupts,
    HandlerOp::IncrementTick,
    HandlerOp::UnblockDue,
    HandlerOp::UnmaskInterrupts,
    HandlerOp::SwitchContext,
    HandlerOp::ReturnFromHandler,
];

const PENDSV_PROGRAM: [HandlerOp; 2] = [HandlerOp::SwitchContext, HandlerOp::ReturnFromHandler];

impl Handler {
    /// Returns the handler's instruction table
    pub fn program(&self) -> &'static [HandlerOp] {
        match self {
            Handler::SysTick => &SYSTICK_PROGRAM,
            Handler::PendSv => &PENDSV_PROGRAM,
        }
    }

    /// Vector table name
    pub fn name(&self) -> &'static str {
        match self {
            Handler::SysTick => "SysTick_Handler",
            Handler::PendSv => "PendSV_Handler",
        }
    }
}

/// One instruction of the external interrupt handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsrOp {
    ClearFlag,
    YieldFromIsr,
}

impl fmt::Display for IsrOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsrOp::ClearFlag => f.write_str("EXTI->PR = EXTI_PR_PR0"),
            IsrOp::YieldFromIsr => f.write_str("portYIELD_FROM_ISR(xHigherPriorityTaskWoken)"),
        }
    }
}

/// EXTI0 handler body
pub const ISR_PROGRAM: [IsrOp; 2] = [IsrOp::ClearFlag, IsrOp::YieldFromIsr];

/// Vector table name of the external interrupt handler
pub const ISR_NAME: &str = "EXTI0_IRQHandler";

/// A position inside an exception handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub handler: Handler,
    pub pc: usize,
}

impl Frame {
    /// Frame at the first instruction of `handler`
    pub fn enter(handler: Handler) -> Self {
        Self { handler, pc: 0 }
    }

    /// The instruction at this position, if any
    pub fn op(&self) -> Option<HandlerOp> {
        self.handler.program().get(self.pc).copied()
    }
}

/// Where the CPU is executing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Context {
    /// The running task's program
    Thread,
    /// A kernel exception handler
    Handler(Frame),
    /// The external ISR, remembering what it interrupted
    Isr { pc: usize, resume: Option<Frame> },
}

impl Context {
    /// Returns true in thread mode
    pub fn is_thread(&self) -> bool {
        matches!(self, Context::Thread)
    }

    /// Display label
    pub fn label(&self) -> &'static str {
        match self {
            Context::Thread => "Thread",
            Context::Handler(frame) => frame.handler.name(),
            Context::Isr { .. } => ISR_NAME,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(ops: Vec<TaskOp>) -> Program {
        Program::new(ops)
    }

    #[test]
    fn test_resolve_wraps_past_end() {
        let p = program(vec![TaskOp::ToggleLed, TaskOp::Delay(4)]);
        assert_eq!(p.resolve(2), Some((0, &TaskOp::ToggleLed)));
        assert_eq!(p.resolve(1), Some((1, &TaskOp::Delay(4))));
    }

    #[test]
    fn test_resolve_follows_jumps() {
        let p = program(vec![
            TaskOp::Delay(1),
            TaskOp::TakeMutex,
            TaskOp::GiveMutex,
            TaskOp::Jump(1),
        ]);
        assert_eq!(p.resolve(3), Some((1, &TaskOp::TakeMutex)));
    }

    #[test]
    fn test_validate_accepts_lesson_programs() {
        let p = program(vec![TaskOp::WaitForInterrupt, TaskOp::Jump(0)]);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_program() {
        assert!(program(vec![]).validate().is_err());
        assert_eq!(program(vec![]).resolve(0), None);
    }

    #[test]
    fn test_validate_rejects_out_of_range_jump() {
        let p = program(vec![TaskOp::Yield, TaskOp::Jump(9)]);
        let err = p.validate().unwrap_err();
        assert!(err.contains("targets 9"));
    }

    #[test]
    fn test_validate_rejects_zero_delay() {
        let p = program(vec![TaskOp::Work("x".into()), TaskOp::Delay(0)]);
        assert_eq!(p.validate().unwrap_err(), "delay at 1 is zero ticks");
    }

    #[test]
    fn test_validate_rejects_jump_only_cycle() {
        let p = program(vec![TaskOp::Yield, TaskOp::Jump(2), TaskOp::Jump(1)]);
        assert!(p.validate().is_err());
        assert_eq!(p.resolve(1), None);
    }

    #[test]
    fn test_handler_tables() {
        assert_eq!(Handler::SysTick.program().len(), 6);
        assert_eq!(Handler::SysTick.program()[1], HandlerOp::IncrementTick);
        assert_eq!(
            Handler::PendSv.program(),
            &[HandlerOp::SwitchContext, HandlerOp::ReturnFromHandler]
        );
        assert_eq!(Frame::enter(Handler::PendSv).op(), Some(HandlerOp::SwitchContext));
        let past_end = Frame {
            handler: Handler::PendSv,
            pc: 2,
        };
        assert_eq!(past_end.op(), None);
    }

    #[test]
    fn test_op_display_reads_like_firmware() {
        assert_eq!(TaskOp::Delay(4).to_string(), "vTaskDelay(4)");
        assert_eq!(
            TaskOp::QueueSend {
                value: 99,
                urgent: true
            }
            .to_string(),
            "xQueueSendToFront(xQueue, &99, portMAX_DELAY)"
        );
        assert_eq!(Context::Thread.label(), "Thread");
    }

    #[test]
    fn test_program_json_shape() {
        let p = program(vec![TaskOp::ToggleLed, TaskOp::Delay(4), TaskOp::Jump(0)]);
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, r#"["toggle_led",{"delay":4},{"jump":0}]"#);
        let back: Program = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
