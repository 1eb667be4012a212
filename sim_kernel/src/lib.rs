//! # Simulated Kernel
//!
//! This crate provides a step-driven simulation of a small preemptive,
//! priority-based RTOS kernel.
//!
//! ## Purpose
//!
//! The simulated kernel lets a learner watch the decisions a kernel makes:
//! - Runs under `cargo test`
//! - Deterministic (controlled ticks, no real concurrency)
//! - Single-stepped (one micro-instruction per call, if asked)
//! - Inspectable (all state is exposed through snapshots)
//!
//! ## Philosophy
//!
//! **Testability is a first-class design constraint.**
//!
//! Every piece of simulation state lives in one [`SimulatedKernel`]. There
//! are no globals; two kernels never influence each other, and `reset()`
//! brings one back to exactly its boot state.
//!
//! ## Execution model
//!
//! Task, handler and ISR code are instruction tables (see [`program`]).
//! One micro-step does exactly one of, in this order:
//!
//! 1. start a latched external interrupt, if unmasked and not already in it
//! 2. in thread mode, take a due SysTick, if unmasked
//! 3. in thread mode, take PendSV if a reschedule is pending, if unmasked
//! 4. execute the next instruction of the current context

pub mod config;
pub mod context_switch;
pub mod delay;
pub mod interrupt;
pub mod lifecycle;
pub mod message_queue;
pub mod mutex;
pub mod program;
pub mod scenario;
pub mod scheduler;
pub mod semaphore;
pub mod snapshot;
pub mod tcb;
pub mod test_utils;
pub mod tick_source;
pub mod timer;
pub mod trace;

pub use config::KernelConfig;
pub use interrupt::{InterruptController, InterruptOutcome};
pub use message_queue::{BoundedQueue, ReceiveStatus, SendStatus};
pub use mutex::{AcquireOutcome, Mutex, MutexProtocol, ReleaseOutcome};
pub use scenario::Scenario;
pub use semaphore::{GiveStatus, Semaphore, SemaphoreKind, TakeStatus};
pub use snapshot::KernelSnapshot;
pub use tick_source::TickSource;

use core_types::{BlockReason, Priority, TaskId, TaskState};
use crate::program::{Context, Frame, Handler, HandlerOp, IsrOp, TaskOp, ISR_NAME, ISR_PROGRAM};
use crate::scheduler::Scheduler;
use crate::tcb::TaskTable;
use crate::tick_source::TickInjector;
use crate::timer::SimTimer;
use crate::trace::{TraceKind, TraceLog};
use kernel_api::{Granularity, KernelError, SimulationEngine, Tick};
use log::warn;

/// Simulated kernel state
///
/// Owns the whole simulation: tick counter, tasks, scheduler, interrupt
/// state, the scenario's synchronisation objects and the observable
/// peripherals (LED and UART).
#[derive(Debug, Clone)]
pub struct SimulatedKernel {
    scenario: Scenario,
    timer: SimTimer,
    tasks: TaskTable,
    scheduler: Scheduler,
    interrupts: InterruptController,
    ticks: TickInjector,
    mutex: Option<Mutex>,
    queue: Option<BoundedQueue<i32>>,
    semaphore: Option<Semaphore>,
    context: Context,
    /// PendSV requested
    yield_pending: bool,
    /// Micro-steps executed since reset
    steps: u64,
    /// Task instructions executed since reset
    task_instructions: u64,
    led_on: bool,
    /// Newest `output_capacity` lines
    uart_output: String,
    /// Newest `output_capacity` values taken off the queue
    received: Vec<i32>,
    trace: TraceLog,
}

impl SimulatedKernel {
    /// Validates the scenario and boots a kernel from it
    pub fn new(scenario: Scenario) -> Result<Self, KernelError> {
        scenario.validate()?;
        Self::boot(scenario)
    }

    fn boot(scenario: Scenario) -> Result<Self, KernelError> {
        let config = &scenario.config;
        let tasks = TaskTable::new(&scenario.tasks, config.max_priorities)?;
        let ticks = TickInjector::new(config.tick_source)?;
        let queue = scenario
            .queue_capacity
            .map(BoundedQueue::with_capacity)
            .transpose()?;
        let semaphore = scenario.semaphore.map(Semaphore::new).transpose()?;
        let mutex = scenario.mutex.map(Mutex::new);
        let trace = TraceLog::new(config.trace_capacity);

        let mut kernel = Self {
            scenario,
            timer: SimTimer::new(),
            tasks,
            scheduler: Scheduler::new(),
            interrupts: InterruptController::new(),
            ticks,
            mutex,
            queue,
            semaphore,
            context: Context::Thread,
            yield_pending: false,
            steps: 0,
            task_instructions: 0,
            led_on: false,
            uart_output: String::new(),
            received: Vec::new(),
            trace,
        };
        let message = format!(
            "Kernel started: scenario '{}' with {} tasks",
            kernel.scenario.name,
            kernel.tasks.len()
        );
        kernel.log(TraceKind::Reset, message);
        kernel.switch_context()?;
        Ok(kernel)
    }

    // ----- accessors -----

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    pub fn now(&self) -> Tick {
        self.timer.now()
    }

    pub fn tasks(&self) -> &TaskTable {
        &self.tasks
    }

    /// The RUNNING task; `None` only between a block and the PendSV that
    /// follows it
    pub fn current_task(&self) -> Option<TaskId> {
        self.tasks.running()
    }

    pub fn context(&self) -> Context {
        self.context
    }

    pub fn interrupts(&self) -> &InterruptController {
        &self.interrupts
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn mutex(&self) -> Option<&Mutex> {
        self.mutex.as_ref()
    }

    pub fn queue(&self) -> Option<&BoundedQueue<i32>> {
        self.queue.as_ref()
    }

    pub fn semaphore(&self) -> Option<&Semaphore> {
        self.semaphore.as_ref()
    }

    pub fn trace(&self) -> &TraceLog {
        &self.trace
    }

    pub fn yield_pending(&self) -> bool {
        self.yield_pending
    }

    pub fn tick_pending(&self) -> bool {
        self.ticks.is_due()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn task_instructions(&self) -> u64 {
        self.task_instructions
    }

    pub fn led_on(&self) -> bool {
        self.led_on
    }

    pub fn uart_output(&self) -> &str {
        &self.uart_output
    }

    /// Values taken out of the queue, in order
    pub fn received(&self) -> &[i32] {
        &self.received
    }

    /// Describes what the next micro-step will execute
    pub fn next_instruction(&self) -> String {
        if self.interrupts.has_serviceable_pending() {
            return format!("{ISR_NAME}: {}", ISR_PROGRAM[0]);
        }
        if self.context.is_thread() && !self.interrupts.is_masked() {
            if self.ticks.is_due() {
                return format!("{}: {}", Handler::SysTick.name(), HandlerOp::MaskInterrupts);
            }
            if self.yield_pending {
                return format!("{}: {}", Handler::PendSv.name(), HandlerOp::SwitchContext);
            }
        }
        match self.context {
            Context::Thread => match self.tasks.running().and_then(|id| self.tasks.get(id).ok()) {
                Some(task) => match task.program().resolve(task.pc()) {
                    Some((_, op)) => format!("{}: {op}", task.name()),
                    None => format!("{}: <no instruction>", task.name()),
                },
                None => "no task running".to_string(),
            },
            Context::Handler(frame) => match frame.op() {
                Some(op) => format!("{}: {op}", frame.handler.name()),
                None => format!("{}: return", frame.handler.name()),
            },
            Context::Isr { pc, .. } => match ISR_PROGRAM.get(pc) {
                Some(op) => format!("{ISR_NAME}: {op}"),
                None => format!("{ISR_NAME}: return"),
            },
        }
    }

    // ----- direct requests -----

    /// Reassigns a task's base priority (scheduler lesson)
    pub fn set_priority(&mut self, task: TaskId, priority: u8) -> Result<(), KernelError> {
        let max = self.scenario.config.max_priorities;
        let tcb = self.tasks.get(task)?;
        if tcb.is_idle() {
            return Err(KernelError::IdleTaskMisuse(task));
        }
        if priority == 0 || priority >= max {
            return Err(KernelError::InvalidPriority {
                task,
                priority: Priority::new(priority),
                max,
            });
        }
        let old = tcb.base_priority();
        self.tasks.set_base_priority(task, Priority::new(priority))?;
        let message = format!(
            "{} priority {} -> {}",
            self.name(task),
            old,
            priority
        );
        self.log(TraceKind::Priority, message);
        self.reschedule_now_or_defer()
    }

    /// Asserts the external interrupt line (EXTI0)
    pub fn trigger_interrupt(&mut self) -> InterruptOutcome {
        let outcome = self.interrupts.raise_interrupt();
        match outcome {
            InterruptOutcome::Serviced => {
                self.context = Context::Isr {
                    pc: 0,
                    resume: self.handler_frame(),
                };
                self.log(TraceKind::Interrupt, format!("{ISR_NAME} entered"));
            }
            InterruptOutcome::Pended => {
                let why = if self.interrupts.is_executing_isr() {
                    "handler already running"
                } else {
                    "interrupts masked"
                };
                self.log(
                    TraceKind::Interrupt,
                    format!("Interrupt pended ({why})"),
                );
            }
        }
        outcome
    }

    /// Makes SysTick due at the next opportunity
    pub fn pend_tick(&mut self) {
        self.ticks.pend();
    }

    /// Sends as the scenario's queue producer
    ///
    /// While the producer is blocked or suspended the value is still offered
    /// to the queue; a full queue then answers `Blocked` without parking
    /// anyone.
    pub fn request_send(&mut self, value: i32, urgent: bool) -> Result<SendStatus, KernelError> {
        let producer = self
            .scenario
            .queue_producer
            .ok_or(KernelError::ResourceUnavailable("queue producer"))?;
        if self.tasks.get(producer)?.state().is_schedulable() {
            return self.request_send_as(producer, value, urgent);
        }
        let status = self.queue_send(None, value, urgent)?;
        self.reschedule_now_or_defer()?;
        Ok(status)
    }

    /// Sends as `task`; a full queue blocks it
    pub fn request_send_as(
        &mut self,
        task: TaskId,
        value: i32,
        urgent: bool,
    ) -> Result<SendStatus, KernelError> {
        self.ensure_runnable(task)?;
        let status = self.queue_send(Some(task), value, urgent)?;
        self.reschedule_now_or_defer()?;
        Ok(status)
    }

    /// Receives as the scenario's queue consumer
    ///
    /// While the consumer is blocked or suspended the queue is still read;
    /// an empty queue then answers `Blocked` without parking anyone.
    pub fn request_receive(&mut self) -> Result<ReceiveStatus<i32>, KernelError> {
        let consumer = self
            .scenario
            .queue_consumer
            .ok_or(KernelError::ResourceUnavailable("queue consumer"))?;
        if self.tasks.get(consumer)?.state().is_schedulable() {
            return self.request_receive_as(consumer);
        }
        let status = self.queue_receive(None)?;
        self.reschedule_now_or_defer()?;
        Ok(status)
    }

    /// Receives as `task`; an empty queue blocks it
    pub fn request_receive_as(&mut self, task: TaskId) -> Result<ReceiveStatus<i32>, KernelError> {
        self.ensure_runnable(task)?;
        let status = self.queue_receive(Some(task))?;
        self.reschedule_now_or_defer()?;
        Ok(status)
    }

    /// Takes the mutex on behalf of `task`
    pub fn request_acquire(&mut self, task: TaskId) -> Result<AcquireOutcome, KernelError> {
        self.ensure_runnable(task)?;
        let outcome = self.mutex_acquire(task)?;
        self.reschedule_now_or_defer()?;
        Ok(outcome)
    }

    /// Gives the mutex back on behalf of `task`
    pub fn request_release(&mut self, task: TaskId) -> Result<ReleaseOutcome, KernelError> {
        self.ensure_runnable(task)?;
        let outcome = self.mutex_release(task)?;
        self.reschedule_now_or_defer()?;
        Ok(outcome)
    }

    /// `vTaskSuspend(task)`: removes a task from scheduling
    ///
    /// A waiting task also leaves the wait list of its object and will
    /// retry the wait after being resumed.
    pub fn suspend_task(&mut self, task: TaskId) -> Result<(), KernelError> {
        let state = self.tasks.get(task)?.state();
        if state == TaskState::Running && self.interrupts.is_masked() {
            return Err(KernelError::BlockedInCriticalSection(task));
        }
        self.suspend(task)?;
        self.reschedule_now_or_defer()
    }

    /// `vTaskResume(task)`: returns a suspended task to READY
    pub fn resume_task(&mut self, task: TaskId) -> Result<(), KernelError> {
        let state = self.tasks.get(task)?.state();
        if state != TaskState::Suspended {
            return Err(KernelError::InvalidTransition {
                task,
                from: state,
                to: TaskState::Ready,
            });
        }
        self.tasks.make_ready(task)?;
        let message = format!("{} resumed", self.name(task));
        self.log(TraceKind::Suspend, message);
        self.reschedule_now_or_defer()
    }

    // ----- stepping -----

    /// Executes exactly one micro-step
    fn step_instruction(&mut self) -> Result<(), KernelError> {
        self.steps += 1;
        log::trace!(target: "sim_kernel", "step {}: {}", self.steps, self.next_instruction());

        if self.interrupts.service_pending() {
            self.context = Context::Isr {
                pc: 0,
                resume: self.handler_frame(),
            };
            self.log(TraceKind::Interrupt, format!("Pended interrupt taken: {ISR_NAME}"));
            return self.execute_isr_op();
        }

        if self.context.is_thread() && !self.interrupts.is_masked() {
            if self.ticks.take_due() {
                return self.enter_handler(Handler::SysTick);
            }
            if self.yield_pending {
                self.yield_pending = false;
                return self.enter_handler(Handler::PendSv);
            }
        }

        match self.context {
            Context::Thread => self.execute_task_op(),
            Context::Handler(_) => self.execute_handler_op(),
            Context::Isr { .. } => self.execute_isr_op(),
        }
    }

    /// Runs micro-steps until `done` holds, within the configured budget
    fn run_bounded<F>(&mut self, done: F) -> Result<(), KernelError>
    where
        F: Fn(&Self) -> bool,
    {
        let limit = self.scenario.config.max_steps_per_request;
        for _ in 0..limit {
            self.step_instruction()?;
            if done(self) {
                return Ok(());
            }
        }
        Err(KernelError::StepLimitExceeded { limit })
    }

    fn enter_handler(&mut self, handler: Handler) -> Result<(), KernelError> {
        self.context = Context::Handler(Frame::enter(handler));
        self.log(TraceKind::Exception, format!("{} entered", handler.name()));
        self.execute_handler_op()
    }

    fn execute_handler_op(&mut self) -> Result<(), KernelError> {
        let Context::Handler(mut frame) = self.context else {
            return Ok(());
        };
        let Some(op) = frame.op() else {
            self.context = Context::Thread;
            return Ok(());
        };
        frame.pc += 1;
        self.context = Context::Handler(frame);

        match op {
            HandlerOp::MaskInterrupts => {
                self.interrupts.enter_critical();
                self.log(TraceKind::Critical, "Interrupts masked for tick processing");
            }
            HandlerOp::IncrementTick => {
                let now = self.timer.increment_tick();
                self.log(TraceKind::Tick, format!("Tick -> {now}"));
            }
            HandlerOp::UnblockDue => {
                let woke = delay::unblock_due(&mut self.tasks, self.timer.now())?;
                if woke.is_empty() {
                    self.log(TraceKind::Unblock, "No delays expired");
                }
                for task in woke {
                    let message = format!("{} delay expired -> READY", self.name(task));
                    self.log(TraceKind::Unblock, message);
                }
            }
            HandlerOp::UnmaskInterrupts => {
                self.interrupts.exit_critical();
                self.log(TraceKind::Critical, "Interrupts unmasked");
            }
            HandlerOp::SwitchContext => {
                if frame.handler == Handler::SysTick {
                    // time slice: equal-priority peers take turns each tick
                    self.scheduler.yield_current(&mut self.tasks, self.timer.now())?;
                }
                self.yield_pending = false;
                self.switch_context()?;
            }
            HandlerOp::ReturnFromHandler => {
                self.context = Context::Thread;
                self.log(
                    TraceKind::Exception,
                    format!("{} returned to thread mode", frame.handler.name()),
                );
            }
        }
        Ok(())
    }

    fn execute_isr_op(&mut self) -> Result<(), KernelError> {
        let Context::Isr { pc, resume } = self.context else {
            return Ok(());
        };
        match ISR_PROGRAM.get(pc) {
            Some(IsrOp::ClearFlag) => {
                self.context = Context::Isr { pc: pc + 1, resume };
                self.log(TraceKind::Interrupt, "EXTI0 pending flag cleared");
            }
            Some(IsrOp::YieldFromIsr) | None => {
                self.interrupts.complete_isr();
                self.yield_pending = true;
                self.context = resume.map_or(Context::Thread, Context::Handler);
                self.log(
                    TraceKind::Interrupt,
                    format!("{ISR_NAME} done, context switch requested"),
                );
            }
        }
        Ok(())
    }

    fn execute_task_op(&mut self) -> Result<(), KernelError> {
        let Some(current) = self.tasks.running() else {
            return self.switch_context();
        };
        let tcb = self.tasks.get(current)?;
        let (pc, op) = tcb
            .program()
            .resolve(tcb.pc())
            .map(|(pc, op)| (pc, op.clone()))
            .ok_or_else(|| {
                KernelError::InvalidScenario(format!("{} has nothing to execute", tcb.name()))
            })?;
        let name = tcb.name().to_string();

        if op.may_block() && self.interrupts.is_masked() {
            return Err(KernelError::BlockedInCriticalSection(current));
        }

        self.task_instructions += 1;
        self.ticks.record_instruction();

        // retried waits leave the pc on the same instruction
        let advance = match &op {
            TaskOp::Work(label) => {
                self.log(TraceKind::Task, format!("{name}: {label}"));
                true
            }
            TaskOp::ToggleLed => {
                self.led_on = !self.led_on;
                let level = if self.led_on { "on" } else { "off" };
                self.log(TraceKind::Task, format!("{name}: LED {level}"));
                true
            }
            TaskOp::UartPrint => {
                let line = format!("Tick: {}\n", self.timer.now());
                self.print_uart(&line);
                self.log(TraceKind::Task, format!("{name}: UART \"{}\"", line.trim_end()));
                true
            }
            TaskOp::EnterCritical => {
                self.interrupts.enter_critical();
                let depth = self.interrupts.critical_nesting();
                self.log(TraceKind::Critical, format!("{name} entered critical section (depth {depth})"));
                true
            }
            TaskOp::ExitCritical => {
                self.interrupts.exit_critical();
                let depth = self.interrupts.critical_nesting();
                self.log(TraceKind::Critical, format!("{name} left critical section (depth {depth})"));
                true
            }
            TaskOp::Delay(ticks) => {
                let wake = delay::block_current(&mut self.tasks, current, *ticks, self.timer.now())?;
                self.log(TraceKind::Block, format!("{name} delayed until tick {wake}"));
                true
            }
            TaskOp::Yield => {
                self.scheduler.yield_current(&mut self.tasks, self.timer.now())?;
                self.yield_pending = true;
                self.log(TraceKind::Schedule, format!("{name} yielded"));
                true
            }
            TaskOp::Suspend => {
                self.tasks.get_mut(current)?.pc = pc + 1;
                self.suspend(current)?;
                false
            }
            TaskOp::TakeMutex => {
                matches!(self.mutex_acquire(current)?, AcquireOutcome::Acquired)
            }
            TaskOp::GiveMutex => {
                self.mutex_release(current)?;
                true
            }
            TaskOp::QueueSend { value, urgent } => {
                matches!(
                    self.queue_send(Some(current), *value, *urgent)?,
                    SendStatus::Sent { .. }
                )
            }
            TaskOp::QueueReceive => {
                matches!(
                    self.queue_receive(Some(current))?,
                    ReceiveStatus::Received { .. }
                )
            }
            TaskOp::SemaphoreTake => {
                matches!(self.semaphore_take(current)?, TakeStatus::Taken)
            }
            TaskOp::SemaphoreGive => {
                self.semaphore_give(current)?;
                true
            }
            TaskOp::WaitForInterrupt => {
                self.ticks.pend();
                self.log(TraceKind::Task, format!("{name}: sleeping until next interrupt"));
                true
            }
            TaskOp::Jump(_) => true,
        };

        if advance {
            self.tasks.get_mut(current)?.pc = pc + 1;
        }
        self.request_yield_if_needed();
        Ok(())
    }

    // ----- object operations shared by task programs and direct requests -----

    fn mutex_acquire(&mut self, task: TaskId) -> Result<AcquireOutcome, KernelError> {
        let mutex = self
            .mutex
            .as_mut()
            .ok_or(KernelError::ResourceUnavailable("mutex"))?;
        if mutex.holder().is_some_and(|holder| holder != task) {
            Self::check_may_block(&self.tasks, &self.interrupts, task)?;
        }
        let outcome = mutex.try_acquire(&mut self.tasks, task)?;
        let name = self.name(task);
        match outcome {
            AcquireOutcome::Acquired => {
                self.log(TraceKind::Mutex, format!("{name} took the mutex"));
            }
            AcquireOutcome::Blocked { boosted } => {
                self.log(TraceKind::Block, format!("{name} blocked on the mutex"));
                if let Some((holder, priority)) = boosted {
                    let message = format!(
                        "{} inherits priority {priority} from {name}",
                        self.name(holder)
                    );
                    self.log(TraceKind::Mutex, message);
                }
            }
        }
        Ok(outcome)
    }

    fn mutex_release(&mut self, task: TaskId) -> Result<ReleaseOutcome, KernelError> {
        let mutex = self
            .mutex
            .as_mut()
            .ok_or(KernelError::ResourceUnavailable("mutex"))?;
        let outcome = mutex.release(&mut self.tasks, task)?;
        let name = self.name(task);
        let base = self.tasks.get(task)?.base_priority();
        self.log(
            TraceKind::Mutex,
            format!("{name} released the mutex, priority back to {base}"),
        );
        if let ReleaseOutcome::HandedOff { to } = outcome {
            // the new owner resumes after its take
            let tcb = self.tasks.get_mut(to)?;
            let skip = match tcb.program.resolve(tcb.pc) {
                Some((pc, TaskOp::TakeMutex)) => Some(pc + 1),
                _ => None,
            };
            if let Some(pc) = skip {
                tcb.pc = pc;
            }
            let message = format!("Mutex handed to {} -> READY", self.name(to));
            self.log(TraceKind::Mutex, message);
        }
        Ok(outcome)
    }

    /// Sends on behalf of `task`, or of no task for an outside request
    fn queue_send(
        &mut self,
        task: Option<TaskId>,
        value: i32,
        urgent: bool,
    ) -> Result<SendStatus, KernelError> {
        let full = self
            .queue
            .as_ref()
            .ok_or(KernelError::ResourceUnavailable("queue"))?
            .is_full();
        if let (true, Some(task)) = (full, task) {
            Self::check_may_block(&self.tasks, &self.interrupts, task)?;
            delay::block_on_event(&mut self.tasks, task, BlockReason::QueueSend)?;
        }
        let queue = self
            .queue
            .as_mut()
            .ok_or(KernelError::ResourceUnavailable("queue"))?;
        let status = if urgent {
            queue.send_to_front(task, value)
        } else {
            queue.send_to_back(task, value)
        };
        let name = self.requester_name(task);
        match status {
            SendStatus::Sent { woke } => {
                let end = if urgent { "front" } else { "back" };
                self.log(TraceKind::Queue, format!("{name} sent {value} to the {end}"));
                if let Some(woke) = woke {
                    self.wake(woke, "queue has data")?;
                }
            }
            SendStatus::Blocked if task.is_some() => {
                self.log(TraceKind::Block, format!("{name} blocked: queue full"));
            }
            SendStatus::Blocked => {
                self.log(TraceKind::Queue, format!("{name} dropped {value}: queue full"));
            }
        }
        Ok(status)
    }

    fn queue_receive(&mut self, task: Option<TaskId>) -> Result<ReceiveStatus<i32>, KernelError> {
        let empty = self
            .queue
            .as_ref()
            .ok_or(KernelError::ResourceUnavailable("queue"))?
            .is_empty();
        if let (true, Some(task)) = (empty, task) {
            Self::check_may_block(&self.tasks, &self.interrupts, task)?;
            delay::block_on_event(&mut self.tasks, task, BlockReason::QueueReceive)?;
        }
        let queue = self
            .queue
            .as_mut()
            .ok_or(KernelError::ResourceUnavailable("queue"))?;
        let status = queue.receive(task);
        let name = self.requester_name(task);
        match &status {
            ReceiveStatus::Received { value, woke } => {
                self.record_received(*value);
                self.log(TraceKind::Queue, format!("{name} received {value}"));
                if let Some(woke) = woke {
                    self.wake(*woke, "queue has space")?;
                }
            }
            ReceiveStatus::Blocked if task.is_some() => {
                self.log(TraceKind::Block, format!("{name} blocked: queue empty"));
            }
            ReceiveStatus::Blocked => {
                self.log(TraceKind::Queue, format!("{name} found the queue empty"));
            }
        }
        Ok(status)
    }

    fn semaphore_take(&mut self, task: TaskId) -> Result<TakeStatus, KernelError> {
        let tokens = self
            .semaphore
            .as_ref()
            .ok_or(KernelError::ResourceUnavailable("semaphore"))?
            .tokens();
        if tokens == 0 {
            Self::check_may_block(&self.tasks, &self.interrupts, task)?;
            delay::block_on_event(&mut self.tasks, task, BlockReason::Semaphore)?;
        }
        let semaphore = self
            .semaphore
            .as_mut()
            .ok_or(KernelError::ResourceUnavailable("semaphore"))?;
        let status = semaphore.take(task);
        let left = semaphore.tokens();
        let name = self.name(task);
        match status {
            TakeStatus::Taken => {
                self.log(TraceKind::Semaphore, format!("{name} took a token ({left} left)"));
            }
            TakeStatus::Blocked => {
                self.log(TraceKind::Block, format!("{name} blocked: no tokens"));
            }
        }
        Ok(status)
    }

    fn semaphore_give(&mut self, task: TaskId) -> Result<GiveStatus, KernelError> {
        let semaphore = self
            .semaphore
            .as_mut()
            .ok_or(KernelError::ResourceUnavailable("semaphore"))?;
        let status = semaphore.give();
        let tokens = semaphore.tokens();
        let name = self.name(task);
        match status {
            GiveStatus::Given { woke } => {
                self.log(TraceKind::Semaphore, format!("{name} gave a token ({tokens} available)"));
                if let Some(woke) = woke {
                    self.wake(woke, "token available")?;
                }
            }
            GiveStatus::Full => {
                self.log(TraceKind::Semaphore, format!("{name} gave to a full semaphore"));
            }
        }
        Ok(status)
    }

    // ----- helpers -----

    fn suspend(&mut self, task: TaskId) -> Result<(), KernelError> {
        let tcb = self.tasks.get_mut(task)?;
        tcb.transition(TaskState::Suspended)?;
        tcb.wake_tick = None;
        tcb.blocked_on = None;
        if let Some(mutex) = self.mutex.as_mut() {
            mutex.remove_waiter(task);
        }
        if let Some(queue) = self.queue.as_mut() {
            queue.remove_waiter(task);
        }
        if let Some(semaphore) = self.semaphore.as_mut() {
            semaphore.remove_waiter(task);
        }
        let message = format!("{} suspended", self.name(task));
        self.log(TraceKind::Suspend, message);
        Ok(())
    }

    fn print_uart(&mut self, line: &str) {
        self.uart_output.push_str(line);
        let capacity = self.scenario.config.output_capacity;
        while self.uart_output.matches('\n').count() > capacity {
            match self.uart_output.find('\n') {
                Some(end) => {
                    self.uart_output.drain(..=end);
                }
                None => self.uart_output.clear(),
            }
        }
    }

    fn record_received(&mut self, value: i32) {
        self.received.push(value);
        let capacity = self.scenario.config.output_capacity;
        if self.received.len() > capacity {
            let excess = self.received.len() - capacity;
            self.received.drain(..excess);
        }
    }

    fn wake(&mut self, task: TaskId, why: &str) -> Result<(), KernelError> {
        self.tasks.make_ready(task)?;
        let message = format!("{} woke ({why}) -> READY", self.name(task));
        self.log(TraceKind::Unblock, message);
        Ok(())
    }

    fn ensure_runnable(&self, task: TaskId) -> Result<(), KernelError> {
        let state = self.tasks.get(task)?.state();
        if state.is_schedulable() {
            Ok(())
        } else {
            Err(KernelError::TaskNotRunnable { task, state })
        }
    }

    fn check_may_block(
        tasks: &TaskTable,
        interrupts: &InterruptController,
        task: TaskId,
    ) -> Result<(), KernelError> {
        if interrupts.is_masked() && tasks.running() == Some(task) {
            return Err(KernelError::BlockedInCriticalSection(task));
        }
        Ok(())
    }

    /// Pends PendSV when the selection would change
    fn request_yield_if_needed(&mut self) {
        if self.tasks.running() != Some(scheduler::select_candidate(&self.tasks)) {
            self.yield_pending = true;
        }
    }

    /// Reschedules at once in thread mode with interrupts unmasked,
    /// otherwise leaves it to PendSV
    fn reschedule_now_or_defer(&mut self) -> Result<(), KernelError> {
        if self.context.is_thread() && !self.interrupts.is_masked() {
            self.switch_context()
        } else {
            self.request_yield_if_needed();
            Ok(())
        }
    }

    fn switch_context(&mut self) -> Result<(), KernelError> {
        let before = self.tasks.running();
        let selected = self.scheduler.select_next(&mut self.tasks, self.timer.now())?;
        let message = match before {
            Some(previous) if previous == selected => {
                format!("Scheduler keeps {}", self.name(selected))
            }
            Some(previous) => format!(
                "Context switch: {} -> {}",
                self.name(previous),
                self.name(selected)
            ),
            None => format!("Scheduler selected {}", self.name(selected)),
        };
        self.log(TraceKind::Schedule, message);
        Ok(())
    }

    fn handler_frame(&self) -> Option<Frame> {
        match self.context {
            Context::Handler(frame) => Some(frame),
            _ => None,
        }
    }

    fn name(&self, task: TaskId) -> String {
        self.tasks
            .get(task)
            .map(|t| t.name().to_string())
            .unwrap_or_else(|_| task.to_string())
    }

    fn requester_name(&self, task: Option<TaskId>) -> String {
        task.map_or_else(|| "Request".to_string(), |task| self.name(task))
    }

    fn log(&mut self, kind: TraceKind, message: impl Into<String>) {
        self.trace
            .record(self.steps, self.timer.now(), kind, message);
    }
}

impl SimulationEngine for SimulatedKernel {
    type Snapshot = KernelSnapshot;

    fn reset(&mut self) {
        match Self::boot(self.scenario.clone()) {
            Ok(fresh) => *self = fresh,
            Err(err) => warn!(target: "sim_kernel", "reset failed, keeping state: {err}"),
        }
    }

    fn step(&mut self, granularity: Granularity) -> Result<KernelSnapshot, KernelError> {
        match granularity {
            Granularity::Instruction => self.step_instruction()?,
            Granularity::TaskInstruction => {
                let target = self.task_instructions + 1;
                self.run_bounded(|k| k.task_instructions >= target)?;
            }
            Granularity::Tick => {
                let start = self.timer.now();
                self.run_bounded(|k| k.timer.now() > start && k.context.is_thread())?;
            }
        }
        Ok(self.snapshot())
    }

    fn snapshot(&self) -> KernelSnapshot {
        KernelSnapshot::capture(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{assert_single_runner, run_ticks, run_until};

    const LED: TaskId = TaskId::new(1);
    const UART: TaskId = TaskId::new(2);
    const IDLE: TaskId = TaskId::new(0);

    fn scheduler_kernel() -> SimulatedKernel {
        SimulatedKernel::new(Scenario::scheduler_demo()).unwrap()
    }

    fn state(kernel: &SimulatedKernel, id: TaskId) -> TaskState {
        kernel.tasks().get(id).unwrap().state()
    }

    #[test]
    fn test_boot_selects_led() {
        let kernel = scheduler_kernel();
        assert_eq!(kernel.now(), Tick::ZERO);
        assert_eq!(kernel.current_task(), Some(LED));
        assert_eq!(state(&kernel, UART), TaskState::Ready);
        assert_eq!(state(&kernel, IDLE), TaskState::Ready);
        assert!(kernel.context().is_thread());
    }

    #[test]
    fn test_led_delay_sets_wake_tick() {
        let mut kernel = scheduler_kernel();
        // ToggleLed, Work, Delay(4)
        for _ in 0..3 {
            kernel.step(Granularity::Instruction).unwrap();
        }
        let led = kernel.tasks().get(LED).unwrap();
        assert_eq!(led.state(), TaskState::Blocked);
        assert_eq!(led.wake_tick(), Some(Tick::new(4)));
        assert!(kernel.led_on());
        assert!(kernel.yield_pending());

        // PendSV: SwitchContext then return
        kernel.step(Granularity::Instruction).unwrap();
        assert_eq!(kernel.current_task(), Some(UART));
        assert!(matches!(kernel.context(), Context::Handler(_)));
        kernel.step(Granularity::Instruction).unwrap();
        assert!(kernel.context().is_thread());
    }

    #[test]
    fn test_led_reselected_at_tick_four() {
        let mut kernel = scheduler_kernel();
        run_until(&mut kernel, Granularity::Instruction, 500, |k| {
            k.now() == Tick::new(4) && k.context().is_thread()
        })
        .unwrap();
        assert_eq!(kernel.current_task(), Some(LED));
        assert_single_runner(&kernel);
    }

    #[test]
    fn test_uart_prints_inside_critical_section() {
        let mut kernel = scheduler_kernel();
        run_until(&mut kernel, Granularity::TaskInstruction, 50, |k| {
            !k.uart_output().is_empty()
        })
        .unwrap();
        assert_eq!(kernel.uart_output(), "Tick: 0\n");
        assert_eq!(kernel.interrupts().critical_nesting(), 1);
    }

    #[test]
    fn test_uart_output_keeps_newest_lines() {
        let config = KernelConfig {
            output_capacity: 2,
            ..KernelConfig::default()
        };
        let mut kernel = SimulatedKernel::new(Scenario::scheduler_demo().with_config(config)).unwrap();
        run_ticks(&mut kernel, 7).unwrap();
        assert_eq!(kernel.uart_output(), "Tick: 4\nTick: 6\n");
    }

    #[test]
    fn test_tick_granularity_advances_one_tick() {
        let mut kernel = scheduler_kernel();
        let snapshot = kernel.step(Granularity::Tick).unwrap();
        assert_eq!(snapshot.tick, Tick::new(1));
        assert!(kernel.context().is_thread());
        run_ticks(&mut kernel, 3).unwrap();
        assert_eq!(kernel.now(), Tick::new(4));
    }

    #[test]
    fn test_interrupt_latched_in_critical_section() {
        let mut kernel = scheduler_kernel();
        run_until(&mut kernel, Granularity::TaskInstruction, 50, |k| {
            k.interrupts().is_masked()
        })
        .unwrap();

        assert_eq!(kernel.trigger_interrupt(), InterruptOutcome::Pended);
        assert!(kernel.interrupts().is_pending());
        assert!(!kernel.interrupts().is_executing_isr());

        // UartPrint, then ExitCritical
        kernel.step(Granularity::Instruction).unwrap();
        assert!(kernel.interrupts().is_pending());
        kernel.step(Granularity::Instruction).unwrap();
        assert!(!kernel.interrupts().is_masked());

        kernel.step(Granularity::Instruction).unwrap();
        assert!(kernel.interrupts().is_executing_isr());
        assert!(!kernel.interrupts().is_pending());
        assert!(matches!(kernel.context(), Context::Isr { .. }));
    }

    #[test]
    fn test_interrupt_serviced_immediately_when_unmasked() {
        let mut kernel = scheduler_kernel();
        assert_eq!(kernel.trigger_interrupt(), InterruptOutcome::Serviced);
        assert!(matches!(kernel.context(), Context::Isr { pc: 0, resume: None }));
        kernel.step(Granularity::Instruction).unwrap();
        kernel.step(Granularity::Instruction).unwrap();
        assert!(kernel.context().is_thread());
        assert!(kernel.yield_pending());
        assert!(!kernel.interrupts().is_executing_isr());
    }

    #[test]
    fn test_set_priority_preempts_immediately() {
        let mut kernel = scheduler_kernel();
        kernel.set_priority(UART, 3).unwrap();
        assert_eq!(kernel.current_task(), Some(UART));
        assert_eq!(state(&kernel, LED), TaskState::Ready);
    }

    #[test]
    fn test_set_priority_validation() {
        let mut kernel = scheduler_kernel();
        assert_eq!(
            kernel.set_priority(IDLE, 2).unwrap_err(),
            KernelError::IdleTaskMisuse(IDLE)
        );
        assert!(matches!(
            kernel.set_priority(UART, 0),
            Err(KernelError::InvalidPriority { .. })
        ));
        assert!(matches!(
            kernel.set_priority(UART, 5),
            Err(KernelError::InvalidPriority { .. })
        ));
        assert_eq!(
            kernel.set_priority(TaskId::new(7), 1).unwrap_err(),
            KernelError::UnknownTask(TaskId::new(7))
        );
    }

    #[test]
    fn test_set_priority_in_critical_section_defers() {
        let mut kernel = scheduler_kernel();
        run_until(&mut kernel, Granularity::TaskInstruction, 50, |k| {
            k.interrupts().is_masked()
        })
        .unwrap();
        kernel.set_priority(LED, 1).unwrap();
        assert_eq!(kernel.current_task(), Some(UART));
        assert!(!kernel.yield_pending());
    }

    #[test]
    fn test_missing_resources() {
        let mut kernel = scheduler_kernel();
        assert_eq!(
            kernel.request_acquire(LED).unwrap_err(),
            KernelError::ResourceUnavailable("mutex")
        );
        assert_eq!(
            kernel.request_send(1, false).unwrap_err(),
            KernelError::ResourceUnavailable("queue producer")
        );
    }

    #[test]
    fn test_reset_restores_boot_state() {
        let mut kernel = scheduler_kernel();
        run_ticks(&mut kernel, 5).unwrap();
        kernel.reset();
        assert_eq!(kernel.now(), Tick::ZERO);
        assert_eq!(kernel.current_task(), Some(LED));
        assert_eq!(kernel.steps(), 0);
        assert!(kernel.uart_output().is_empty());
        assert!(!kernel.led_on());
    }

    #[test]
    fn test_step_limit() {
        let scenario = Scenario::scheduler_demo()
            .with_tick_source(TickSource::Manual)
            .with_task(tcb::TaskSpec::new(3, "Spin", 4, vec![TaskOp::Work("spin".into())]));
        let mut kernel = SimulatedKernel::new(scenario).unwrap();
        let limit = kernel.scenario().config.max_steps_per_request;
        assert_eq!(
            kernel.step(Granularity::Tick).unwrap_err(),
            KernelError::StepLimitExceeded { limit }
        );
    }

    #[test]
    fn test_delay_inside_critical_section_is_rejected() {
        let scenario = Scenario::new("bad")
            .with_task(tcb::TaskSpec::new(
                1,
                "Bad",
                1,
                vec![TaskOp::EnterCritical, TaskOp::Delay(1)],
            ))
            .with_task(scenario::idle_task());
        let mut kernel = SimulatedKernel::new(scenario).unwrap();
        kernel.step(Granularity::Instruction).unwrap();
        assert_eq!(
            kernel.step(Granularity::Instruction).unwrap_err(),
            KernelError::BlockedInCriticalSection(TaskId::new(1))
        );
    }

    #[test]
    fn test_zero_delay_fails_at_construction() {
        let json = r#"{
            "name": "zero_delay",
            "tasks": [
                {"id": 1, "name": "Sleepy", "priority": 1, "program": [{"delay": 0}]},
                {"id": 0, "name": "IDLE", "priority": 0, "program": ["wait_for_interrupt"]}
            ]
        }"#;
        let scenario = Scenario::from_json(json).unwrap();
        assert!(matches!(
            SimulatedKernel::new(scenario),
            Err(KernelError::InvalidScenario(message)) if message.contains("zero ticks")
        ));
    }

    #[test]
    fn test_suspend_and_resume() {
        let mut kernel = scheduler_kernel();
        kernel.suspend_task(LED).unwrap();
        assert_eq!(state(&kernel, LED), TaskState::Suspended);
        assert_eq!(kernel.current_task(), Some(UART));

        assert!(matches!(
            kernel.resume_task(UART),
            Err(KernelError::InvalidTransition { .. })
        ));
        kernel.resume_task(LED).unwrap();
        assert_eq!(kernel.current_task(), Some(LED));
        assert_eq!(
            kernel.suspend_task(IDLE).unwrap_err(),
            KernelError::IdleTaskMisuse(IDLE)
        );
    }

    #[test]
    fn test_trace_records_transitions() {
        let mut kernel = scheduler_kernel();
        run_ticks(&mut kernel, 1).unwrap();
        let trace = kernel.trace();
        assert!(trace.has_event(|e| e.kind == TraceKind::Reset));
        assert!(trace.has_event(|e| e.kind == TraceKind::Tick && e.tick == Tick::new(1)));
        assert!(!trace.last_message().is_empty());
    }
}
